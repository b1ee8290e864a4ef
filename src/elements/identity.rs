//! Pass-through element with a handoff callback for inspection.
//!
//! Buffers, events and queries pass unchanged. Both pads proxy caps, so
//! negotiation sees straight through the element.
//!
//! | Property      | Type    | Default | Meaning                                       |
//! |---------------|---------|---------|-----------------------------------------------|
//! | `error-after` | integer | -1      | Fail with an ERROR after this many buffers    |
//! | `sleep-time`  | integer | 0       | Microseconds to sleep for every buffer        |

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::thread;
use std::time::Duration;

use tracing::trace;

use crate::buffer::Buffer;
use crate::element::{Element, ElementImpl, PropertyValue, StateChange, StateChangeReturn, unknown_property};
use crate::error::Result;
use crate::flow::{FlowError, FlowResult};
use crate::message::{ErrorKind, StreamError};
use crate::pad::{Pad, PadDirection, PadFlags, PadPresence, PadTemplate};

use super::{any_templates, cache_pad};

/// Callback for buffer inspection.
pub type BufferCallback = Arc<dyn Fn(&Buffer) + Send + Sync>;

/// Pass-through element; see the [module docs](self).
///
/// # Example
///
/// ```rust
/// use padline::buffer::Buffer;
/// use padline::element::Element;
/// use padline::elements::Identity;
///
/// let identity = Element::new("probe", Identity::default()).unwrap();
/// identity.imp::<Identity>().unwrap().on_buffer(|buffer| {
///     assert!(buffer.size() <= 4096);
/// });
/// ```
pub struct Identity {
    src: OnceLock<Arc<Pad>>,
    callback: RwLock<Option<BufferCallback>>,
    error_after: AtomicI64,
    sleep_us: AtomicU64,
    count: AtomicU64,
    bytes: AtomicU64,
}

impl Identity {
    /// Create a new identity element.
    pub fn new() -> Self {
        Self {
            src: OnceLock::new(),
            callback: RwLock::new(None),
            error_after: AtomicI64::new(-1),
            sleep_us: AtomicU64::new(0),
            count: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// Set a callback to be called for each buffer.
    pub fn on_buffer<F>(&self, callback: F)
    where
        F: Fn(&Buffer) + Send + Sync + 'static,
    {
        *self.callback.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Get the number of buffers processed.
    pub fn buffer_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Get the total bytes processed.
    pub fn byte_count(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Get statistics.
    pub fn stats(&self) -> IdentityStats {
        IdentityStats {
            buffer_count: self.count.load(Ordering::Relaxed),
            byte_count: self.bytes.load(Ordering::Relaxed),
        }
    }

    /// Reset statistics.
    pub fn reset_stats(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementImpl for Identity {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        any_templates(&[
            ("sink", PadDirection::Sink, PadPresence::Always),
            ("src", PadDirection::Src, PadPresence::Always),
        ])
    }

    fn constructed(&self, element: &Element) -> Result<()> {
        element.add_always_pads()?;
        for pad in element.pads() {
            pad.set_flags(PadFlags::PROXY_CAPS);
        }
        cache_pad(element, &self.src, "src")
    }

    fn change_state(&self, _element: &Element, transition: StateChange) -> StateChangeReturn {
        if transition == StateChange::ReadyToPaused {
            self.reset_stats();
        }
        StateChangeReturn::Success
    }

    fn chain(&self, element: &Element, _pad: &Pad, buffer: Buffer) -> FlowResult {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        self.bytes.fetch_add(buffer.size() as u64, Ordering::Relaxed);

        let error_after = self.error_after.load(Ordering::Relaxed);
        if u64::try_from(error_after).is_ok_and(|n| count > n) {
            element.post_error(
                ErrorKind::Stream(StreamError::Failed),
                format!("{}: induced error after {error_after} buffers", element.name()),
                None,
            );
            return Err(FlowError::Error);
        }

        let sleep_us = self.sleep_us.load(Ordering::Relaxed);
        if sleep_us > 0 {
            thread::sleep(Duration::from_micros(sleep_us));
        }

        let callback = self
            .callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(cb) = callback {
            cb(&buffer);
        }

        trace!(element = %element.name(), count, size = buffer.size(), "handoff");
        match self.src.get() {
            Some(src) => src.push(buffer),
            None => Err(FlowError::NotLinked),
        }
    }

    fn set_property(&self, _element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        match name {
            "error-after" => self
                .error_after
                .store(value.expect_i64(name)?.max(-1), Ordering::Relaxed),
            "sleep-time" => self.sleep_us.store(value.expect_u64(name)?, Ordering::Relaxed),
            _ => return Err(unknown_property(name)),
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "error-after" => Some(PropertyValue::Integer(self.error_after.load(Ordering::Relaxed))),
            "sleep-time" => Some(PropertyValue::Integer(self.sleep_us.load(Ordering::Relaxed) as i64)),
            _ => None,
        }
    }
}

/// Statistics for Identity element.
#[derive(Debug, Clone, Copy)]
pub struct IdentityStats {
    /// Number of buffers processed.
    pub buffer_count: u64,
    /// Total bytes processed.
    pub byte_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::caps::Caps;
    use crate::flow::FlowSuccess;

    fn pass_through() -> (Arc<Element>, Arc<Pad>, Arc<Pad>) {
        let identity = Element::new("id", Identity::new()).unwrap();
        let upstream = Pad::new("up", PadDirection::Src);
        let downstream = Pad::new("down", PadDirection::Sink);
        downstream.set_chain_function(|_, _| Ok(FlowSuccess::Ok));
        upstream.link(&identity.static_pad("sink").unwrap()).unwrap();
        identity.static_pad("src").unwrap().link(&downstream).unwrap();
        for pad in [&upstream, &downstream] {
            assert!(pad.set_active(true));
        }
        for pad in identity.pads() {
            assert!(pad.set_active(true));
        }
        (identity, upstream, downstream)
    }

    #[test]
    fn test_identity_passthrough() {
        let (identity, upstream, _downstream) = pass_through();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        identity.imp::<Identity>().unwrap().on_buffer(move |buffer| {
            assert_eq!(buffer.size(), 100);
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(upstream.push(Buffer::new(100)), Ok(FlowSuccess::Ok));
        assert_eq!(upstream.push(Buffer::new(100)), Ok(FlowSuccess::Ok));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let stats = identity.imp::<Identity>().unwrap().stats();
        assert_eq!(stats.buffer_count, 2);
        assert_eq!(stats.byte_count, 200);
    }

    #[test]
    fn test_error_after() {
        let (identity, upstream, _downstream) = pass_through();
        identity.set_property("error-after", 1).unwrap();
        assert_eq!(upstream.push(Buffer::new(1)), Ok(FlowSuccess::Ok));
        assert_eq!(upstream.push(Buffer::new(1)), Err(FlowError::Error));
        assert_eq!(identity.property("error-after"), Some(PropertyValue::Integer(1)));
    }

    #[test]
    fn test_caps_proxied_from_downstream() {
        let identity = Element::new("id", Identity::new()).unwrap();
        let template = PadTemplate::new(
            "sink",
            PadDirection::Sink,
            PadPresence::Always,
            "audio/x-raw, rate=(int)8000".parse::<Caps>().unwrap(),
        )
        .unwrap();
        let downstream = Pad::from_template(&template, "sink");
        identity.static_pad("src").unwrap().link(&downstream).unwrap();

        let caps = identity.static_pad("sink").unwrap().query_caps(None);
        assert_eq!(caps.to_string(), "audio/x-raw, rate=(int)8000");
    }

    #[test]
    fn test_unknown_property() {
        let identity = Element::new("id", Identity::new()).unwrap();
        assert!(identity.set_property("nope", 1).is_err());
        assert_eq!(identity.property("nope"), None);
    }
}
