//! Tee element: duplicates buffers to every request pad.
//!
//! Source pads are requested from the `src_%u` template. Every buffer is
//! pushed to each of them as a shared reference, so no payload is copied.
//! Events arriving on the sink pad go to all source pads; upstream events
//! go back through the sink pad.
//!
//! The combined flow result is `Ok` as soon as one branch accepted the
//! buffer. Branches returning `not-linked` or `eos` are skipped; only when
//! every branch does so is that result returned (`not-linked` becomes `Ok`
//! with `allow-not-linked`). Any other error stops the fan-out and is
//! returned immediately.
//!
//! | Property           | Type    | Default | Meaning                                 |
//! |--------------------|---------|---------|-----------------------------------------|
//! | `allow-not-linked` | boolean | false   | Accept data even if no branch is linked |
//! | `num-src-pads`     | integer |         | Read-only number of source pads         |

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tracing::{debug, trace};

use crate::buffer::Buffer;
use crate::element::{Element, ElementImpl, PropertyValue, StateChange, StateChangeReturn, unknown_property};
use crate::error::Result;
use crate::flow::{FlowError, FlowResult, FlowSuccess};
use crate::pad::{Pad, PadDirection, PadFlags, PadPresence, PadTemplate};

use super::any_templates;

/// Fan-out element; see the [module docs](self).
#[derive(Default)]
pub struct Tee {
    allow_not_linked: AtomicBool,
    num_src_pads: AtomicUsize,
    /// Number of buffers that have passed through.
    count: AtomicU64,
    /// Total bytes that have passed through.
    bytes: AtomicU64,
}

impl Tee {
    /// Create a new Tee element.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of buffers that have passed through.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Get the total bytes that have passed through.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Reset the statistics.
    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
    }
}

impl ElementImpl for Tee {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        any_templates(&[
            ("sink", PadDirection::Sink, PadPresence::Always),
            ("src_%u", PadDirection::Src, PadPresence::Request),
        ])
    }

    fn constructed(&self, element: &Element) -> Result<()> {
        element.add_always_pads()?;
        for pad in element.sink_pads() {
            pad.set_flags(PadFlags::PROXY_CAPS);
        }
        Ok(())
    }

    fn change_state(&self, _element: &Element, transition: StateChange) -> StateChangeReturn {
        if transition == StateChange::ReadyToPaused {
            self.reset();
        }
        StateChangeReturn::Success
    }

    fn request_new_pad(&self, element: &Element, template: &PadTemplate, name: Option<&str>) -> Option<Arc<Pad>> {
        let name = match name {
            Some(name) => name.to_string(),
            None => element.next_pad_name(template),
        };
        debug!(element = %element.name(), pad = %name, "new branch");
        let pad = Pad::from_template(template, name);
        pad.set_flags(PadFlags::PROXY_CAPS);
        self.num_src_pads.fetch_add(1, Ordering::Relaxed);
        Some(pad)
    }

    fn release_pad(&self, element: &Element, pad: &Pad) {
        debug!(element = %element.name(), pad = %pad.name(), "branch released");
        self.num_src_pads.fetch_sub(1, Ordering::Relaxed);
    }

    fn chain(&self, element: &Element, _pad: &Pad, buffer: Buffer) -> FlowResult {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(buffer.size() as u64, Ordering::Relaxed);

        let allow_not_linked = self.allow_not_linked.load(Ordering::Relaxed);
        let branches = element.src_pads();
        let mut accepted = false;
        let mut all_eos = !branches.is_empty();
        for pad in &branches {
            match pad.push(buffer.clone()) {
                Ok(_) => accepted = true,
                Err(FlowError::Eos) => {}
                Err(FlowError::NotLinked) => all_eos = false,
                Err(err) => {
                    trace!(element = %element.name(), pad = %pad.name(), flow = %err, "branch failed");
                    return Err(err);
                }
            }
        }

        if accepted {
            Ok(FlowSuccess::Ok)
        } else if all_eos {
            Err(FlowError::Eos)
        } else if allow_not_linked {
            Ok(FlowSuccess::Ok)
        } else {
            Err(FlowError::NotLinked)
        }
    }

    fn set_property(&self, _element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        match name {
            "allow-not-linked" => self
                .allow_not_linked
                .store(value.expect_bool(name)?, Ordering::Relaxed),
            _ => return Err(unknown_property(name)),
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        match name {
            "allow-not-linked" => Some(PropertyValue::Bool(self.allow_not_linked.load(Ordering::Relaxed))),
            "num-src-pads" => Some(PropertyValue::Integer(self.num_src_pads.load(Ordering::Relaxed) as i64)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::caps::Caps;
    use crate::event::{Event, EventType};

    fn collector(name: &str, received: Arc<Mutex<Vec<Buffer>>>) -> Arc<Pad> {
        let pad = Pad::new(name, PadDirection::Sink);
        pad.set_chain_function(move |_, buffer| {
            received.lock().unwrap().push(buffer);
            Ok(FlowSuccess::Ok)
        });
        pad
    }

    fn tee_with_upstream() -> (Arc<Element>, Arc<Pad>) {
        let tee = Element::new("tee", Tee::new()).unwrap();
        let upstream = Pad::new("up", PadDirection::Src);
        upstream.link(&tee.static_pad("sink").unwrap()).unwrap();
        assert!(upstream.set_active(true));
        assert!(tee.static_pad("sink").unwrap().set_active(true));
        (tee, upstream)
    }

    #[test]
    fn test_fan_out_shares_buffer() {
        let (tee, upstream) = tee_with_upstream();
        let received = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b"] {
            let branch = tee.request_pad("src_%u", None).unwrap();
            let sink = collector(name, received.clone());
            branch.link(&sink).unwrap();
            assert!(branch.set_active(true));
            assert!(sink.set_active(true));
        }
        assert_eq!(
            tee.src_pads().iter().map(|p| p.name().to_string()).collect::<Vec<_>>(),
            ["src_0", "src_1"]
        );

        let buffer = Buffer::from_slice(&[1, 2, 3]);
        assert_eq!(upstream.push(buffer), Ok(FlowSuccess::Ok));
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert!(received[0].ptr_eq(&received[1]));
        assert_eq!(tee.imp::<Tee>().unwrap().count(), 1);
    }

    #[test]
    fn test_not_linked_aggregation() {
        let (tee, upstream) = tee_with_upstream();
        assert_eq!(upstream.push(Buffer::new(1)), Err(FlowError::NotLinked));

        let dangling = tee.request_pad("src_%u", None).unwrap();
        assert!(dangling.set_active(true));
        assert_eq!(upstream.push(Buffer::new(1)), Err(FlowError::NotLinked));

        tee.set_property("allow-not-linked", true).unwrap();
        assert_eq!(upstream.push(Buffer::new(1)), Ok(FlowSuccess::Ok));

        // One linked branch is enough.
        tee.set_property("allow-not-linked", false).unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let branch = tee.request_pad("src_%u", None).unwrap();
        let sink = collector("s", received.clone());
        branch.link(&sink).unwrap();
        assert!(branch.set_active(true));
        assert!(sink.set_active(true));
        assert_eq!(upstream.push(Buffer::new(1)), Ok(FlowSuccess::Ok));
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_all_branches_eos() {
        let (tee, upstream) = tee_with_upstream();
        let branch = tee.request_pad("src_%u", None).unwrap();
        let sink = Pad::new("s", PadDirection::Sink);
        sink.set_chain_function(|_, _| Err(FlowError::Eos));
        branch.link(&sink).unwrap();
        assert!(branch.set_active(true));
        assert!(sink.set_active(true));
        assert_eq!(upstream.push(Buffer::new(1)), Err(FlowError::Eos));
    }

    #[test]
    fn test_events_reach_every_branch() {
        let (tee, upstream) = tee_with_upstream();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b"] {
            let branch = tee.request_pad("src_%u", None).unwrap();
            let sink = Pad::new(name, PadDirection::Sink);
            let s = seen.clone();
            sink.set_event_function(move |pad, event| {
                s.lock().unwrap().push((pad.name().to_string(), event.event_type()));
                true
            });
            branch.link(&sink).unwrap();
            assert!(branch.set_active(true));
            assert!(sink.set_active(true));
        }
        assert!(upstream.push_event(Event::eos()));
        assert_eq!(
            *seen.lock().unwrap(),
            [("a".to_string(), EventType::Eos), ("b".to_string(), EventType::Eos)]
        );
    }

    #[test]
    fn test_release_request_pad() {
        let tee = Element::new("tee", Tee::new()).unwrap();
        let pad = tee.request_pad("src_%u", Some("src_5")).unwrap();
        assert!(pad.has_flags(PadFlags::PROXY_CAPS));
        assert!(tee.request_pad("src_%u", Some("src_5")).is_none());
        assert_eq!(tee.property("num-src-pads"), Some(PropertyValue::Integer(1)));
        tee.release_request_pad(&pad).unwrap();
        assert_eq!(tee.property("num-src-pads"), Some(PropertyValue::Integer(0)));
        assert!(tee.static_pad("src_5").is_none());
        assert!(tee.release_request_pad(&tee.static_pad("sink").unwrap()).is_err());
        assert_eq!(Caps::new_any(), pad.template_caps());
    }
}
