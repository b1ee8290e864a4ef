//! Sink discarding everything it receives.
//!
//! With `sync` the sink waits on the pipeline clock until each buffer's
//! timestamp is due; a FLUSH-START or pad deactivation cancels the wait.
//! With `async` it completes READY→PAUSED only once the first buffer (or
//! EOS) has arrived, the way prerolling sinks do. EOS events are reported
//! on the bus.
//!
//! | Property      | Type    | Default | Meaning                                |
//! |---------------|---------|---------|----------------------------------------|
//! | `sync`        | boolean | false   | Wait for buffer timestamps on the clock |
//! | `async`       | boolean | false   | Preroll before completing PAUSED        |
//! | `num-buffers` | integer | -1      | Return EOS after this many buffers      |
//! | `caps`        | caps    | ANY     | Caps accepted on the sink pad           |

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use tracing::{debug, trace};

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::clock::ClockReturn;
use crate::element::{Element, ElementImpl, PropertyValue, StateChange, StateChangeReturn, unknown_property};
use crate::error::Result;
use crate::event::{Event, EventView};
use crate::flow::{FlowError, FlowResult, FlowSuccess};
use crate::message::Message;
use crate::pad::{Pad, PadDirection, PadPresence, PadTemplate};
use crate::query::{Query, QueryType};

use super::{any_templates, cache_pad};

/// Callback invoked with every buffer before it is discarded.
pub type HandoffCallback = Arc<dyn Fn(&Element, &Buffer, &Pad) + Send + Sync>;

#[derive(Debug, Clone)]
struct Settings {
    sync: bool,
    is_async: bool,
    num_buffers: i64,
    caps: Caps,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sync: false,
            is_async: false,
            num_buffers: -1,
            caps: Caps::new_any(),
        }
    }
}

/// Test sink; see the [module docs](self).
#[derive(Default)]
pub struct FakeSink {
    settings: Mutex<Settings>,
    sink: OnceLock<Arc<Pad>>,
    received: AtomicU64,
    prerolling: AtomicBool,
    handoffs: RwLock<Vec<HandoffCallback>>,
}

impl FakeSink {
    fn settings(&self) -> Settings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Call `f` for every buffer reaching the sink.
    pub fn connect_handoff<F>(&self, f: F)
    where
        F: Fn(&Element, &Buffer, &Pad) + Send + Sync + 'static,
    {
        self.handoffs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(f));
    }

    /// Buffers received since the sink last went to PAUSED.
    pub fn buffers_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Commit a pending async READY→PAUSED.
    fn complete_preroll(&self, element: &Element) {
        if self.prerolling.swap(false, Ordering::AcqRel) {
            debug!(element = %element.name(), "prerolled");
            element.continue_state(StateChangeReturn::Success);
        }
    }

    /// Block until the buffer's running time is reached.
    fn wait_for_clock(&self, element: &Element, pad: &Pad, buffer: &Buffer) -> FlowResult {
        let Some(clock) = element.pipeline_clock() else {
            return Ok(FlowSuccess::Ok);
        };
        let pts = buffer.pts();
        if !clock.is_started() || pts.is_none() {
            return Ok(FlowSuccess::Ok);
        }
        let id = Arc::new(clock.new_wait(pts));
        let target = pad.add_flush_target(&id);
        let (ret, jitter) = id.wait();
        pad.remove_flush_target(target);
        trace!(element = %element.name(), %pts, ?ret, jitter, "clock wait done");
        match ret {
            ClockReturn::Unscheduled => Err(FlowError::Flushing),
            _ => Ok(FlowSuccess::Ok),
        }
    }
}

impl ElementImpl for FakeSink {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        any_templates(&[("sink", PadDirection::Sink, PadPresence::Always)])
    }

    fn constructed(&self, element: &Element) -> Result<()> {
        element.add_always_pads()?;
        cache_pad(element, &self.sink, "sink")
    }

    fn change_state(&self, _element: &Element, transition: StateChange) -> StateChangeReturn {
        match transition {
            StateChange::ReadyToPaused => {
                self.received.store(0, Ordering::Relaxed);
                if self.settings().is_async {
                    self.prerolling.store(true, Ordering::Release);
                    return StateChangeReturn::Async;
                }
                StateChangeReturn::Success
            }
            StateChange::PausedToReady => {
                self.prerolling.store(false, Ordering::Release);
                StateChangeReturn::Success
            }
            _ => StateChangeReturn::Success,
        }
    }

    fn chain(&self, element: &Element, pad: &Pad, buffer: Buffer) -> FlowResult {
        let settings = self.settings();
        let limit = u64::try_from(settings.num_buffers).ok();
        if limit.is_some_and(|limit| self.received.load(Ordering::Relaxed) >= limit) {
            return Err(FlowError::Eos);
        }
        self.complete_preroll(element);
        if settings.sync {
            self.wait_for_clock(element, pad, &buffer)?;
        }

        let count = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(element = %element.name(), size = buffer.size(), count, "buffer received");
        let handoffs = self
            .handoffs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handoff in handoffs {
            handoff(element, &buffer, pad);
        }

        if limit.is_some_and(|limit| count >= limit) {
            debug!(element = %element.name(), "received num-buffers");
            return Err(FlowError::Eos);
        }
        Ok(FlowSuccess::Ok)
    }

    fn sink_event(&self, element: &Element, _pad: &Pad, event: Event) -> bool {
        match event.view() {
            EventView::Eos => {
                self.complete_preroll(element);
                debug!(element = %element.name(), "end of stream");
                element.post_message(Message::eos(Some(element)));
                true
            }
            EventView::Caps(caps) => caps.is_subset(&self.settings().caps),
            _ => true,
        }
    }

    fn query(&self, _element: &Element, pad: &Pad, query: &mut Query) -> bool {
        match query.query_type() {
            QueryType::Caps => {
                let caps = self.settings().caps;
                let result = match query.caps_filter() {
                    Some(filter) => filter.intersect(&caps),
                    None => caps,
                };
                query.set_caps_result(result);
                true
            }
            _ => pad.query_default(query),
        }
    }

    fn set_property(&self, _element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        match name {
            "sync" => settings.sync = value.expect_bool(name)?,
            "async" => settings.is_async = value.expect_bool(name)?,
            "num-buffers" => settings.num_buffers = value.expect_i64(name)?.max(-1),
            "caps" => settings.caps = value.expect_caps(name)?,
            _ => return Err(unknown_property(name)),
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        let settings = self.settings();
        let value = match name {
            "sync" => PropertyValue::Bool(settings.sync),
            "async" => PropertyValue::Bool(settings.is_async),
            "num-buffers" => PropertyValue::Integer(settings.num_buffers),
            "caps" => PropertyValue::String(settings.caps.to_string()),
            _ => return None,
        };
        Some(value)
    }
}
