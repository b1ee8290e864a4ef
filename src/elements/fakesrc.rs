//! Source producing filler buffers.
//!
//! In push mode the source runs a [`Task`] on its `src` pad that sends
//! STREAM-START, negotiates, sends a SEGMENT, pushes `num-buffers` buffers
//! of `size` bytes and finishes with EOS. A live source only produces in
//! PLAYING and reports NO_PREROLL. With `can-activate-pull` the pad also
//! answers `get_range` so a downstream element can drive it.
//!
//! | Property            | Type    | Default | Meaning                                  |
//! |---------------------|---------|---------|------------------------------------------|
//! | `num-buffers`       | integer | -1      | Buffers before EOS, -1 for unlimited     |
//! | `size`              | integer | 0       | Bytes per buffer                         |
//! | `filler`            | integer | 0       | Byte value the buffers are filled with   |
//! | `caps`              | caps    | ANY     | Caps offered on the source pad           |
//! | `is-live`           | boolean | false   | Only produce in PLAYING                  |
//! | `buffer-duration`   | integer | none    | Duration in ns; also sets timestamps     |
//! | `can-activate-pull` | boolean | false   | Allow pull-mode scheduling               |

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::{debug, trace, warn};

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::clock::ClockTime;
use crate::element::{Element, ElementImpl, PropertyValue, StateChange, StateChangeReturn, unknown_property};
use crate::error::Result;
use crate::event::{Event, Segment};
use crate::flow::FlowError;
use crate::pad::{Pad, PadDirection, PadMode, PadPresence, PadTemplate};
use crate::query::{Query, QueryType};
use crate::task::Task;

use super::{any_templates, cache_pad};

#[derive(Debug, Clone)]
struct Settings {
    num_buffers: i64,
    size: usize,
    filler: u8,
    caps: Caps,
    is_live: bool,
    buffer_duration: ClockTime,
    can_activate_pull: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            num_buffers: -1,
            size: 0,
            filler: 0,
            caps: Caps::new_any(),
            is_live: false,
            buffer_duration: ClockTime::NONE,
            can_activate_pull: false,
        }
    }
}

impl Settings {
    fn limit(&self) -> Option<u64> {
        u64::try_from(self.num_buffers).ok()
    }
}

#[derive(Debug, Default)]
struct Progress {
    started: bool,
    produced: u64,
    offset: u64,
}

/// Test source; see the [module docs](self).
#[derive(Default)]
pub struct FakeSrc {
    settings: Mutex<Settings>,
    progress: Mutex<Progress>,
    src: OnceLock<Arc<Pad>>,
    task: Mutex<Option<Task>>,
}

impl FakeSrc {
    fn settings(&self) -> Settings {
        self.settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<Task>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffers pushed since the pad was last activated.
    pub fn buffers_produced(&self) -> u64 {
        self.lock_progress().produced
    }

    fn start_task(&self, element: &Element) -> Result<()> {
        *self.lock_progress() = Progress::default();
        let live = self.settings().is_live;
        let mut task = self.lock_task();
        let task = task.get_or_insert_with(|| {
            let weak = element.downgrade();
            Task::new(format!("{}:src", element.name()), move || {
                let Some(element) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                match element.imp::<FakeSrc>() {
                    Some(src) => src.produce(&element),
                    None => ControlFlow::Break(()),
                }
            })
        });
        if live { task.pause() } else { task.start() }
    }

    fn stop_task(&self) {
        let task = self.lock_task().take();
        if let Some(task) = task {
            task.join();
        }
    }

    fn set_task_running(&self, running: bool) {
        let task = self.lock_task();
        let Some(task) = task.as_ref() else {
            return;
        };
        let result = if running { task.start() } else { task.pause() };
        if let Err(err) = result {
            warn!(task = task.name(), error = %err, "could not change task state");
        }
    }

    /// One task iteration.
    fn produce(&self, element: &Element) -> ControlFlow<()> {
        let Some(pad) = self.src.get() else {
            return ControlFlow::Break(());
        };
        let settings = self.settings();

        let first = !std::mem::replace(&mut self.lock_progress().started, true);
        if first {
            pad.push_event(Event::stream_start(format!("{}/{}", element.name(), pad.name())));
            // A failed negotiation has already posted its error.
            if pad.is_linked() && !pad.negotiate() {
                return ControlFlow::Break(());
            }
            pad.push_event(Event::segment(Segment::default()));
        }

        let buffer = {
            let mut progress = self.lock_progress();
            if settings.limit().is_some_and(|limit| progress.produced >= limit) {
                drop(progress);
                debug!(element = %element.name(), "all buffers produced, sending EOS");
                pad.push_event(Event::eos());
                return ControlFlow::Break(());
            }
            let mut buffer = Buffer::from_vec(vec![settings.filler; settings.size]);
            buffer.set_offset(progress.offset);
            if settings.buffer_duration.is_some() {
                let pts = settings.buffer_duration.nanos().saturating_mul(progress.produced);
                buffer.set_pts(ClockTime::from_nanos(pts));
                buffer.set_duration(settings.buffer_duration);
            }
            progress.produced += 1;
            progress.offset += settings.size as u64;
            buffer
        };

        trace!(element = %element.name(), size = settings.size, "pushing buffer");
        match pad.push(buffer) {
            Ok(_) => ControlFlow::Continue(()),
            Err(err) => {
                element.flow_error(err);
                if err == FlowError::Eos || err.is_fatal() {
                    pad.push_event(Event::eos());
                }
                ControlFlow::Break(())
            }
        }
    }
}

impl ElementImpl for FakeSrc {
    fn pad_templates(&self) -> Vec<PadTemplate> {
        any_templates(&[("src", PadDirection::Src, PadPresence::Always)])
    }

    fn constructed(&self, element: &Element) -> Result<()> {
        element.add_always_pads()?;
        cache_pad(element, &self.src, "src")
    }

    fn change_state(&self, _element: &Element, transition: StateChange) -> StateChangeReturn {
        if !self.settings().is_live {
            return StateChangeReturn::Success;
        }
        match transition {
            StateChange::ReadyToPaused => StateChangeReturn::NoPreroll,
            StateChange::PausedToPlaying => {
                self.set_task_running(true);
                StateChangeReturn::Success
            }
            StateChange::PlayingToPaused => {
                self.set_task_running(false);
                StateChangeReturn::NoPreroll
            }
            _ => StateChangeReturn::Success,
        }
    }

    fn activate_mode(&self, element: &Element, _pad: &Pad, mode: PadMode, active: bool) -> bool {
        match (mode, active) {
            (PadMode::Push, true) => match self.start_task(element) {
                Ok(()) => true,
                Err(err) => {
                    warn!(element = %element.name(), error = %err, "could not start streaming task");
                    false
                }
            },
            (PadMode::Push, false) => {
                self.stop_task();
                true
            }
            (PadMode::Pull, true) => self.settings().can_activate_pull,
            _ => true,
        }
    }

    fn get_range(&self, _element: &Element, _pad: &Pad, offset: u64, size: usize) -> std::result::Result<Buffer, FlowError> {
        let settings = self.settings();
        let mut size = size as u64;
        if let Some(limit) = settings.limit() {
            let total = limit.saturating_mul(settings.size as u64);
            if offset >= total {
                return Err(FlowError::Eos);
            }
            size = size.min(total - offset);
        }
        let mut buffer = Buffer::from_vec(vec![settings.filler; size as usize]);
        buffer.set_offset(offset);
        Ok(buffer)
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
            QueryType::Scheduling => {
                if self.settings().can_activate_pull {
                    query.set_scheduling(&[PadMode::Push, PadMode::Pull], true);
                } else {
                    query.set_scheduling(&[PadMode::Push], false);
                }
                true
            }
            _ => pad.query_default(query),
        }
    }

    fn set_property(&self, _element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        let mut settings = self.settings.lock().unwrap_or_else(PoisonError::into_inner);
        match name {
            "num-buffers" => settings.num_buffers = value.expect_i64(name)?.max(-1),
            "size" => settings.size = value.expect_u64(name)? as usize,
            "filler" => settings.filler = value.expect_u64(name)?.min(255) as u8,
            "caps" => settings.caps = value.expect_caps(name)?,
            "is-live" => settings.is_live = value.expect_bool(name)?,
            "buffer-duration" => settings.buffer_duration = ClockTime::from_nanos(value.expect_u64(name)?),
            "can-activate-pull" => settings.can_activate_pull = value.expect_bool(name)?,
            _ => return Err(unknown_property(name)),
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        let settings = self.settings();
        let value = match name {
            "num-buffers" => PropertyValue::Integer(settings.num_buffers),
            "size" => PropertyValue::Integer(settings.size as i64),
            "filler" => PropertyValue::Integer(i64::from(settings.filler)),
            "caps" => PropertyValue::String(settings.caps.to_string()),
            "is-live" => PropertyValue::Bool(settings.is_live),
            "buffer-duration" => PropertyValue::Integer(settings.buffer_duration.to_option()?.nanos() as i64),
            "can-activate-pull" => PropertyValue::Bool(settings.can_activate_pull),
            _ => return None,
        };
        Some(value)
    }
}
