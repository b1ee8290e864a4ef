//! Top-level bin owning the bus and the clock.
//!
//! Going PAUSED→PLAYING, the pipeline selects a clock (an application
//! forced one, else the most upstream element providing one, else a
//! [`SystemClock`]) and sets the base time so that running time resumes
//! where it stopped. Running time is recorded again on PLAYING→PAUSED.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use crate::bus::{Bus, BusConfig};
use crate::clock::{Clock, ClockTime, PipelineClock, SystemClock};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::message::{Message, MessageView};

use super::{Bin, Element, ElementImpl, StateChange, StateChangeReturn};

/// Pipeline configuration.
#[derive(Clone)]
pub struct PipelineConfig {
    /// Clock to use instead of automatic selection.
    pub clock: Option<Arc<dyn Clock>>,
    /// Drop pending bus messages when reaching NULL.
    pub auto_flush_bus: bool,
    /// Bus settings.
    pub bus: BusConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            clock: None,
            auto_flush_bus: true,
            bus: BusConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Force a clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Enable or disable flushing the bus on READY→NULL.
    pub fn with_auto_flush_bus(mut self, auto_flush: bool) -> Self {
        self.auto_flush_bus = auto_flush;
        self
    }

    /// Bus settings.
    pub fn with_bus(mut self, bus: BusConfig) -> Self {
        self.bus = bus;
        self
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("clock", &self.clock.as_ref().map(|c| c.name().to_string()))
            .field("auto_flush_bus", &self.auto_flush_bus)
            .field("bus", &self.bus)
            .finish()
    }
}

// State shared between the element implementation and the `Pipeline` handle.
struct PipelineShared {
    bus: Bus,
    clock: Arc<PipelineClock>,
    forced_clock: Mutex<Option<Arc<dyn Clock>>>,
}

struct PipelineImpl {
    bin: Bin,
    shared: Arc<PipelineShared>,
    system_clock: Arc<dyn Clock>,
    clock_announced: AtomicBool,
    stream_time: Mutex<ClockTime>,
    auto_flush_bus: bool,
}

impl PipelineImpl {
    fn new(config: PipelineConfig) -> Self {
        let system_clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        Self {
            bin: Bin::new(),
            shared: Arc::new(PipelineShared {
                bus: Bus::with_config(config.bus),
                clock: Arc::new(PipelineClock::new(system_clock.clone())),
                forced_clock: Mutex::new(config.clock),
            }),
            system_clock,
            clock_announced: AtomicBool::new(false),
            stream_time: Mutex::new(ClockTime::ZERO),
            auto_flush_bus: config.auto_flush_bus,
        }
    }

    fn select_clock(&self, element: &Element) {
        let forced = self
            .shared
            .forced_clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let selected = forced
            .or_else(|| self.bin.provide_clock())
            .unwrap_or_else(|| self.system_clock.clone());
        let clock = &self.shared.clock;
        let changed = !Arc::ptr_eq(&selected, &clock.clock());
        if changed {
            clock.set_clock(selected.clone());
        }
        if changed || !self.clock_announced.swap(true, Ordering::AcqRel) {
            info!(pipeline = %element.name(), clock = selected.name(), "clock selected");
            element.post_message(Message::new(
                Some(element),
                MessageView::NewClock {
                    clock: selected.name().to_string(),
                },
            ));
        }
    }

    fn stream_time(&self) -> ClockTime {
        *self.stream_time.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_stream_time(&self, time: ClockTime) {
        *self.stream_time.lock().unwrap_or_else(PoisonError::into_inner) = time;
    }
}

impl ElementImpl for PipelineImpl {
    fn constructed(&self, _element: &Element) -> Result<()> {
        Ok(())
    }

    fn change_state(&self, element: &Element, transition: StateChange) -> StateChangeReturn {
        let clock = &self.shared.clock;
        match transition {
            StateChange::ReadyToPaused => {
                self.set_stream_time(ClockTime::ZERO);
                clock.reset();
            }
            StateChange::PausedToPlaying => {
                self.select_clock(element);
                let running = self.stream_time();
                clock.start(running);
                debug!(pipeline = %element.name(), base_time = %clock.base_time(), %running, "clock started");
            }
            _ => {}
        }

        let ret = self.bin.change_state(element, transition);
        if ret == StateChangeReturn::Failure {
            return ret;
        }

        match transition {
            StateChange::PlayingToPaused => {
                let running = clock.running_time();
                if !running.is_none() {
                    self.set_stream_time(running);
                }
                debug!(pipeline = %element.name(), %running, "clock paused");
            }
            StateChange::PausedToReady => {
                clock.reset();
                self.clock_announced.store(false, Ordering::Release);
            }
            StateChange::ReadyToNull if self.auto_flush_bus => {
                self.shared.bus.set_flushing(true);
                self.shared.bus.set_flushing(false);
            }
            _ => {}
        }
        ret
    }

    fn handle_message(&self, element: &Element, message: Message) {
        self.bin.handle_message(element, message);
    }

    fn send_event(&self, element: &Element, event: Event) -> bool {
        self.bin.send_event(element, event)
    }

    fn provide_clock(&self) -> Option<Arc<dyn Clock>> {
        self.bin.provide_clock()
    }

    fn bus(&self) -> Option<Bus> {
        Some(self.shared.bus.clone())
    }

    fn pipeline_clock(&self) -> Option<Arc<PipelineClock>> {
        Some(self.shared.clock.clone())
    }

    fn bin(&self) -> Option<&Bin> {
        Some(&self.bin)
    }
}

/// A top-level bin with a bus and a clock.
///
/// Dereferences to its [`Element`], so container and state operations are
/// called directly on the pipeline.
///
/// ```rust
/// use padline::element::{Pipeline, State, StateChangeReturn};
///
/// let pipeline = Pipeline::new("pipeline").unwrap();
/// assert_eq!(pipeline.set_state(State::Playing), StateChangeReturn::Success);
/// assert_eq!(pipeline.set_state(State::Null), StateChangeReturn::Success);
/// ```
#[derive(Clone)]
pub struct Pipeline {
    element: Arc<Element>,
    shared: Arc<PipelineShared>,
}

impl Pipeline {
    /// Pipeline with default configuration.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        Self::with_config(name, PipelineConfig::default())
    }

    /// Pipeline with explicit configuration.
    pub fn with_config(name: impl Into<String>, config: PipelineConfig) -> Result<Self> {
        Self::from_element(Element::new(name, PipelineImpl::new(config))?)
    }

    /// View an element as a pipeline.
    pub fn from_element(element: Arc<Element>) -> Result<Self> {
        let shared = element
            .imp::<PipelineImpl>()
            .map(|imp| imp.shared.clone())
            .ok_or_else(|| Error::NotABin(element.name().to_string()))?;
        Ok(Pipeline { element, shared })
    }

    /// The element handle.
    pub fn element(&self) -> &Arc<Element> {
        &self.element
    }

    /// The pipeline bus.
    pub fn bus(&self) -> Bus {
        self.shared.bus.clone()
    }

    /// Force a clock, or return to automatic selection with `None`. Takes
    /// effect on the next PAUSED→PLAYING.
    pub fn use_clock(&self, clock: Option<Arc<dyn Clock>>) {
        *self
            .shared
            .forced_clock
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = clock;
    }

    /// Clock currently used.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.shared.clock.clock()
    }
}

impl Deref for Pipeline {
    type Target = Element;

    fn deref(&self) -> &Element {
        &self.element
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pipeline").field(&*self.element).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::element::State;
    use crate::message::MessageType;
    use std::time::Duration;

    struct ClockSource(Arc<ManualClock>);

    impl ElementImpl for ClockSource {
        fn provide_clock(&self) -> Option<Arc<dyn Clock>> {
            Some(self.0.clone())
        }
    }

    fn drain_types(bus: &Bus) -> Vec<MessageType> {
        std::iter::from_fn(|| bus.pop()).map(|m| m.message_type()).collect()
    }

    #[test]
    fn test_state_changes_reach_bus() {
        let pipeline = Pipeline::with_config("p", PipelineConfig::default().with_auto_flush_bus(false)).unwrap();
        assert_eq!(pipeline.set_state(State::Paused), StateChangeReturn::Success);
        let types = drain_types(&pipeline.bus());
        assert_eq!(types, [MessageType::STATE_CHANGED, MessageType::STATE_CHANGED]);
    }

    #[test]
    fn test_provider_clock_selected() {
        let manual = Arc::new(ManualClock::new());
        let pipeline = Pipeline::new("p").unwrap();
        let src = Element::new("clocksrc", ClockSource(manual.clone())).unwrap();
        pipeline.add(&src).unwrap();

        assert_eq!(pipeline.set_state(State::Playing), StateChangeReturn::Success);
        let clock = pipeline.clock();
        let expected: Arc<dyn Clock> = manual.clone();
        assert!(Arc::ptr_eq(&clock, &expected));
        let msg = pipeline
            .bus()
            .timed_pop_filtered(Some(Duration::ZERO), MessageType::NEW_CLOCK)
            .unwrap();
        assert!(msg.is_from(&pipeline));
    }

    #[test]
    fn test_running_time_resumes_after_pause() {
        let manual = Arc::new(ManualClock::new());
        manual.set_time(ClockTime::SECOND);
        let pipeline = Pipeline::with_config("p", PipelineConfig::default().with_clock(manual.clone())).unwrap();

        pipeline.set_state(State::Playing);
        assert_eq!(pipeline.running_time(), ClockTime::ZERO);
        manual.advance(ClockTime::from_millis(500));
        assert_eq!(pipeline.running_time(), ClockTime::from_millis(500));

        pipeline.set_state(State::Paused);
        manual.advance(ClockTime::SECOND);
        pipeline.set_state(State::Playing);
        assert_eq!(pipeline.running_time(), ClockTime::from_millis(500));
    }

    #[test]
    fn test_auto_flush_on_null() {
        let pipeline = Pipeline::new("p").unwrap();
        pipeline.set_state(State::Ready);
        assert!(pipeline.bus().have_pending());
        pipeline.set_state(State::Null);
        // Only the READY->NULL change, posted after the flush, remains.
        assert_eq!(pipeline.bus().n_pending(), 1);
        assert!(!pipeline.bus().is_flushing());
    }

    #[test]
    fn test_from_element_rejects_plain_bin() {
        let bin = Bin::create("bin").unwrap();
        assert!(matches!(Pipeline::from_element(bin), Err(Error::NotABin(_))));
    }
}
