//! Queue element: a thread boundary with bounded buffering.
//!
//! The upstream thread enqueues buffers and serialized events into a
//! [`DataQueue`]; the queue's own [`Task`] dequeues them and pushes them out
//! of the `src` pad. Non-serialized events bypass the queue. The queue is a
//! flush target of the `sink` pad, so FLUSH-START and deactivation unblock
//! both sides.
//!
//! | Property                 | Type    | Default  | Meaning                            |
//! |--------------------------|---------|----------|------------------------------------|
//! | `max-size-buffers`       | integer | 200      | Buffer limit, 0 for none           |
//! | `max-size-bytes`         | integer | 10485760 | Byte limit, 0 for none             |
//! | `max-size-time`          | integer | 1 s      | Duration limit in ns, 0 for none   |
//! | `leaky`                  | string  | `no`     | `no`, `upstream` or `downstream`   |
//! | `current-level-buffers`  | integer |          | Read-only fill level               |
//! | `current-level-bytes`    | integer |          | Read-only fill level               |
//! | `current-level-time`     | integer |          | Read-only fill level in ns         |

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::{debug, trace, warn};

use crate::buffer::Buffer;
use crate::clock::ClockTime;
use crate::dataqueue::{DataQueue, DataQueueLimits, QueueItem};
use crate::element::{Element, ElementImpl, PropertyValue, unknown_property};
use crate::error::{Error, Result};
use crate::event::{Event, EventType, EventView};
use crate::flow::{FlowError, FlowResult, FlowSuccess};
use crate::pad::{Pad, PadDirection, PadFlags, PadMode, PadPresence, PadTemplate};
use crate::task::Task;

use super::{any_templates, cache_pad};

/// Leaky mode determines what happens when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeakyMode {
    /// Block until space is available (default).
    #[default]
    None,
    /// Drop new buffers when full (upstream leaky).
    Upstream,
    /// Drop old buffers when full (downstream leaky).
    Downstream,
}

impl LeakyMode {
    fn parse(value: &PropertyValue) -> Option<Self> {
        match value.as_string().as_str() {
            "no" | "none" | "0" => Some(LeakyMode::None),
            "upstream" | "1" => Some(LeakyMode::Upstream),
            "downstream" | "2" => Some(LeakyMode::Downstream),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            LeakyMode::None => "no",
            LeakyMode::Upstream => "upstream",
            LeakyMode::Downstream => "downstream",
        }
    }
}

/// Queue limits and leaky mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum buffers, 0 for unlimited.
    pub max_size_buffers: usize,
    /// Maximum bytes, 0 for unlimited.
    pub max_size_bytes: usize,
    /// Maximum summed buffer duration, `ZERO` for unlimited.
    pub max_size_time: ClockTime,
    /// Behaviour when full.
    pub leaky: LeakyMode,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size_buffers: 200,
            max_size_bytes: 10 * 1024 * 1024,
            max_size_time: ClockTime::SECOND,
            leaky: LeakyMode::None,
        }
    }
}

impl QueueConfig {
    /// Set the buffer limit.
    pub fn with_max_size_buffers(mut self, max: usize) -> Self {
        self.max_size_buffers = max;
        self
    }

    /// Set the byte limit.
    pub fn with_max_size_bytes(mut self, max: usize) -> Self {
        self.max_size_bytes = max;
        self
    }

    /// Set the duration limit.
    pub fn with_max_size_time(mut self, max: ClockTime) -> Self {
        self.max_size_time = max;
        self
    }

    /// Set the leaky mode.
    pub fn with_leaky(mut self, leaky: LeakyMode) -> Self {
        self.leaky = leaky;
        self
    }

    fn limits(&self) -> DataQueueLimits {
        DataQueueLimits::default()
            .with_max_items(self.max_size_buffers)
            .with_max_bytes(self.max_size_bytes)
            .with_max_time(self.max_size_time)
    }
}

enum QueuedItem {
    Buffer(Buffer),
    Event(Event),
}

impl QueueItem for QueuedItem {
    fn byte_size(&self) -> usize {
        match self {
            QueuedItem::Buffer(buffer) => buffer.byte_size(),
            QueuedItem::Event(event) => event.byte_size(),
        }
    }

    fn duration(&self) -> ClockTime {
        match self {
            QueuedItem::Buffer(buffer) => QueueItem::duration(buffer),
            QueuedItem::Event(event) => QueueItem::duration(event),
        }
    }

    fn is_visible(&self) -> bool {
        matches!(self, QueuedItem::Buffer(_))
    }
}

/// Queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Buffers accepted from upstream.
    pub total_pushed: u64,
    /// Buffers pushed downstream.
    pub total_popped: u64,
    /// Buffers discarded by a leaky queue.
    pub total_dropped: u64,
}

/// Queue element; see the [module docs](self).
pub struct Queue {
    config: Mutex<QueueConfig>,
    queue: Arc<DataQueue<QueuedItem>>,
    sink: OnceLock<Arc<Pad>>,
    src: OnceLock<Arc<Pad>>,
    task: Mutex<Option<Task>>,
    src_result: Mutex<Option<FlowError>>,
    pushed: AtomicU64,
    popped: AtomicU64,
    dropped: AtomicU64,
}

impl Queue {
    /// Queue with the given limits.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            queue: Arc::new(DataQueue::new(config.limits())),
            config: Mutex::new(config),
            sink: OnceLock::new(),
            src: OnceLock::new(),
            task: Mutex::new(None),
            src_result: Mutex::new(None),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> QueueConfig {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the configuration. Blocked pushes re-check the new limits.
    pub fn set_config(&self, config: QueueConfig) {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config;
        self.queue.set_limits(config.limits());
    }

    /// Buffers currently queued.
    pub fn current_level_buffers(&self) -> usize {
        self.queue.level().items
    }

    /// Get statistics.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            total_pushed: self.pushed.load(Ordering::Relaxed),
            total_popped: self.popped.load(Ordering::Relaxed),
            total_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<Task>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn src_result(&self) -> Option<FlowError> {
        *self.src_result.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_src_result(&self, result: Option<FlowError>) {
        *self.src_result.lock().unwrap_or_else(PoisonError::into_inner) = result;
    }

    fn start_task(&self, element: &Element) -> Result<()> {
        self.set_src_result(None);
        self.queue.set_flushing(false);
        let mut task = self.lock_task();
        let task = task.get_or_insert_with(|| {
            let weak = element.downgrade();
            Task::new(format!("{}:src", element.name()), move || {
                let Some(element) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                match element.imp::<Queue>() {
                    Some(queue) => queue.push_one(&element),
                    None => ControlFlow::Break(()),
                }
            })
        });
        task.start()
    }

    fn stop_task(&self) {
        self.queue.set_flushing(true);
        let task = self.lock_task().take();
        if let Some(task) = task {
            task.join();
        }
    }

    fn restart_task(&self) {
        let task = self.lock_task();
        if let Some(task) = task.as_ref() {
            if let Err(err) = task.start() {
                warn!(task = task.name(), error = %err, "could not restart task");
            }
        }
    }

    fn pause_task(&self) {
        let task = self.lock_task();
        if let Some(task) = task.as_ref() {
            if let Err(err) = task.pause_and_wait() {
                warn!(task = task.name(), error = %err, "could not pause task");
            }
        }
    }

    /// One task iteration: move the oldest item downstream.
    fn push_one(&self, element: &Element) -> ControlFlow<()> {
        let Some(src) = self.src.get() else {
            return ControlFlow::Break(());
        };
        let item = match self.queue.pop() {
            Ok(item) => item,
            Err(err) => {
                trace!(element = %element.name(), flow = %err, "queue task pausing");
                self.set_src_result(Some(err));
                return ControlFlow::Break(());
            }
        };

        match item {
            QueuedItem::Buffer(buffer) => {
                self.popped.fetch_add(1, Ordering::Relaxed);
                let Err(err) = src.push(buffer) else {
                    return ControlFlow::Continue(());
                };
                self.set_src_result(Some(err));
                if err != FlowError::Flushing {
                    // Wake an upstream push blocked on a full queue.
                    self.queue.set_flushing(true);
                }
                element.flow_error(err);
                if err.is_fatal() {
                    src.push_event(Event::eos());
                }
                ControlFlow::Break(())
            }
            QueuedItem::Event(event) => {
                let is_eos = event.event_type() == EventType::Eos;
                if !src.push_event(event) {
                    trace!(element = %element.name(), "queued event refused downstream");
                }
                if is_eos {
                    debug!(element = %element.name(), "eos left the queue");
                    self.set_src_result(Some(FlowError::Eos));
                    return ControlFlow::Break(());
                }
                ControlFlow::Continue(())
            }
        }
    }

    fn enqueue_buffer(&self, buffer: Buffer) -> std::result::Result<(), FlowError> {
        let item = QueuedItem::Buffer(buffer);
        match self.config().leaky {
            LeakyMode::None => self.queue.push(item),
            LeakyMode::Upstream => match self.queue.try_push(item) {
                Ok(()) => Ok(()),
                Err(_) if self.queue.is_flushing() => Err(FlowError::Flushing),
                Err(_) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!("queue full, dropping incoming buffer");
                    Ok(())
                }
            },
            LeakyMode::Downstream => self.queue.push_dropping_oldest(item).map(|dropped| {
                self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
            }),
        }
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl ElementImpl for Queue {
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
        cache_pad(element, &self.sink, "sink")?;
        cache_pad(element, &self.src, "src")?;
        if let Some(sink) = self.sink.get() {
            sink.add_flush_target(&self.queue);
        }
        Ok(())
    }

    fn activate_mode(&self, element: &Element, pad: &Pad, mode: PadMode, active: bool) -> bool {
        if pad.direction() != PadDirection::Src {
            return mode == PadMode::Push || !active;
        }
        match (mode, active) {
            (PadMode::Push, true) => match self.start_task(element) {
                Ok(()) => true,
                Err(err) => {
                    warn!(element = %element.name(), error = %err, "could not start queue task");
                    false
                }
            },
            (PadMode::Push, false) => {
                self.stop_task();
                true
            }
            (_, active) => !active,
        }
    }

    fn chain(&self, element: &Element, _pad: &Pad, buffer: Buffer) -> FlowResult {
        if let Some(err) = self.src_result() {
            trace!(element = %element.name(), flow = %err, "refusing buffer");
            return Err(err);
        }
        match self.enqueue_buffer(buffer) {
            Ok(()) => {
                self.pushed.fetch_add(1, Ordering::Relaxed);
                Ok(FlowSuccess::Ok)
            }
            Err(err) => Err(self.src_result().unwrap_or(err)),
        }
    }

    fn sink_event(&self, element: &Element, _pad: &Pad, event: Event) -> bool {
        let Some(src) = self.src.get() else {
            return false;
        };
        match event.view() {
            EventView::FlushStart => {
                // The sink pad has already set the queue flushing.
                let forwarded = src.push_event(event);
                self.pause_task();
                forwarded
            }
            EventView::FlushStop { .. } => {
                // The sink pad has already emptied the queue.
                self.set_src_result(None);
                let forwarded = src.push_event(event);
                if src.is_active() {
                    self.restart_task();
                }
                forwarded
            }
            _ if event.is_serialized() => {
                if self.src_result().is_some_and(|err| err != FlowError::Eos) {
                    debug!(element = %element.name(), event = %event.event_type(), "streaming stopped, event dropped");
                    return false;
                }
                self.queue.push(QueuedItem::Event(event)).is_ok()
            }
            _ => src.push_event(event),
        }
    }

    fn set_property(&self, _element: &Element, name: &str, value: &PropertyValue) -> Result<()> {
        let mut config = self.config();
        match name {
            "max-size-buffers" => config.max_size_buffers = value.expect_u64(name)? as usize,
            "max-size-bytes" => config.max_size_bytes = value.expect_u64(name)? as usize,
            "max-size-time" => config.max_size_time = ClockTime::from_nanos(value.expect_u64(name)?),
            "leaky" => {
                config.leaky = LeakyMode::parse(value).ok_or_else(|| Error::InvalidProperty {
                    name: name.to_string(),
                    reason: format!("unknown leaky mode '{}'", value.as_string()),
                })?;
            }
            _ => return Err(unknown_property(name)),
        }
        self.set_config(config);
        Ok(())
    }

    fn property(&self, name: &str) -> Option<PropertyValue> {
        let config = self.config();
        let level = self.queue.level();
        let value = match name {
            "max-size-buffers" => PropertyValue::Integer(config.max_size_buffers as i64),
            "max-size-bytes" => PropertyValue::Integer(config.max_size_bytes as i64),
            "max-size-time" => PropertyValue::Integer(config.max_size_time.nanos() as i64),
            "leaky" => PropertyValue::String(config.leaky.name().to_string()),
            "current-level-buffers" => PropertyValue::Integer(level.items as i64),
            "current-level-bytes" => PropertyValue::Integer(level.bytes as i64),
            "current-level-time" => PropertyValue::Integer(level.time.nanos() as i64),
            _ => return None,
        };
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Condvar;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Downstream peer that records buffers and can be held closed.
    #[derive(Default)]
    struct Gate {
        open: Mutex<bool>,
        cond: Condvar,
        received: Mutex<Vec<u8>>,
        events: Mutex<Vec<EventType>>,
    }

    impl Gate {
        fn set_open(&self, open: bool) {
            *self.open.lock().unwrap() = open;
            self.cond.notify_all();
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    struct Harness {
        queue: Arc<Element>,
        upstream: Arc<Pad>,
        downstream: Arc<Pad>,
        gate: Arc<Gate>,
    }

    impl Harness {
        fn new(config: QueueConfig) -> Self {
            let queue = Element::new("queue", Queue::new(config)).unwrap();
            let upstream = Pad::new("up", PadDirection::Src);
            let downstream = Pad::new("down", PadDirection::Sink);
            let gate = Arc::new(Gate::default());
            gate.set_open(true);

            let g = gate.clone();
            downstream.set_chain_function(move |_, buffer| {
                let mut open = g.open.lock().unwrap();
                while !*open {
                    open = g.cond.wait(open).unwrap();
                }
                g.received.lock().unwrap().push(buffer.map_readable()[0]);
                Ok(FlowSuccess::Ok)
            });
            let g = gate.clone();
            downstream.set_event_function(move |_, event| {
                g.events.lock().unwrap().push(event.event_type());
                if event.event_type() == EventType::FlushStart {
                    g.set_open(true);
                }
                true
            });

            upstream.link(&queue.static_pad("sink").unwrap()).unwrap();
            queue.static_pad("src").unwrap().link(&downstream).unwrap();
            assert!(downstream.set_active(true));
            for pad in queue.pads() {
                assert!(pad.set_active(true));
            }
            assert!(upstream.set_active(true));
            Harness {
                queue,
                upstream,
                downstream,
                gate,
            }
        }

        fn imp(&self) -> &Queue {
            self.queue.imp::<Queue>().unwrap()
        }

        fn received(&self) -> Vec<u8> {
            self.gate.received.lock().unwrap().clone()
        }

        fn shutdown(&self) {
            self.gate.set_open(true);
            for pad in self.queue.pads() {
                pad.set_active(false);
            }
        }
    }

    #[test]
    fn test_buffers_cross_thread_in_order() {
        let h = Harness::new(QueueConfig::default());
        for i in 0..10u8 {
            assert_eq!(h.upstream.push(Buffer::from_slice(&[i])), Ok(FlowSuccess::Ok));
        }
        assert!(h.upstream.push_event(Event::eos()));
        assert!(wait_for(|| h.gate.events.lock().unwrap().contains(&EventType::Eos)));
        assert_eq!(h.received(), (0..10).collect::<Vec<u8>>());
        assert_eq!(h.imp().stats().total_popped, 10);
        // Further data after EOS is refused.
        assert_eq!(h.upstream.push(Buffer::from_slice(&[0])), Err(FlowError::Eos));
        h.shutdown();
    }

    #[test]
    fn test_full_queue_blocks_upstream() {
        let h = Harness::new(QueueConfig::default().with_max_size_buffers(2));
        h.gate.set_open(false);

        let upstream = h.upstream.clone();
        let pusher = thread::spawn(move || {
            for i in 0..5u8 {
                upstream.push(Buffer::from_slice(&[i])).unwrap();
            }
        });
        // One buffer held by the closed gate, two queued, one pusher blocked.
        assert!(wait_for(|| h.imp().current_level_buffers() == 2));
        thread::sleep(Duration::from_millis(20));
        assert!(!pusher.is_finished());

        h.gate.set_open(true);
        pusher.join().unwrap();
        assert!(wait_for(|| h.received().len() == 5));
        h.shutdown();
    }

    #[test]
    fn test_leaky_upstream_drops_new_buffers() {
        let h = Harness::new(
            QueueConfig::default()
                .with_max_size_buffers(2)
                .with_leaky(LeakyMode::Upstream),
        );
        h.gate.set_open(false);
        h.upstream.push(Buffer::from_slice(&[0])).unwrap();
        assert!(wait_for(|| h.imp().current_level_buffers() == 0));
        for i in 1..6u8 {
            assert_eq!(h.upstream.push(Buffer::from_slice(&[i])), Ok(FlowSuccess::Ok));
        }
        assert_eq!(h.imp().stats().total_dropped, 3);

        h.gate.set_open(true);
        assert!(wait_for(|| h.received().len() == 3));
        assert_eq!(h.received(), [0, 1, 2]);
        h.shutdown();
    }

    #[test]
    fn test_flush_unblocks_and_restarts() {
        let h = Harness::new(QueueConfig::default());
        h.gate.set_open(false);
        for i in 0..3u8 {
            h.upstream.push(Buffer::from_slice(&[i])).unwrap();
        }
        assert!(h.upstream.push_event(Event::flush_start()));
        assert_eq!(h.upstream.push(Buffer::from_slice(&[9])), Err(FlowError::Flushing));
        assert!(h.upstream.push_event(Event::flush_stop(true)));
        assert_eq!(h.imp().current_level_buffers(), 0);

        h.upstream.push(Buffer::from_slice(&[7])).unwrap();
        assert!(wait_for(|| h.received().last() == Some(&7)));
        assert!(h.gate.events.lock().unwrap().contains(&EventType::FlushStop));
        h.shutdown();
    }

    #[test]
    fn test_properties() {
        let queue = Element::new("q", Queue::default()).unwrap();
        queue.set_property("max-size-buffers", 5).unwrap();
        queue.set_property("leaky", "downstream").unwrap();
        assert_eq!(queue.property("max-size-buffers"), Some(PropertyValue::Integer(5)));
        assert_eq!(queue.property("leaky"), Some(PropertyValue::String("downstream".into())));
        assert_eq!(queue.property("current-level-buffers"), Some(PropertyValue::Integer(0)));
        assert!(queue.set_property("leaky", "sideways").is_err());
        assert_eq!(queue.imp::<Queue>().unwrap().config().leaky, LeakyMode::Downstream);
    }

    #[test]
    fn test_unlinked_src_reports_not_linked() {
        let queue = Element::new("q", Queue::default()).unwrap();
        let upstream = Pad::new("up", PadDirection::Src);
        upstream.link(&queue.static_pad("sink").unwrap()).unwrap();
        for pad in queue.pads() {
            assert!(pad.set_active(true));
        }
        assert!(upstream.set_active(true));

        upstream.push(Buffer::new(1)).unwrap();
        assert!(wait_for(|| upstream.push(Buffer::new(1)) == Err(FlowError::NotLinked)));
        for pad in queue.pads() {
            pad.set_active(false);
        }
    }
}
