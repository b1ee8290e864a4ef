//! Bounded blocking queue for thread boundaries.
//!
//! [`DataQueue`] is the hand-over point between a streaming thread pushing
//! into an element and the element's own task pushing out of it. Both sides
//! block; setting the queue flushing wakes them and makes every call return
//! [`FlowError::Flushing`] until flushing is cleared. The queue implements
//! [`FlushTarget`], so registering it on a pad makes FLUSH-START and pad
//! deactivation unblock it.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::buffer::Buffer;
use crate::clock::ClockTime;
use crate::event::Event;
use crate::flow::{FlowError, FlushTarget};

/// Accounting information for a queued item.
pub trait QueueItem: Send {
    /// Payload size in bytes.
    fn byte_size(&self) -> usize {
        0
    }

    /// Duration, `NONE` if unknown.
    fn duration(&self) -> ClockTime {
        ClockTime::NONE
    }

    /// Visible items count towards the item limit.
    fn is_visible(&self) -> bool {
        true
    }
}

impl QueueItem for Buffer {
    fn byte_size(&self) -> usize {
        self.size()
    }

    fn duration(&self) -> ClockTime {
        Buffer::duration(self)
    }
}

impl QueueItem for Event {
    fn is_visible(&self) -> bool {
        false
    }
}

/// Fill limits. Zero means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataQueueLimits {
    /// Maximum number of visible items.
    pub max_items: usize,
    /// Maximum queued bytes.
    pub max_bytes: usize,
    /// Maximum queued duration.
    pub max_time: ClockTime,
}

impl DataQueueLimits {
    /// Limit the number of visible items.
    pub fn with_max_items(mut self, max: usize) -> Self {
        self.max_items = max;
        self
    }

    /// Limit the queued bytes.
    pub fn with_max_bytes(mut self, max: usize) -> Self {
        self.max_bytes = max;
        self
    }

    /// Limit the queued duration.
    pub fn with_max_time(mut self, max: ClockTime) -> Self {
        self.max_time = max;
        self
    }
}

/// Current fill level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataQueueLevel {
    /// Visible items.
    pub items: usize,
    /// Bytes.
    pub bytes: usize,
    /// Summed durations of items with a known duration.
    pub time: ClockTime,
}

impl DataQueueLevel {
    fn add<T: QueueItem>(&mut self, item: &T) {
        if item.is_visible() {
            self.items += 1;
        }
        self.bytes += item.byte_size();
        let duration = item.duration();
        if !duration.is_none() {
            self.time = self.time.saturating_add(duration);
        }
    }

    fn sub<T: QueueItem>(&mut self, item: &T) {
        if item.is_visible() {
            self.items = self.items.saturating_sub(1);
        }
        self.bytes = self.bytes.saturating_sub(item.byte_size());
        let duration = item.duration();
        if !duration.is_none() {
            self.time = self.time.saturating_sub(duration);
        }
    }

    fn exceeds(&self, limits: &DataQueueLimits) -> bool {
        (limits.max_items > 0 && self.items >= limits.max_items)
            || (limits.max_bytes > 0 && self.bytes >= limits.max_bytes)
            || (limits.max_time > ClockTime::ZERO && !limits.max_time.is_none() && self.time >= limits.max_time)
    }
}

struct QueueState<T> {
    items: VecDeque<T>,
    level: DataQueueLevel,
    limits: DataQueueLimits,
    flushing: bool,
}

impl<T: QueueItem> QueueState<T> {
    // An empty queue is never full, so a single oversized item always fits.
    fn is_full(&self) -> bool {
        !self.items.is_empty() && self.level.exceeds(&self.limits)
    }

    fn push_back(&mut self, item: T) {
        self.level.add(&item);
        self.items.push_back(item);
    }

    fn pop_front(&mut self) -> Option<T> {
        let item = self.items.pop_front()?;
        self.level.sub(&item);
        Some(item)
    }
}

/// Bounded, flush-cancellable blocking FIFO.
pub struct DataQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T: QueueItem> DataQueue<T> {
    /// Create an empty queue.
    pub fn new(limits: DataQueueLimits) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                level: DataQueueLevel::default(),
                limits,
                flushing: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item, blocking while the queue is full.
    ///
    /// The item is dropped and `Flushing` returned if the queue is or becomes
    /// flushing.
    pub fn push(&self, item: T) -> Result<(), FlowError> {
        let mut state = self.lock();
        while state.is_full() && !state.flushing {
            state = self.not_full.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        if state.flushing {
            return Err(FlowError::Flushing);
        }
        state.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Append without blocking. Returns the item back when the queue is
    /// full or flushing.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut state = self.lock();
        if state.flushing || state.is_full() {
            return Err(item);
        }
        state.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Append, discarding the oldest items while full. Returns how many
    /// items were discarded.
    pub fn push_dropping_oldest(&self, item: T) -> Result<usize, FlowError> {
        let mut state = self.lock();
        if state.flushing {
            return Err(FlowError::Flushing);
        }
        let mut dropped = 0;
        while state.is_full() {
            if state.pop_front().is_none() {
                break;
            }
            dropped += 1;
        }
        state.push_back(item);
        self.not_empty.notify_one();
        if dropped > 0 {
            trace!(dropped, "leaky queue dropped old items");
        }
        Ok(dropped)
    }

    /// Remove the oldest item, blocking while the queue is empty.
    pub fn pop(&self) -> Result<T, FlowError> {
        let mut state = self.lock();
        loop {
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            if let Some(item) = state.pop_front() {
                self.not_full.notify_one();
                return Ok(item);
            }
            state = self.not_empty.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Remove the oldest item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.lock();
        if state.flushing {
            return None;
        }
        let item = state.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Enter or leave flushing. Entering wakes every blocked caller.
    pub fn set_flushing(&self, flushing: bool) {
        let mut state = self.lock();
        state.flushing = flushing;
        if flushing {
            self.not_empty.notify_all();
            self.not_full.notify_all();
        }
    }

    /// True while flushing.
    pub fn is_flushing(&self) -> bool {
        self.lock().flushing
    }

    /// Drop every queued item.
    pub fn flush(&self) {
        let mut state = self.lock();
        let dropped = state.items.len();
        state.items.clear();
        state.level = DataQueueLevel::default();
        self.not_full.notify_all();
        trace!(dropped, "queue flushed");
    }

    /// Replace the limits. Waiting pushers re-check against them.
    pub fn set_limits(&self, limits: DataQueueLimits) {
        self.lock().limits = limits;
        self.not_full.notify_all();
    }

    /// Current limits.
    pub fn limits(&self) -> DataQueueLimits {
        self.lock().limits
    }

    /// Current fill level.
    pub fn level(&self) -> DataQueueLevel {
        self.lock().level
    }

    /// Number of queued items, visible or not.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// True if a push would block.
    pub fn is_full(&self) -> bool {
        self.lock().is_full()
    }
}

impl<T: QueueItem> FlushTarget for DataQueue<T> {
    fn flush_start(&self) {
        self.set_flushing(true);
    }

    fn flush_stop(&self) {
        self.flush();
        self.set_flushing(false);
    }
}
