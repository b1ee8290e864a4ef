//! The message bus: a thread-safe FIFO from elements to the application.
//!
//! [`Bus::post`] never blocks (unless a sync handler explicitly asks for
//! it) and can be called from any streaming thread. Consumers pick one
//! discipline per bus:
//!
//! - **Polling**: [`Bus::pop`], [`Bus::timed_pop`], [`Bus::timed_pop_filtered`]
//!   and [`Bus::poll`] hand out exactly one message per call, in FIFO order.
//! - **Watch**: a single callback installed with [`Bus::add_watch`] and run by
//!   the application's own loop through [`Bus::dispatch_pending`].
//! - **Async**: [`Bus::stream`] returns a [`futures::Stream`] for tokio loops.
//!
//! A sync handler runs on the posting thread before the message is queued
//! and can drop it or make the poster wait until it is consumed.
//!
//! ```rust
//! use std::time::Duration;
//! use padline::bus::Bus;
//! use padline::message::{Message, MessageType};
//!
//! let bus = Bus::new();
//! bus.post(Message::eos(None));
//! let msg = bus.timed_pop_filtered(Some(Duration::from_millis(10)), MessageType::EOS);
//! assert!(msg.is_some());
//! assert!(!bus.have_pending());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use futures::Stream;
use tracing::{debug, trace};

use crate::error::BusError;
use crate::message::{Message, MessageType};

/// Reply of a sync handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusSyncReply {
    /// Queue the message normally.
    Pass,
    /// Discard the message.
    Drop,
    /// Queue the message and block the poster until a consumer takes it.
    Async,
}

/// Configuration of a [`Bus`].
#[derive(Debug, Clone, Default)]
pub struct BusConfig {
    /// Start in flushing mode, dropping every posted message.
    pub flushing: bool,
    /// Upper bound on queued messages; the oldest is dropped past it.
    pub max_queued: Option<usize>,
}

impl BusConfig {
    /// Start flushing.
    pub fn with_flushing(mut self, flushing: bool) -> Self {
        self.flushing = flushing;
        self
    }

    /// Bound the queue.
    pub fn with_max_queued(mut self, max: usize) -> Self {
        self.max_queued = Some(max);
        self
    }
}

type SyncHandler = Arc<dyn Fn(&Bus, &Message) -> BusSyncReply + Send + Sync>;
type Watch = Arc<Mutex<dyn FnMut(&Bus, &Message) -> ControlFlow<()> + Send>>;

struct BusState {
    queue: VecDeque<Message>,
    flushing: bool,
    wakers: Vec<Waker>,
}

struct BusInner {
    state: Mutex<BusState>,
    available: Condvar,
    consumed: Condvar,
    sync_handler: RwLock<Option<SyncHandler>>,
    watch: Mutex<Option<Watch>>,
    config: BusConfig,
}

/// Shared handle to a message bus.
#[derive(Clone)]
pub struct Bus(Arc<BusInner>);

impl Bus {
    /// Bus with default configuration.
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    /// Bus with explicit configuration.
    pub fn with_config(config: BusConfig) -> Self {
        Self(Arc::new(BusInner {
            state: Mutex::new(BusState {
                queue: VecDeque::new(),
                flushing: config.flushing,
                wakers: Vec::new(),
            }),
            available: Condvar::new(),
            consumed: Condvar::new(),
            sync_handler: RwLock::new(None),
            watch: Mutex::new(None),
            config,
        }))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Post a message. Returns false if it was dropped (flushing bus or
    /// sync handler).
    pub fn post(&self, message: Message) -> bool {
        let handler = self
            .0
            .sync_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let reply = match handler {
            Some(handler) => handler(self, &message),
            None => BusSyncReply::Pass,
        };
        if reply == BusSyncReply::Drop {
            trace!(message = ?message.message_type(), "sync handler dropped message");
            return false;
        }

        let mut state = self.lock();
        if state.flushing {
            trace!(message = ?message.message_type(), "bus flushing, message dropped");
            return false;
        }
        trace!(
            message = ?message.message_type(),
            src = message.src_name().unwrap_or("-"),
            seqnum = message.seqnum(),
            "posting message"
        );
        let waiting = (reply == BusSyncReply::Async).then(|| message.clone());
        state.queue.push_back(message);
        if let Some(max) = self.0.config.max_queued {
            while state.queue.len() > max {
                state.queue.pop_front();
            }
        }
        for waker in state.wakers.drain(..) {
            waker.wake();
        }
        self.0.available.notify_all();

        if let Some(waiting) = waiting {
            while !state.flushing && state.queue.iter().any(|m| m.ptr_eq(&waiting)) {
                state = self
                    .0
                    .consumed
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        true
    }

    /// Take the oldest message without blocking.
    pub fn pop(&self) -> Option<Message> {
        self.timed_pop_filtered(Some(Duration::ZERO), MessageType::ANY)
    }

    /// Take the oldest message, waiting up to `timeout` (`None` waits
    /// forever).
    pub fn timed_pop(&self, timeout: Option<Duration>) -> Option<Message> {
        self.timed_pop_filtered(timeout, MessageType::ANY)
    }

    /// Take the oldest message matching `types`, waiting up to `timeout`.
    ///
    /// Messages not matching `types` that are ahead of the match are
    /// discarded.
    pub fn timed_pop_filtered(&self, timeout: Option<Duration>, types: MessageType) -> Option<Message> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        loop {
            while let Some(message) = state.queue.pop_front() {
                self.0.consumed.notify_all();
                if types.intersects(message.message_type()) {
                    return Some(message);
                }
                trace!(message = ?message.message_type(), "discarding unmatched message");
            }
            if state.flushing {
                return None;
            }
            state = match deadline {
                None => self
                    .0
                    .available
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.0
                        .available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Same as [`timed_pop_filtered`](Self::timed_pop_filtered) with the
    /// arguments in mask-first order.
    pub fn poll(&self, types: MessageType, timeout: Option<Duration>) -> Option<Message> {
        self.timed_pop_filtered(timeout, types)
    }

    /// Oldest message, left on the queue.
    pub fn peek(&self) -> Option<Message> {
        self.lock().queue.front().cloned()
    }

    /// True if messages are queued.
    pub fn have_pending(&self) -> bool {
        !self.lock().queue.is_empty()
    }

    /// Number of queued messages.
    pub fn n_pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Enter or leave flushing. Entering drops every queued message and
    /// wakes blocked pollers and posters.
    pub fn set_flushing(&self, flushing: bool) {
        let mut state = self.lock();
        state.flushing = flushing;
        if flushing {
            let dropped = state.queue.len();
            state.queue.clear();
            debug!(dropped, "bus flushing");
            for waker in state.wakers.drain(..) {
                waker.wake();
            }
            self.0.available.notify_all();
            self.0.consumed.notify_all();
        }
    }

    /// True while flushing.
    pub fn is_flushing(&self) -> bool {
        self.lock().flushing
    }

    /// Install the sync handler, replacing any previous one.
    pub fn set_sync_handler<F>(&self, handler: F)
    where
        F: Fn(&Bus, &Message) -> BusSyncReply + Send + Sync + 'static,
    {
        *self
            .0
            .sync_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    /// Remove the sync handler.
    pub fn unset_sync_handler(&self) {
        *self
            .0
            .sync_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Install the watch callback. A bus has at most one.
    ///
    /// Returning `ControlFlow::Break` from the callback removes it.
    pub fn add_watch<F>(&self, watch: F) -> Result<(), BusError>
    where
        F: FnMut(&Bus, &Message) -> ControlFlow<()> + Send + 'static,
    {
        let mut slot = self.0.watch.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(BusError::WatchExists);
        }
        *slot = Some(Arc::new(Mutex::new(watch)));
        Ok(())
    }

    /// Remove the watch callback. Returns false if none was installed.
    pub fn remove_watch(&self) -> bool {
        self.0
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    /// Run the watch on every queued message. Returns how many messages
    /// were dispatched.
    ///
    /// Meant to be called from the application's event loop. The callback
    /// may add or remove watches on this bus; dispatching stops as soon as
    /// it is no longer the installed watch.
    pub fn dispatch_pending(&self) -> usize {
        let Some(watch) = self.installed_watch() else {
            return 0;
        };
        let mut dispatched = 0;
        while let Some(message) = self.pop() {
            dispatched += 1;
            let flow = {
                let mut callback = watch.lock().unwrap_or_else(PoisonError::into_inner);
                (&mut *callback)(self, &message)
            };
            let mut slot = self.0.watch.lock().unwrap_or_else(PoisonError::into_inner);
            let current = slot.as_ref().is_some_and(|w| Arc::ptr_eq(w, &watch));
            if !current {
                trace!("watch replaced during dispatch");
                break;
            }
            if flow.is_break() {
                *slot = None;
                break;
            }
        }
        dispatched
    }

    fn installed_watch(&self) -> Option<Watch> {
        self.0
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Async stream of messages.
    pub fn stream(&self) -> BusStream {
        BusStream { bus: self.clone() }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Bus")
            .field("pending", &state.queue.len())
            .field("flushing", &state.flushing)
            .finish()
    }
}

/// [`Stream`] of bus messages, see [`Bus::stream`].
///
/// The stream ends when the bus is set flushing.
pub struct BusStream {
    bus: Bus,
}

impl Stream for BusStream {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        let mut state = self.bus.lock();
        if let Some(message) = state.queue.pop_front() {
            self.bus.0.consumed.notify_all();
            return Poll::Ready(Some(message));
        }
        if state.flushing {
            return Poll::Ready(None);
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ErrorKind, StreamError};
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let bus = Bus::new();
        let first = Message::eos(None);
        let second = Message::error(None, ErrorKind::Stream(StreamError::Failed), "x");
        bus.post(first.clone());
        bus.post(second.clone());
        assert!(bus.peek().unwrap().ptr_eq(&first));
        assert!(bus.pop().unwrap().ptr_eq(&first));
        assert!(bus.pop().unwrap().ptr_eq(&second));
        assert!(bus.pop().is_none());
    }

    #[test]
    fn test_timed_pop_times_out() {
        let bus = Bus::new();
        let start = Instant::now();
        assert!(bus.timed_pop(Some(Duration::from_millis(20))).is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_filtered_pop_discards_unmatched() {
        let bus = Bus::new();
        bus.post(Message::application(None, crate::caps::Structure::new("app")));
        bus.post(Message::eos(None));
        let msg = bus.poll(MessageType::EOS, Some(Duration::ZERO)).unwrap();
        assert_eq!(msg.message_type(), MessageType::EOS);
        assert!(!bus.have_pending());
    }

    #[test]
    fn test_blocking_pop_wakes_on_post() {
        let bus = Bus::new();
        let poster = bus.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            poster.post(Message::eos(None));
        });
        let msg = bus.timed_pop(Some(Duration::from_secs(5)));
        assert!(msg.is_some());
        handle.join().unwrap();
    }

    #[test]
    fn test_flushing_drops_messages() {
        let bus = Bus::with_config(BusConfig::default().with_flushing(true));
        assert!(!bus.post(Message::eos(None)));
        assert!(!bus.have_pending());
        bus.set_flushing(false);
        assert!(bus.post(Message::eos(None)));
        bus.set_flushing(true);
        assert_eq!(bus.n_pending(), 0);
    }

    #[test]
    fn test_sync_handler_drop() {
        let bus = Bus::new();
        bus.set_sync_handler(|_, msg| {
            if msg.message_type() == MessageType::EOS {
                BusSyncReply::Drop
            } else {
                BusSyncReply::Pass
            }
        });
        assert!(!bus.post(Message::eos(None)));
        assert!(bus.post(Message::application(None, crate::caps::Structure::new("app"))));
        assert_eq!(bus.n_pending(), 1);
        bus.unset_sync_handler();
        assert!(bus.post(Message::eos(None)));
    }

    #[test]
    fn test_sync_handler_async_waits_for_consumer() {
        let bus = Bus::new();
        bus.set_sync_handler(|_, _| BusSyncReply::Async);
        let poster = bus.clone();
        let handle = thread::spawn(move || poster.post(Message::eos(None)));
        let msg = bus.timed_pop(Some(Duration::from_secs(5)));
        assert!(msg.is_some());
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_watch_dispatch() {
        let bus = Bus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        bus.add_watch(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        })
        .unwrap();
        assert_eq!(bus.add_watch(|_, _| ControlFlow::Continue(())), Err(BusError::WatchExists));

        bus.post(Message::eos(None));
        bus.post(Message::eos(None));
        assert_eq!(bus.dispatch_pending(), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert!(bus.remove_watch());
        assert!(!bus.remove_watch());
    }

    #[test]
    fn test_watch_break_removes_watch() {
        let bus = Bus::new();
        bus.add_watch(|_, _| ControlFlow::Break(())).unwrap();
        bus.post(Message::eos(None));
        bus.post(Message::eos(None));
        assert_eq!(bus.dispatch_pending(), 1);
        assert_eq!(bus.n_pending(), 1);
        assert_eq!(bus.dispatch_pending(), 0);
    }

    #[test]
    fn test_watch_can_replace_itself() {
        let bus = Bus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        bus.add_watch(move |bus, _| {
            assert!(bus.remove_watch());
            let counter = counter.clone();
            bus.add_watch(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                ControlFlow::Continue(())
            })
            .unwrap();
            ControlFlow::Break(())
        })
        .unwrap();

        bus.post(Message::eos(None));
        bus.post(Message::eos(None));
        assert_eq!(bus.dispatch_pending(), 1);
        assert_eq!(bus.n_pending(), 1);
        assert_eq!(bus.dispatch_pending(), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(bus.remove_watch());
    }

    #[test]
    fn test_watch_removed_from_callback() {
        let bus = Bus::new();
        bus.add_watch(|bus, _| {
            bus.remove_watch();
            ControlFlow::Continue(())
        })
        .unwrap();
        bus.post(Message::eos(None));
        bus.post(Message::eos(None));
        assert_eq!(bus.dispatch_pending(), 1);
        assert_eq!(bus.dispatch_pending(), 0);
        assert_eq!(bus.n_pending(), 1);
    }

    #[test]
    fn test_stream_registers_one_waker_per_task() {
        let bus = Bus::new();
        let mut stream = bus.stream();
        let mut cx = Context::from_waker(futures::task::noop_waker_ref());
        for _ in 0..5 {
            assert!(stream.poll_next_unpin(&mut cx).is_pending());
        }
        assert_eq!(bus.lock().wakers.len(), 1);

        bus.post(Message::eos(None));
        assert!(stream.poll_next_unpin(&mut cx).is_ready());
    }

    #[tokio::test]
    async fn test_stream_yields_messages() {
        let bus = Bus::new();
        let mut stream = bus.stream();
        let poster = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            poster.post(Message::eos(None));
        });
        let msg = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.message_type(), MessageType::EOS);

        bus.set_flushing(true);
        assert!(stream.next().await.is_none());
    }
}
