//! Streaming threads.
//!
//! A [`Task`] owns one OS thread that repeatedly calls a closure while the
//! task is started. Sources and queues drive their source pads from a task;
//! the pad stream lock, not the task, serializes the data flow.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::error::Result;

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskState {
    /// Not running; the thread exits.
    #[default]
    Stopped,
    /// The closure runs in a loop.
    Started,
    /// The thread waits for `start` or `stop`.
    Paused,
}

type TaskFn = Box<dyn FnMut() -> ControlFlow<()> + Send>;

struct TaskInner {
    name: String,
    state: Mutex<TaskState>,
    cond: Condvar,
    func: Mutex<TaskFn>,
}

impl TaskInner {
    fn lock_state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self) {
        trace!(task = %self.name, "thread started");
        loop {
            {
                let mut state = self.lock_state();
                while *state == TaskState::Paused {
                    state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
                if *state == TaskState::Stopped {
                    break;
                }
            }

            let flow = {
                let mut func = self.func.lock().unwrap_or_else(PoisonError::into_inner);
                // Paused while waiting for the closure.
                if *self.lock_state() != TaskState::Started {
                    continue;
                }
                func()
            };

            if flow.is_break() {
                let mut state = self.lock_state();
                if *state == TaskState::Started {
                    debug!(task = %self.name, "task paused itself");
                    *state = TaskState::Paused;
                    self.cond.notify_all();
                }
            }
        }
        trace!(task = %self.name, "thread exiting");
    }
}

/// A restartable loop running on a dedicated thread.
///
/// The closure returns [`ControlFlow::Break`] to pause the task (for
/// example after pushing EOS, or when a push returned a fatal flow).
pub struct Task {
    inner: Arc<TaskInner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Task {
    /// Create a stopped task.
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        Self {
            inner: Arc::new(TaskInner {
                name: name.into(),
                state: Mutex::new(TaskState::Stopped),
                cond: Condvar::new(),
                func: Mutex::new(Box::new(func)),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Task name, also used for the thread.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        *self.inner.lock_state()
    }

    /// Start looping, spawning the thread if needed.
    pub fn start(&self) -> Result<()> {
        self.set_state(TaskState::Started)
    }

    /// Stop looping after the current iteration; the thread stays alive.
    pub fn pause(&self) -> Result<()> {
        self.set_state(TaskState::Paused)
    }

    /// Pause, then wait until a running iteration has returned.
    ///
    /// A restart after this call cannot be undone by a stale
    /// [`ControlFlow::Break`] from the interrupted iteration. The caller
    /// must first unblock whatever the iteration waits on. From the task's
    /// own thread this only pauses.
    pub fn pause_and_wait(&self) -> Result<()> {
        self.pause()?;
        if !self.is_current_thread() {
            drop(self.inner.func.lock().unwrap_or_else(PoisonError::into_inner));
        }
        Ok(())
    }

    fn is_current_thread(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id())
    }

    /// Ask the thread to exit after the current iteration.
    pub fn stop(&self) {
        let mut state = self.inner.lock_state();
        *state = TaskState::Stopped;
        self.inner.cond.notify_all();
    }

    fn set_state(&self, target: TaskState) -> Result<()> {
        let mut thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut state = self.inner.lock_state();
            *state = target;
            self.inner.cond.notify_all();
        }
        let needs_thread = thread.as_ref().is_none_or(|handle| handle.is_finished());
        if needs_thread {
            if let Some(old) = thread.take() {
                let _ = old.join();
            }
            let inner = self.inner.clone();
            let handle = thread::Builder::new()
                .name(self.inner.name.clone())
                .spawn(move || inner.run())?;
            debug!(task = %self.inner.name, state = ?target, "thread spawned");
            *thread = Some(handle);
        }
        Ok(())
    }

    /// Stop and wait for the thread to exit.
    ///
    /// Returns false when called from the task's own thread, which cannot
    /// join itself; the task is still stopped.
    pub fn join(&self) -> bool {
        self.stop();
        let handle = {
            let mut thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
            match thread.as_ref() {
                Some(handle) if handle.thread().id() == thread::current().id() => {
                    warn!(task = %self.inner.name, "cannot join a task from its own thread");
                    return false;
                }
                _ => thread.take(),
            }
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(task = %self.inner.name, "task thread panicked");
            }
        }
        true
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.join();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

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

    #[test]
    fn test_break_pauses_task() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let task = Task::new("counter", move || {
            if c.fetch_add(1, Ordering::SeqCst) + 1 == 5 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(task.state(), TaskState::Stopped);
        task.start().unwrap();
        assert!(wait_for(|| task.state() == TaskState::Paused));
        assert_eq!(count.load(Ordering::SeqCst), 5);

        task.start().unwrap();
        assert!(wait_for(|| count.load(Ordering::SeqCst) > 5));
        assert!(task.join());
        assert_eq!(task.state(), TaskState::Stopped);
    }

    #[test]
    fn test_restart_after_join() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let task = Task::new("restart", move || {
            c.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
            ControlFlow::Continue(())
        });
        task.start().unwrap();
        assert!(wait_for(|| count.load(Ordering::SeqCst) > 0));
        assert!(task.join());
        let stopped_at = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);

        task.start().unwrap();
        assert!(wait_for(|| count.load(Ordering::SeqCst) > stopped_at));
    }

    #[test]
    fn test_pause_and_wait_outlasts_iteration() {
        let running = Arc::new(AtomicUsize::new(0));
        let r = running.clone();
        let task = Task::new("slow", move || {
            r.store(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(30));
            r.store(0, Ordering::SeqCst);
            ControlFlow::Break(())
        });
        task.start().unwrap();
        assert!(wait_for(|| running.load(Ordering::SeqCst) == 1));
        task.pause_and_wait().unwrap();
        assert_eq!(running.load(Ordering::SeqCst), 0);
        assert_eq!(task.state(), TaskState::Paused);

        // The stale break from the first iteration must not pause the restart.
        task.start().unwrap();
        assert!(wait_for(|| running.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_pause_spawns_idle_thread() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let task = Task::new("idle", move || {
            c.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Break(())
        });
        task.pause().unwrap();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        task.start().unwrap();
        assert!(wait_for(|| count.load(Ordering::SeqCst) == 1));
    }
}
