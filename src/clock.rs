//! Clocks and time types for pipeline synchronization.
//!
//! This module provides:
//! - [`ClockTime`]: nanosecond timestamp with a `NONE` sentinel
//! - [`Clock`]: trait for time sources, with [`SystemClock`] and the
//!   settable [`ManualClock`]
//! - [`ClockId`]: a single-shot wait on a clock that another thread can
//!   cancel with [`ClockId::unschedule`]
//! - [`PipelineClock`]: the pipeline's selected clock plus its base time
//!
//! # Running time
//!
//! - **Clock time**: what [`Clock::now`] reports
//! - **Base time**: clock time at which the pipeline went to PLAYING,
//!   minus the running time already accumulated before a pause
//! - **Running time**: clock time minus base time

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::flow::FlushTarget;

// ============================================================================
// ClockTime
// ============================================================================

/// Time in nanoseconds.
///
/// `ClockTime::NONE` marks an unset timestamp (buffers without PTS, a
/// pipeline that never started). Arithmetic with `NONE` yields `NONE`;
/// everything else saturates.
///
/// ```rust
/// use padline::clock::ClockTime;
///
/// let t = ClockTime::from_secs(1) + ClockTime::from_millis(500);
/// assert_eq!(t.millis(), 1500);
/// assert_eq!(t.to_string(), "1.500s");
/// assert!((t + ClockTime::NONE).is_none());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ClockTime(u64);

/// Signed difference between two clock times, in nanoseconds.
pub type ClockTimeDiff = i64;

impl ClockTime {
    /// Zero time.
    pub const ZERO: Self = Self(0);

    /// Largest valid time.
    pub const MAX: Self = Self(u64::MAX - 1);

    /// Unset time.
    pub const NONE: Self = Self(u64::MAX);

    /// One second.
    pub const SECOND: Self = Self(1_000_000_000);

    /// From nanoseconds.
    #[inline]
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// From microseconds.
    #[inline]
    pub const fn from_micros(us: u64) -> Self {
        Self(us.saturating_mul(1_000))
    }

    /// From milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000_000))
    }

    /// From seconds.
    #[inline]
    pub const fn from_secs(s: u64) -> Self {
        Self(s.saturating_mul(1_000_000_000))
    }

    /// Nanoseconds.
    #[inline]
    pub const fn nanos(self) -> u64 {
        self.0
    }

    /// Milliseconds, truncated.
    #[inline]
    pub const fn millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Seconds, truncated.
    #[inline]
    pub const fn secs(self) -> u64 {
        self.0 / 1_000_000_000
    }

    /// True for the `NONE` sentinel.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    /// True for any valid time.
    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != u64::MAX
    }

    /// `None` for the sentinel.
    #[inline]
    pub const fn to_option(self) -> Option<Self> {
        if self.is_none() { None } else { Some(self) }
    }

    /// Saturating addition; `NONE` if either side is `NONE`.
    #[inline]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        let sum = self.0.saturating_add(rhs.0);
        if sum == u64::MAX { Self::MAX } else { Self(sum) }
    }

    /// Saturating subtraction; `NONE` if either side is `NONE`.
    #[inline]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Signed difference `self - other`, or `None` if either is unset.
    #[inline]
    pub fn diff(self, other: Self) -> Option<ClockTimeDiff> {
        if self.is_none() || other.is_none() {
            return None;
        }
        let diff = self.0 as i128 - other.0 as i128;
        Some(diff.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }
}

impl std::ops::Add for ClockTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl std::ops::AddAssign for ClockTime {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl std::ops::Sub for ClockTime {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl From<Duration> for ClockTime {
    #[inline]
    fn from(d: Duration) -> Self {
        Self(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX - 1))
    }
}

impl From<ClockTime> for Duration {
    #[inline]
    fn from(t: ClockTime) -> Self {
        if t.is_none() {
            Duration::ZERO
        } else {
            Duration::from_nanos(t.0)
        }
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            f.write_str("NONE")
        } else {
            write!(f, "{}.{:03}s", self.secs(), self.millis() % 1000)
        }
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Clock capabilities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct ClockFlags(u32);

impl ClockFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Clock can be selected as the pipeline clock.
    pub const CAN_BE_MASTER: Self = Self(1 << 0);
    /// Clock advances only when told to (test clocks).
    pub const MANUAL: Self = Self(1 << 1);
    /// Clock is driven by hardware (audio device).
    pub const HARDWARE: Self = Self(1 << 2);

    /// Check if all bits of `flag` are set.
    #[inline]
    pub const fn contains(self, flag: Self) -> bool {
        (self.0 & flag.0) == flag.0
    }

    /// Bitwise OR.
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// A monotonic time source.
pub trait Clock: Send + Sync {
    /// Current time of this clock.
    fn now(&self) -> ClockTime;

    /// Capabilities.
    fn flags(&self) -> ClockFlags {
        ClockFlags::CAN_BE_MASTER
    }

    /// Resolution in nanoseconds, 0 if unknown.
    fn resolution(&self) -> u64 {
        0
    }

    /// Human-readable name.
    fn name(&self) -> &str {
        "clock"
    }
}

/// Monotonic wall clock based on [`Instant`], starting at zero.
pub struct SystemClock {
    epoch: Instant,
    name: String,
}

impl SystemClock {
    /// New clock with the current instant as epoch.
    pub fn new() -> Self {
        Self::with_name("system-clock")
    }

    /// New clock with a custom name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            epoch: Instant::now(),
            name: name.into(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> ClockTime {
        ClockTime::from(self.epoch.elapsed())
    }

    fn resolution(&self) -> u64 {
        1
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A clock that only moves when [`set_time`](Self::set_time) or
/// [`advance`](Self::advance) is called.
#[derive(Default)]
pub struct ManualClock {
    time: AtomicU64,
}

impl ManualClock {
    /// New clock at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to an absolute time. Time never goes backwards.
    pub fn set_time(&self, time: ClockTime) {
        if time.is_some() {
            self.time.fetch_max(time.nanos(), Ordering::AcqRel);
        }
    }

    /// Move forward by `delta`.
    pub fn advance(&self, delta: ClockTime) {
        if delta.is_some() {
            self.time.fetch_add(delta.nanos(), Ordering::AcqRel);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> ClockTime {
        ClockTime::from_nanos(self.time.load(Ordering::Acquire))
    }

    fn flags(&self) -> ClockFlags {
        ClockFlags::CAN_BE_MASTER.union(ClockFlags::MANUAL)
    }

    fn name(&self) -> &str {
        "manual-clock"
    }
}

// ============================================================================
// ClockId
// ============================================================================

/// Outcome of a [`ClockId::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockReturn {
    /// The target time was reached.
    Ok,
    /// The target time had already passed when the wait started.
    Early,
    /// The wait was cancelled.
    Unscheduled,
    /// The target time is `NONE`.
    BadTime,
}

/// Upper bound on a single condvar sleep, so clocks that do not follow
/// wall time (e.g. [`ManualClock`]) are re-read regularly.
const WAIT_SLICE: Duration = Duration::from_millis(5);

struct ClockIdInner {
    clock: Arc<dyn Clock>,
    time: ClockTime,
    unscheduled: Mutex<bool>,
    wakeup: Condvar,
}

/// A single-shot wait for a clock to reach a target time.
///
/// Clones share the same entry: unscheduling one wakes a thread blocked in
/// any clone. Registered as a pad flush target, a FLUSH-START cancels the
/// wait.
#[derive(Clone)]
pub struct ClockId {
    inner: Arc<ClockIdInner>,
}

impl ClockId {
    /// Wait entry for `clock` reaching `time`.
    pub fn new(clock: Arc<dyn Clock>, time: ClockTime) -> Self {
        Self {
            inner: Arc::new(ClockIdInner {
                clock,
                time,
                unscheduled: Mutex::new(false),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// Target time.
    pub fn time(&self) -> ClockTime {
        self.inner.time
    }

    /// Block until the clock reaches the target or the entry is unscheduled.
    ///
    /// The jitter is `now - target` at the moment the wait returned.
    pub fn wait(&self) -> (ClockReturn, ClockTimeDiff) {
        let inner = &*self.inner;
        if inner.time.is_none() {
            return (ClockReturn::BadTime, 0);
        }

        let mut unscheduled = inner.unscheduled.lock().unwrap_or_else(PoisonError::into_inner);
        if *unscheduled {
            return (ClockReturn::Unscheduled, 0);
        }

        let now = inner.clock.now();
        let jitter = now.diff(inner.time).unwrap_or(0);
        if jitter > 0 {
            return (ClockReturn::Early, jitter);
        }

        loop {
            let now = inner.clock.now();
            if now >= inner.time {
                return (ClockReturn::Ok, now.diff(inner.time).unwrap_or(0));
            }
            let remaining = Duration::from(inner.time - now).min(WAIT_SLICE);
            let (guard, _) = inner
                .wakeup
                .wait_timeout(unscheduled, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            unscheduled = guard;
            if *unscheduled {
                tracing::trace!(time = %inner.time, "clock wait unscheduled");
                return (ClockReturn::Unscheduled, 0);
            }
        }
    }

    /// Cancel the wait. Current and future waits return `Unscheduled`.
    pub fn unschedule(&self) {
        let mut unscheduled = self
            .inner
            .unscheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *unscheduled = true;
        self.inner.wakeup.notify_all();
    }

    /// True once [`unschedule`](Self::unschedule) has been called.
    pub fn is_unscheduled(&self) -> bool {
        *self
            .inner
            .unscheduled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl FlushTarget for ClockId {
    fn flush_start(&self) {
        self.unschedule();
    }

    fn flush_stop(&self) {}
}

impl std::fmt::Debug for ClockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockId")
            .field("clock", &self.inner.clock.name())
            .field("time", &self.inner.time)
            .finish()
    }
}

// ============================================================================
// PipelineClock
// ============================================================================

/// The pipeline's selected clock plus its base time.
///
/// `base_time` is `NONE` until [`start`](Self::start) is called. A pipeline
/// going PAUSED→PLAYING calls `start(accumulated_running_time)` so running
/// time resumes where it stopped.
pub struct PipelineClock {
    clock: RwLock<Arc<dyn Clock>>,
    base_time: AtomicU64,
}

impl PipelineClock {
    /// Pipeline clock over `clock`, not started.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock: RwLock::new(clock),
            base_time: AtomicU64::new(u64::MAX),
        }
    }

    /// Pipeline clock over a fresh [`SystemClock`].
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock::new()))
    }

    /// Replace the underlying clock. Resets the base time.
    pub fn set_clock(&self, clock: Arc<dyn Clock>) {
        *self.clock.write().unwrap_or_else(PoisonError::into_inner) = clock;
        self.reset();
    }

    /// The underlying clock.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set the base time so that running time equals `running` now.
    pub fn start(&self, running: ClockTime) {
        let running = if running.is_none() { ClockTime::ZERO } else { running };
        let base = self.clock().now().saturating_sub(running);
        self.base_time.store(base.nanos(), Ordering::Release);
    }

    /// Set an explicit base time.
    pub fn set_base_time(&self, base: ClockTime) {
        self.base_time.store(base.nanos(), Ordering::Release);
    }

    /// Forget the base time.
    pub fn reset(&self) {
        self.base_time.store(u64::MAX, Ordering::Release);
    }

    /// True once a base time is set.
    #[inline]
    pub fn is_started(&self) -> bool {
        self.base_time.load(Ordering::Acquire) != u64::MAX
    }

    /// Base time, `NONE` if not started.
    #[inline]
    pub fn base_time(&self) -> ClockTime {
        ClockTime(self.base_time.load(Ordering::Acquire))
    }

    /// Running time, `NONE` if not started.
    pub fn running_time(&self) -> ClockTime {
        let base = self.base_time();
        if base.is_none() {
            return ClockTime::NONE;
        }
        self.clock().now().saturating_sub(base)
    }

    /// Clock time at which `running` will be reached.
    pub fn to_clock_time(&self, running: ClockTime) -> ClockTime {
        self.base_time().saturating_add(running)
    }

    /// Single-shot wait entry for a running time.
    pub fn new_wait(&self, running: ClockTime) -> ClockId {
        ClockId::new(self.clock(), self.to_clock_time(running))
    }

    /// Sleep until the running time reaches `target`.
    ///
    /// Returns immediately if the clock is not started or the target is
    /// `NONE` or already reached.
    pub async fn wait_until(&self, target: ClockTime) {
        if target.is_none() {
            return;
        }
        loop {
            let now = self.running_time();
            if now.is_none() || now >= target {
                break;
            }
            let wait = Duration::from(target - now).min(Duration::from_millis(10));
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for PipelineClock {
    fn default() -> Self {
        Self::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_clock_time_units() {
        assert_eq!(ClockTime::from_micros(3).nanos(), 3_000);
        assert_eq!(ClockTime::from_millis(2).nanos(), 2_000_000);
        assert_eq!(ClockTime::from_secs(4).millis(), 4_000);
        assert_eq!(ClockTime::SECOND.secs(), 1);
    }

    #[test]
    fn test_clock_time_none_propagates() {
        let t = ClockTime::from_secs(1);
        assert!((t + ClockTime::NONE).is_none());
        assert!((ClockTime::NONE - t).is_none());
        assert_eq!(t.diff(ClockTime::NONE), None);
        assert_eq!(ClockTime::NONE.to_option(), None);
    }

    #[test]
    fn test_clock_time_saturates() {
        assert_eq!(ClockTime::from_millis(1) - ClockTime::from_secs(1), ClockTime::ZERO);
        assert_eq!(ClockTime::MAX + ClockTime::SECOND, ClockTime::MAX);
        assert_eq!(
            ClockTime::from_millis(1).diff(ClockTime::from_millis(3)),
            Some(-2_000_000)
        );
    }

    #[test]
    fn test_clock_time_display() {
        assert_eq!(ClockTime::from_millis(2250).to_string(), "2.250s");
        assert_eq!(ClockTime::ZERO.to_string(), "0.000s");
        assert_eq!(ClockTime::NONE.to_string(), "NONE");
    }

    #[test]
    fn test_manual_clock_never_goes_back() {
        let clock = ManualClock::new();
        clock.set_time(ClockTime::from_secs(2));
        clock.set_time(ClockTime::from_secs(1));
        assert_eq!(clock.now(), ClockTime::from_secs(2));
        clock.advance(ClockTime::from_millis(500));
        assert_eq!(clock.now().millis(), 2_500);
        assert!(clock.flags().contains(ClockFlags::MANUAL));
    }

    #[test]
    fn test_clock_id_early() {
        let clock = Arc::new(ManualClock::new());
        clock.set_time(ClockTime::from_secs(5));
        let id = ClockId::new(clock, ClockTime::from_secs(3));
        let (ret, jitter) = id.wait();
        assert_eq!(ret, ClockReturn::Early);
        assert_eq!(jitter, 2_000_000_000);
    }

    #[test]
    fn test_clock_id_reaches_target() {
        let clock = Arc::new(ManualClock::new());
        let id = ClockId::new(clock.clone(), ClockTime::from_secs(1));

        let waiter = {
            let id = id.clone();
            thread::spawn(move || id.wait())
        };
        thread::sleep(Duration::from_millis(20));
        clock.set_time(ClockTime::from_secs(1));

        let (ret, _) = waiter.join().unwrap();
        assert_eq!(ret, ClockReturn::Ok);
    }

    #[test]
    fn test_clock_id_unschedule_wakes_waiter() {
        let clock = Arc::new(ManualClock::new());
        let id = ClockId::new(clock, ClockTime::from_secs(60));

        let waiter = {
            let id = id.clone();
            thread::spawn(move || id.wait())
        };
        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        FlushTarget::flush_start(&id);

        let (ret, _) = waiter.join().unwrap();
        assert_eq!(ret, ClockReturn::Unscheduled);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(id.wait().0, ClockReturn::Unscheduled);
    }

    #[test]
    fn test_clock_id_bad_time() {
        let id = ClockId::new(Arc::new(SystemClock::new()), ClockTime::NONE);
        assert_eq!(id.wait().0, ClockReturn::BadTime);
    }

    #[test]
    fn test_pipeline_clock_resumes_running_time() {
        let manual = Arc::new(ManualClock::new());
        let clock = PipelineClock::new(manual.clone());
        assert!(clock.running_time().is_none());

        manual.set_time(ClockTime::from_secs(10));
        clock.start(ClockTime::from_secs(3));
        assert_eq!(clock.base_time(), ClockTime::from_secs(7));
        assert_eq!(clock.running_time(), ClockTime::from_secs(3));

        manual.advance(ClockTime::from_secs(1));
        assert_eq!(clock.running_time(), ClockTime::from_secs(4));
        assert_eq!(
            clock.to_clock_time(ClockTime::from_secs(5)),
            ClockTime::from_secs(12)
        );

        clock.reset();
        assert!(!clock.is_started());
    }

    #[tokio::test]
    async fn test_pipeline_clock_wait_until() {
        let clock = PipelineClock::system();
        clock.start(ClockTime::ZERO);
        clock.wait_until(ClockTime::from_millis(20)).await;
        assert!(clock.running_time() >= ClockTime::from_millis(20));
    }

    #[tokio::test]
    async fn test_pipeline_clock_wait_not_started() {
        let clock = PipelineClock::system();
        clock.wait_until(ClockTime::from_secs(100)).await;
        assert!(!clock.is_started());
    }
}
