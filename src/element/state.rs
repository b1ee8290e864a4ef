use std::fmt;

/// Element state.
///
/// States are ordered: `Null < Ready < Paused < Playing`. `VoidPending`
/// marks "no pending state" and sorts below all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum State {
    /// No state change in progress.
    VoidPending,
    /// Initial state, no resources allocated.
    #[default]
    Null,
    /// Resources allocated, pads inactive.
    Ready,
    /// Pads active, prerolled, clock stopped.
    Paused,
    /// Clock running, data flowing.
    Playing,
}

impl State {
    /// Upper-case name used in messages and logs.
    pub const fn name(self) -> &'static str {
        match self {
            State::VoidPending => "VOID_PENDING",
            State::Null => "NULL",
            State::Ready => "READY",
            State::Paused => "PAUSED",
            State::Playing => "PLAYING",
        }
    }

    /// Next state one step from `self` towards `target`.
    pub(crate) fn step_towards(self, target: State) -> State {
        use State::*;
        match self.cmp(&target) {
            std::cmp::Ordering::Less => match self {
                VoidPending | Null => Ready,
                Ready => Paused,
                Paused | Playing => Playing,
            },
            std::cmp::Ordering::Greater => match self {
                Playing => Paused,
                Paused => Ready,
                Ready | Null | VoidPending => Null,
            },
            std::cmp::Ordering::Equal => self,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single state transition step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChange {
    /// NULL → READY.
    NullToReady,
    /// READY → PAUSED: pads are activated.
    ReadyToPaused,
    /// PAUSED → PLAYING: the clock runs.
    PausedToPlaying,
    /// PLAYING → PAUSED.
    PlayingToPaused,
    /// PAUSED → READY: pads are deactivated, streaming threads unblocked.
    PausedToReady,
    /// READY → NULL.
    ReadyToNull,
}

impl StateChange {
    /// Transition between two adjacent states.
    pub fn new(current: State, next: State) -> Option<Self> {
        use State::*;
        Some(match (current, next) {
            (Null, Ready) => StateChange::NullToReady,
            (Ready, Paused) => StateChange::ReadyToPaused,
            (Paused, Playing) => StateChange::PausedToPlaying,
            (Playing, Paused) => StateChange::PlayingToPaused,
            (Paused, Ready) => StateChange::PausedToReady,
            (Ready, Null) => StateChange::ReadyToNull,
            _ => return None,
        })
    }

    /// State before the transition.
    pub const fn current(self) -> State {
        match self {
            StateChange::NullToReady => State::Null,
            StateChange::ReadyToPaused | StateChange::ReadyToNull => State::Ready,
            StateChange::PausedToPlaying | StateChange::PausedToReady => State::Paused,
            StateChange::PlayingToPaused => State::Playing,
        }
    }

    /// State after the transition.
    pub const fn next(self) -> State {
        match self {
            StateChange::ReadyToNull => State::Null,
            StateChange::NullToReady | StateChange::PausedToReady => State::Ready,
            StateChange::ReadyToPaused | StateChange::PlayingToPaused => State::Paused,
            StateChange::PausedToPlaying => State::Playing,
        }
    }

    /// True for NULL→READY, READY→PAUSED and PAUSED→PLAYING.
    pub const fn is_upward(self) -> bool {
        matches!(
            self,
            StateChange::NullToReady | StateChange::ReadyToPaused | StateChange::PausedToPlaying
        )
    }
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.current(), self.next())
    }
}

/// Outcome of a state change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StateChangeReturn {
    /// The transition failed; the element stays at the last reached state.
    Failure,
    /// The transition completed.
    #[default]
    Success,
    /// The transition completes later; a STATE-CHANGED message reports it.
    Async,
    /// Completed, but the element cannot preroll (live source).
    NoPreroll,
}

impl StateChangeReturn {
    fn severity(self) -> u8 {
        match self {
            StateChangeReturn::Success => 0,
            StateChangeReturn::NoPreroll => 1,
            StateChangeReturn::Async => 2,
            StateChangeReturn::Failure => 3,
        }
    }

    /// Aggregate two child results: Failure > Async > NoPreroll > Success.
    pub fn combine(self, other: Self) -> Self {
        if other.severity() > self.severity() { other } else { self }
    }

    /// Upper-case name.
    pub const fn name(self) -> &'static str {
        match self {
            StateChangeReturn::Failure => "FAILURE",
            StateChangeReturn::Success => "SUCCESS",
            StateChangeReturn::Async => "ASYNC",
            StateChangeReturn::NoPreroll => "NO_PREROLL",
        }
    }
}

impl fmt::Display for StateChangeReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
