//! Pad probes: callbacks observing or intercepting pad traffic.

use std::fmt;
use std::sync::Arc;

use crate::buffer::{Buffer, BufferList};
use crate::event::Event;

use super::Pad;

/// What a probe wants to see.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PadProbeType(u32);

impl PadProbeType {
    /// Nothing.
    pub const NONE: Self = Self(0);
    /// Buffers.
    pub const BUFFER: Self = Self(1 << 0);
    /// Buffer lists.
    pub const BUFFER_LIST: Self = Self(1 << 1);
    /// Downstream events.
    pub const EVENT_DOWNSTREAM: Self = Self(1 << 2);
    /// Upstream events.
    pub const EVENT_UPSTREAM: Self = Self(1 << 3);
    /// Push mode traffic only.
    pub const PUSH: Self = Self(1 << 8);
    /// Pull mode traffic only.
    pub const PULL: Self = Self(1 << 9);
    /// Buffers, lists and downstream events.
    pub const DATA_DOWNSTREAM: Self = Self(Self::BUFFER.0 | Self::BUFFER_LIST.0 | Self::EVENT_DOWNSTREAM.0);
    /// Everything.
    pub const ALL: Self = Self(Self::DATA_DOWNSTREAM.0 | Self::EVENT_UPSTREAM.0);

    const DATA_MASK: u32 = 0xff;
    const SCHEDULING_MASK: u32 = Self::PUSH.0 | Self::PULL.0;

    /// True if all bits of `other` are set.
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Bitwise OR.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// True if a probe registered with `self` wants traffic described by
    /// `traffic` (one data bit plus one scheduling bit).
    pub(crate) fn wants(self, traffic: Self) -> bool {
        let data = (self.0 & traffic.0 & Self::DATA_MASK) != 0;
        let scheduling = (self.0 & Self::SCHEDULING_MASK) == 0
            || (self.0 & traffic.0 & Self::SCHEDULING_MASK) != 0;
        data && scheduling
    }
}

impl std::ops::BitOr for PadProbeType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Verdict of a probe callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadProbeReturn {
    /// Let the data pass.
    Ok,
    /// Discard the data; the push reports success.
    Drop,
    /// Remove this probe and let the data pass.
    Remove,
    /// The probe consumed the data itself.
    Handled,
}

/// Data seen by a probe.
#[derive(Debug, Clone, Copy)]
pub enum PadProbeData<'a> {
    /// A buffer.
    Buffer(&'a Buffer),
    /// A buffer list.
    BufferList(&'a BufferList),
    /// An event.
    Event(&'a Event),
}

/// Probe callback argument.
#[derive(Debug, Clone, Copy)]
pub struct PadProbeInfo<'a> {
    /// Traffic type bits.
    pub mask: PadProbeType,
    /// The data.
    pub data: PadProbeData<'a>,
}

/// Handle returned by [`Pad::add_probe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeId(pub(crate) u64);

pub(crate) type ProbeCallback = Arc<dyn Fn(&Pad, &PadProbeInfo<'_>) -> PadProbeReturn + Send + Sync>;

pub(crate) struct Probe {
    pub(crate) id: ProbeId,
    pub(crate) mask: PadProbeType,
    pub(crate) callback: ProbeCallback,
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("id", &self.id)
            .field("mask", &self.mask)
            .finish()
    }
}

/// Combined verdict of all probes on one piece of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProbeOutcome {
    Pass,
    Drop,
    Handled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_mask_matching() {
        let traffic = PadProbeType::BUFFER | PadProbeType::PUSH;
        assert!(PadProbeType::BUFFER.wants(traffic));
        assert!((PadProbeType::BUFFER | PadProbeType::PUSH).wants(traffic));
        assert!(!(PadProbeType::BUFFER | PadProbeType::PULL).wants(traffic));
        assert!(!PadProbeType::EVENT_DOWNSTREAM.wants(traffic));
        assert!(PadProbeType::ALL.wants(PadProbeType::EVENT_UPSTREAM | PadProbeType::PUSH));
    }
}
