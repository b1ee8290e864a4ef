//! Events: control messages travelling along pad links.
//!
//! # Direction
//!
//! The event type, not the pad, decides the direction:
//!
//! - **Downstream**: STREAM-START, CAPS, SEGMENT, TAG, GAP, EOS, custom
//!   downstream. Serialized with buffers.
//! - **Upstream**: SEEK, QOS, RECONFIGURE, LATENCY, custom upstream.
//!   Handled by the element's event handler directly.
//! - **Both**: FLUSH-START (not serialized, overtakes data), FLUSH-STOP,
//!   custom both.
//!
//! # Sticky events
//!
//! STREAM-START, CAPS, SEGMENT, TAG and EOS are stored on the pads they
//! pass and replayed to a newly linked peer, always in that order.
//!
//! ```rust
//! use padline::event::{Event, EventType};
//!
//! let eos = Event::eos();
//! assert_eq!(eos.event_type(), EventType::Eos);
//! assert!(eos.is_downstream() && eos.is_sticky());
//! assert!(Event::reconfigure().is_upstream());
//! ```

mod tags;

pub use tags::{TagList, TagMergeMode, TagValue};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::caps::{Caps, Structure};
use crate::clock::{ClockTime, ClockTimeDiff};

static SEQNUM: AtomicU32 = AtomicU32::new(1);

/// Next process-wide sequence number for events and messages.
pub(crate) fn next_seqnum() -> u32 {
    SEQNUM.fetch_add(1, Ordering::Relaxed)
}

// ============================================================================
// Event type
// ============================================================================

/// Event type tags with their direction and serialization properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Start flushing, both directions, overtakes data.
    FlushStart,
    /// Stop flushing, both directions.
    FlushStop,
    /// Start of a new stream.
    StreamStart,
    /// Negotiated format.
    Caps,
    /// Playback segment.
    Segment,
    /// Stream metadata.
    Tag,
    /// No data for a period.
    Gap,
    /// End of stream.
    Eos,
    /// Seek request.
    Seek,
    /// Quality-of-service feedback.
    Qos,
    /// Ask upstream to renegotiate.
    Reconfigure,
    /// Configure latency.
    Latency,
    /// Application event flowing upstream.
    CustomUpstream,
    /// Application event flowing downstream, serialized.
    CustomDownstream,
    /// Application event flowing both ways, serialized.
    CustomBoth,
}

impl EventType {
    /// Travels from sink pads towards sources.
    pub const fn is_upstream(self) -> bool {
        matches!(
            self,
            EventType::FlushStart
                | EventType::FlushStop
                | EventType::Seek
                | EventType::Qos
                | EventType::Reconfigure
                | EventType::Latency
                | EventType::CustomUpstream
                | EventType::CustomBoth
        )
    }

    /// Travels from source pads towards sinks.
    pub const fn is_downstream(self) -> bool {
        matches!(
            self,
            EventType::FlushStart
                | EventType::FlushStop
                | EventType::StreamStart
                | EventType::Caps
                | EventType::Segment
                | EventType::Tag
                | EventType::Gap
                | EventType::Eos
                | EventType::CustomDownstream
                | EventType::CustomBoth
        )
    }

    /// Delivered in order with buffers, under the pad's stream lock.
    pub const fn is_serialized(self) -> bool {
        matches!(
            self,
            EventType::FlushStop
                | EventType::StreamStart
                | EventType::Caps
                | EventType::Segment
                | EventType::Tag
                | EventType::Gap
                | EventType::Eos
                | EventType::CustomDownstream
                | EventType::CustomBoth
        )
    }

    /// Stored on pads and replayed to new peers.
    pub const fn is_sticky(self) -> bool {
        self.sticky_order().is_some()
    }

    /// Position among sticky events.
    pub(crate) const fn sticky_order(self) -> Option<u8> {
        match self {
            EventType::StreamStart => Some(0),
            EventType::Caps => Some(1),
            EventType::Segment => Some(2),
            EventType::Tag => Some(3),
            EventType::Eos => Some(4),
            _ => None,
        }
    }

    /// Canonical name.
    pub const fn name(self) -> &'static str {
        match self {
            EventType::FlushStart => "flush-start",
            EventType::FlushStop => "flush-stop",
            EventType::StreamStart => "stream-start",
            EventType::Caps => "caps",
            EventType::Segment => "segment",
            EventType::Tag => "tag",
            EventType::Gap => "gap",
            EventType::Eos => "eos",
            EventType::Seek => "seek",
            EventType::Qos => "qos",
            EventType::Reconfigure => "reconfigure",
            EventType::Latency => "latency",
            EventType::CustomUpstream => "custom-upstream",
            EventType::CustomDownstream => "custom-downstream",
            EventType::CustomBoth => "custom-both",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Unit of segment positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    /// Nanoseconds.
    #[default]
    Time,
    /// Bytes.
    Bytes,
    /// Element-defined units (samples, frames).
    Default,
}

/// Flags on a segment or seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeekFlags(u32);

impl SeekFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Flush before seeking.
    pub const FLUSH: Self = Self(1 << 0);
    /// Seek to the exact position.
    pub const ACCURATE: Self = Self(1 << 1);
    /// Seek to the nearest key unit.
    pub const KEY_UNIT: Self = Self(1 << 2);
    /// Post SEGMENT-DONE instead of EOS.
    pub const SEGMENT: Self = Self(1 << 3);

    /// True if all bits of `other` are set.
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Bitwise OR.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Marker for unset segment positions.
pub const POSITION_NONE: u64 = u64::MAX;

/// A playback segment: the range of the stream to play and how its
/// positions map to running time.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Unit of the positions.
    pub format: Format,
    /// Playback rate, negative for reverse.
    pub rate: f64,
    /// Rate already applied upstream.
    pub applied_rate: f64,
    /// First position to play.
    pub start: u64,
    /// Last position to play, [`POSITION_NONE`] for open-ended.
    pub stop: u64,
    /// Stream time of `start`.
    pub time: u64,
    /// Last known position.
    pub position: u64,
    /// Running time accumulated by previous segments.
    pub base: u64,
    /// Flags from the seek that created the segment.
    pub flags: SeekFlags,
}

impl Segment {
    /// Open-ended segment in `format` starting at zero.
    pub fn new(format: Format) -> Self {
        Self {
            format,
            rate: 1.0,
            applied_rate: 1.0,
            start: 0,
            stop: POSITION_NONE,
            time: 0,
            position: 0,
            base: 0,
            flags: SeekFlags::NONE,
        }
    }

    /// Running time of `position`, `None` if it lies outside the segment.
    pub fn to_running_time(&self, position: u64) -> Option<u64> {
        if position == POSITION_NONE || position < self.start {
            return None;
        }
        if self.stop != POSITION_NONE && position > self.stop {
            return None;
        }
        let offset = if self.rate >= 0.0 {
            position - self.start
        } else {
            self.stop.checked_sub(position)?
        };
        let rate = self.rate.abs();
        let scaled = if rate == 1.0 || rate == 0.0 {
            offset
        } else {
            (offset as f64 / rate) as u64
        };
        Some(scaled.saturating_add(self.base))
    }
}

impl Default for Segment {
    fn default() -> Self {
        Self::new(Format::Time)
    }
}

/// Position adjustment in a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SeekType {
    /// Keep the current position.
    #[default]
    None,
    /// Absolute position.
    Set,
    /// Relative to the end.
    End,
}

/// Seek request payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Seek {
    /// Requested rate.
    pub rate: f64,
    /// Unit of the positions.
    pub format: Format,
    /// Seek flags.
    pub flags: SeekFlags,
    /// How to interpret `start`.
    pub start_type: SeekType,
    /// New start position.
    pub start: u64,
    /// How to interpret `stop`.
    pub stop_type: SeekType,
    /// New stop position.
    pub stop: u64,
}

/// Kind of QoS report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QosType {
    /// Upstream produced data too slowly or too fast.
    Overflow,
    /// Downstream is too slow.
    Underflow,
    /// Application imposed limit.
    Throttle,
}

/// Quality-of-service feedback payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Qos {
    /// Report kind.
    pub qos_type: QosType,
    /// Long-term rate ratio.
    pub proportion: f64,
    /// Lateness of the buffer, negative when early.
    pub diff: ClockTimeDiff,
    /// Timestamp of the buffer that triggered the report.
    pub timestamp: ClockTime,
}

/// Stream-start payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStart {
    /// Unique stream id.
    pub stream_id: String,
    /// Group of streams that belong together.
    pub group_id: Option<u32>,
}

/// Typed event contents.
#[derive(Debug, Clone, PartialEq)]
pub enum EventView {
    /// Start flushing.
    FlushStart,
    /// Stop flushing; `reset_time` resets running time.
    FlushStop {
        /// Reset running time to zero.
        reset_time: bool,
    },
    /// New stream.
    StreamStart(StreamStart),
    /// Format of the following buffers.
    Caps(Caps),
    /// Playback segment.
    Segment(Segment),
    /// Stream tags.
    Tag(TagList),
    /// No data between `timestamp` and `timestamp + duration`.
    Gap {
        /// Start of the gap.
        timestamp: ClockTime,
        /// Length of the gap.
        duration: ClockTime,
    },
    /// End of stream.
    Eos,
    /// Seek request.
    Seek(Seek),
    /// QoS feedback.
    Qos(Qos),
    /// Renegotiate.
    Reconfigure,
    /// Latency to configure.
    Latency(ClockTime),
    /// Custom upstream event.
    CustomUpstream(Structure),
    /// Custom downstream event.
    CustomDownstream(Structure),
    /// Custom bidirectional event.
    CustomBoth(Structure),
}

// ============================================================================
// Event
// ============================================================================

#[derive(Debug)]
struct EventInner {
    seqnum: u32,
    view: EventView,
}

/// An immutable, refcounted event.
#[derive(Clone)]
pub struct Event(Arc<EventInner>);

impl Event {
    fn new(view: EventView) -> Self {
        Self(Arc::new(EventInner {
            seqnum: next_seqnum(),
            view,
        }))
    }

    /// FLUSH-START.
    pub fn flush_start() -> Self {
        Self::new(EventView::FlushStart)
    }

    /// FLUSH-STOP.
    pub fn flush_stop(reset_time: bool) -> Self {
        Self::new(EventView::FlushStop { reset_time })
    }

    /// STREAM-START.
    pub fn stream_start(stream_id: impl Into<String>) -> Self {
        Self::new(EventView::StreamStart(StreamStart {
            stream_id: stream_id.into(),
            group_id: None,
        }))
    }

    /// CAPS. Caps should be fixed.
    pub fn caps(caps: Caps) -> Self {
        Self::new(EventView::Caps(caps))
    }

    /// SEGMENT.
    pub fn segment(segment: Segment) -> Self {
        Self::new(EventView::Segment(segment))
    }

    /// TAG.
    pub fn tag(tags: TagList) -> Self {
        Self::new(EventView::Tag(tags))
    }

    /// GAP.
    pub fn gap(timestamp: ClockTime, duration: ClockTime) -> Self {
        Self::new(EventView::Gap {
            timestamp,
            duration,
        })
    }

    /// EOS.
    pub fn eos() -> Self {
        Self::new(EventView::Eos)
    }

    /// SEEK.
    pub fn seek(seek: Seek) -> Self {
        Self::new(EventView::Seek(seek))
    }

    /// Flushing time seek to `position`.
    pub fn seek_time(position: ClockTime) -> Self {
        Self::seek(Seek {
            rate: 1.0,
            format: Format::Time,
            flags: SeekFlags::FLUSH,
            start_type: SeekType::Set,
            start: position.nanos(),
            stop_type: SeekType::None,
            stop: POSITION_NONE,
        })
    }

    /// QOS.
    pub fn qos(qos: Qos) -> Self {
        Self::new(EventView::Qos(qos))
    }

    /// RECONFIGURE.
    pub fn reconfigure() -> Self {
        Self::new(EventView::Reconfigure)
    }

    /// LATENCY.
    pub fn latency(latency: ClockTime) -> Self {
        Self::new(EventView::Latency(latency))
    }

    /// Custom upstream event.
    pub fn custom_upstream(structure: Structure) -> Self {
        Self::new(EventView::CustomUpstream(structure))
    }

    /// Custom downstream event.
    pub fn custom_downstream(structure: Structure) -> Self {
        Self::new(EventView::CustomDownstream(structure))
    }

    /// Custom event travelling both ways.
    pub fn custom_both(structure: Structure) -> Self {
        Self::new(EventView::CustomBoth(structure))
    }

    /// Same contents with an explicit sequence number.
    pub fn with_seqnum(&self, seqnum: u32) -> Self {
        Self(Arc::new(EventInner {
            seqnum,
            view: self.0.view.clone(),
        }))
    }

    /// Contents.
    pub fn view(&self) -> &EventView {
        &self.0.view
    }

    /// Sequence number.
    pub fn seqnum(&self) -> u32 {
        self.0.seqnum
    }

    /// Type tag.
    pub fn event_type(&self) -> EventType {
        match &self.0.view {
            EventView::FlushStart => EventType::FlushStart,
            EventView::FlushStop { .. } => EventType::FlushStop,
            EventView::StreamStart(_) => EventType::StreamStart,
            EventView::Caps(_) => EventType::Caps,
            EventView::Segment(_) => EventType::Segment,
            EventView::Tag(_) => EventType::Tag,
            EventView::Gap { .. } => EventType::Gap,
            EventView::Eos => EventType::Eos,
            EventView::Seek(_) => EventType::Seek,
            EventView::Qos(_) => EventType::Qos,
            EventView::Reconfigure => EventType::Reconfigure,
            EventView::Latency(_) => EventType::Latency,
            EventView::CustomUpstream(_) => EventType::CustomUpstream,
            EventView::CustomDownstream(_) => EventType::CustomDownstream,
            EventView::CustomBoth(_) => EventType::CustomBoth,
        }
    }

    /// See [`EventType::is_upstream`].
    pub fn is_upstream(&self) -> bool {
        self.event_type().is_upstream()
    }

    /// See [`EventType::is_downstream`].
    pub fn is_downstream(&self) -> bool {
        self.event_type().is_downstream()
    }

    /// See [`EventType::is_serialized`].
    pub fn is_serialized(&self) -> bool {
        self.event_type().is_serialized()
    }

    /// See [`EventType::is_sticky`].
    pub fn is_sticky(&self) -> bool {
        self.event_type().is_sticky()
    }

    /// Caps carried by a CAPS event.
    pub fn parse_caps(&self) -> Option<&Caps> {
        match &self.0.view {
            EventView::Caps(caps) => Some(caps),
            _ => None,
        }
    }

    /// Segment carried by a SEGMENT event.
    pub fn parse_segment(&self) -> Option<&Segment> {
        match &self.0.view {
            EventView::Segment(segment) => Some(segment),
            _ => None,
        }
    }

    /// Payload structure of custom events.
    pub fn structure(&self) -> Option<&Structure> {
        match &self.0.view {
            EventView::CustomUpstream(s) | EventView::CustomDownstream(s) | EventView::CustomBoth(s) => Some(s),
            _ => None,
        }
    }

    /// True if both handles refer to the same event.
    pub fn ptr_eq(&self, other: &Event) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("type", &self.event_type().name())
            .field("seqnum", &self.0.seqnum)
            .field("view", &self.0.view)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_flags() {
        assert!(Event::flush_start().is_upstream());
        assert!(Event::flush_start().is_downstream());
        assert!(!Event::flush_start().is_serialized());
        assert!(Event::flush_stop(true).is_serialized());
        assert!(Event::seek_time(ClockTime::ZERO).is_upstream());
        assert!(!Event::seek_time(ClockTime::ZERO).is_downstream());
        assert!(Event::gap(ClockTime::ZERO, ClockTime::SECOND).is_serialized());
        assert!(!Event::gap(ClockTime::ZERO, ClockTime::SECOND).is_sticky());
        assert!(Event::custom_upstream(Structure::new("x")).is_upstream());
        let both = Event::custom_both(Structure::new("x"));
        assert!(both.is_upstream() && both.is_downstream());
    }

    #[test]
    fn test_sticky_order() {
        let order: Vec<u8> = [
            EventType::StreamStart,
            EventType::Caps,
            EventType::Segment,
            EventType::Tag,
            EventType::Eos,
        ]
        .iter()
        .filter_map(|t| t.sticky_order())
        .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert!(!EventType::Gap.is_sticky());
    }

    #[test]
    fn test_seqnums_increase() {
        let a = Event::eos();
        let b = Event::eos();
        assert!(b.seqnum() > a.seqnum());
        let c = a.with_seqnum(7);
        assert_eq!(c.seqnum(), 7);
        assert_eq!(c.event_type(), EventType::Eos);
    }

    #[test]
    fn test_segment_running_time() {
        let mut segment = Segment::new(Format::Time);
        segment.start = 1_000;
        segment.stop = 5_000;
        segment.base = 100;
        assert_eq!(segment.to_running_time(1_000), Some(100));
        assert_eq!(segment.to_running_time(3_000), Some(2_100));
        assert_eq!(segment.to_running_time(500), None);
        assert_eq!(segment.to_running_time(6_000), None);

        segment.rate = 2.0;
        assert_eq!(segment.to_running_time(3_000), Some(1_100));
    }

    #[test]
    fn test_parse_helpers() {
        let caps = Caps::builder("audio/x-raw").build();
        let event = Event::caps(caps.clone());
        assert_eq!(event.parse_caps(), Some(&caps));
        assert!(event.parse_segment().is_none());
        assert_eq!(event.event_type().to_string(), "caps");
    }
}
