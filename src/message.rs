//! Bus messages: asynchronous reports from elements to the application.
//!
//! A [`Message`] is an immutable shared handle like a buffer. It records the
//! element that posted it (weakly, so a queued message never keeps an
//! element alive) together with that element's name.
//!
//! ERROR, WARNING and INFO carry an [`ErrorMessage`] whose [`ErrorKind`]
//! separates negotiation problems ([`StreamError::NotNegotiated`]) from
//! resource failures such as I/O.
//!
//! ```rust
//! use padline::message::{ErrorKind, Message, MessageType, StreamError};
//!
//! let msg = Message::error(None, ErrorKind::Stream(StreamError::NotNegotiated), "no common format");
//! assert_eq!(msg.message_type(), MessageType::ERROR);
//! assert!(MessageType::ERROR.union(MessageType::EOS).contains(msg.message_type()));
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use crate::caps::Structure;
use crate::clock::ClockTime;
use crate::element::{Element, State};
use crate::event::{TagList, next_seqnum};

// ============================================================================
// Message type mask
// ============================================================================

/// Message type bits, combinable into a filter mask.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct MessageType(u32);

impl MessageType {
    /// Matches nothing.
    pub const UNKNOWN: Self = Self(0);
    /// End of stream.
    pub const EOS: Self = Self(1 << 0);
    /// Fatal error.
    pub const ERROR: Self = Self(1 << 1);
    /// Recoverable problem.
    pub const WARNING: Self = Self(1 << 2);
    /// Informational.
    pub const INFO: Self = Self(1 << 3);
    /// Stream tags.
    pub const TAG: Self = Self(1 << 4);
    /// An element changed state.
    pub const STATE_CHANGED: Self = Self(1 << 5);
    /// Streaming thread status.
    pub const STREAM_STATUS: Self = Self(1 << 6);
    /// Application-defined.
    pub const APPLICATION: Self = Self(1 << 7);
    /// Element-specific.
    pub const ELEMENT: Self = Self(1 << 8);
    /// An async state change began.
    pub const ASYNC_START: Self = Self(1 << 9);
    /// An async state change finished.
    pub const ASYNC_DONE: Self = Self(1 << 10);
    /// The pipeline selected a new clock.
    pub const NEW_CLOCK: Self = Self(1 << 11);
    /// Latency needs recalculation.
    pub const LATENCY: Self = Self(1 << 12);
    /// Duration changed.
    pub const DURATION_CHANGED: Self = Self(1 << 13);
    /// A new stream started.
    pub const STREAM_START: Self = Self(1 << 14);
    /// Matches every type.
    pub const ANY: Self = Self(u32::MAX);

    /// True if every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// True if any bit is shared.
    pub const fn intersects(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    /// Bitwise OR.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Canonical name of a single type.
    pub fn name(self) -> &'static str {
        match self {
            Self::EOS => "eos",
            Self::ERROR => "error",
            Self::WARNING => "warning",
            Self::INFO => "info",
            Self::TAG => "tag",
            Self::STATE_CHANGED => "state-changed",
            Self::STREAM_STATUS => "stream-status",
            Self::APPLICATION => "application",
            Self::ELEMENT => "element",
            Self::ASYNC_START => "async-start",
            Self::ASYNC_DONE => "async-done",
            Self::NEW_CLOCK => "new-clock",
            Self::LATENCY => "latency",
            Self::DURATION_CHANGED => "duration-changed",
            Self::STREAM_START => "stream-start",
            Self::ANY => "any",
            _ => "unknown",
        }
    }
}

impl std::ops::BitOr for MessageType {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageType({})", self.name())
    }
}

// ============================================================================
// Error payloads
// ============================================================================

/// Core engine failures.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreError {
    /// Unspecified core failure.
    #[error("internal core failure")]
    Failed,
    /// An element failed a state transition.
    #[error("state change failed")]
    StateChange,
    /// Pad operation failed.
    #[error("pad problem")]
    Pad,
    /// Clock problem.
    #[error("clock problem")]
    Clock,
    /// Feature not implemented.
    #[error("not implemented")]
    NotImplemented,
}

/// Streaming failures.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamError {
    /// Unspecified streaming failure.
    #[error("internal data stream error")]
    Failed,
    /// Pads could not agree on a format.
    #[error("not negotiated")]
    NotNegotiated,
    /// Data has an unexpected format.
    #[error("wrong data format")]
    Format,
    /// Data could not be decoded.
    #[error("could not decode stream")]
    Decode,
    /// Data could not be encoded.
    #[error("could not encode stream")]
    Encode,
    /// Stream type could not be determined.
    #[error("could not determine type of stream")]
    TypeNotFound,
}

/// Resource (I/O, device) failures.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceError {
    /// Unspecified resource failure.
    #[error("resource failure")]
    Failed,
    /// Resource does not exist.
    #[error("resource not found")]
    NotFound,
    /// Resource is in use.
    #[error("resource busy")]
    Busy,
    /// Read failed.
    #[error("could not read")]
    Read,
    /// Write failed.
    #[error("could not write")]
    Write,
    /// Seek failed.
    #[error("could not seek")]
    Seek,
    /// Out of space.
    #[error("no space left")]
    NoSpaceLeft,
}

/// Failures of supporting libraries.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibraryError {
    /// Unspecified library failure.
    #[error("library failure")]
    Failed,
    /// Initialisation failed.
    #[error("could not initialise library")]
    Init,
    /// Shutdown failed.
    #[error("could not shut down library")]
    Shutdown,
    /// Bad settings.
    #[error("invalid library settings")]
    Settings,
}

/// Error domain and code.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Core engine.
    #[error("core: {0}")]
    Core(CoreError),
    /// Data stream.
    #[error("stream: {0}")]
    Stream(StreamError),
    /// I/O or devices.
    #[error("resource: {0}")]
    Resource(ResourceError),
    /// Supporting libraries.
    #[error("library: {0}")]
    Library(LibraryError),
}

/// Payload of ERROR, WARNING and INFO messages.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {text}")]
pub struct ErrorMessage {
    /// Domain and code.
    pub kind: ErrorKind,
    /// Human readable description.
    pub text: String,
    /// Developer details.
    pub debug: Option<String>,
}

impl ErrorMessage {
    /// Payload without debug details.
    pub fn new(kind: ErrorKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            debug: None,
        }
    }

    /// Attach debug details.
    pub fn with_debug(mut self, debug: impl Into<String>) -> Self {
        self.debug = Some(debug.into());
        self
    }
}

// ============================================================================
// Message
// ============================================================================

/// What a STREAM-STATUS message reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamStatus {
    /// Streaming thread created.
    Create,
    /// Streaming thread entered its loop.
    Enter,
    /// Streaming thread left its loop.
    Leave,
    /// Streaming thread destroyed.
    Destroy,
}

/// Typed message contents.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageView {
    /// End of stream reached.
    Eos,
    /// Fatal error.
    Error(ErrorMessage),
    /// Recoverable problem.
    Warning(ErrorMessage),
    /// Information.
    Info(ErrorMessage),
    /// Stream tags.
    Tag(TagList),
    /// A state change step completed.
    StateChanged {
        /// Previous state.
        old: State,
        /// Reached state.
        current: State,
        /// Final target, `VoidPending` if reached.
        pending: State,
    },
    /// Streaming thread status.
    StreamStatus {
        /// What happened.
        status: StreamStatus,
        /// Name of the pad driving the thread.
        owner: String,
    },
    /// Application-defined.
    Application(Structure),
    /// Element-specific.
    Element(Structure),
    /// An async state change began.
    AsyncStart,
    /// An async state change finished.
    AsyncDone {
        /// Running time at completion.
        running_time: ClockTime,
    },
    /// Pipeline selected a clock.
    NewClock {
        /// Clock name.
        clock: String,
    },
    /// Latency changed.
    Latency,
    /// Duration changed.
    DurationChanged,
    /// A new stream started.
    StreamStart,
}

impl MessageView {
    /// Type bit of these contents.
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageView::Eos => MessageType::EOS,
            MessageView::Error(_) => MessageType::ERROR,
            MessageView::Warning(_) => MessageType::WARNING,
            MessageView::Info(_) => MessageType::INFO,
            MessageView::Tag(_) => MessageType::TAG,
            MessageView::StateChanged { .. } => MessageType::STATE_CHANGED,
            MessageView::StreamStatus { .. } => MessageType::STREAM_STATUS,
            MessageView::Application(_) => MessageType::APPLICATION,
            MessageView::Element(_) => MessageType::ELEMENT,
            MessageView::AsyncStart => MessageType::ASYNC_START,
            MessageView::AsyncDone { .. } => MessageType::ASYNC_DONE,
            MessageView::NewClock { .. } => MessageType::NEW_CLOCK,
            MessageView::Latency => MessageType::LATENCY,
            MessageView::DurationChanged => MessageType::DURATION_CHANGED,
            MessageView::StreamStart => MessageType::STREAM_START,
        }
    }
}

#[derive(Debug)]
struct MessageInner {
    seqnum: u32,
    src: Option<Weak<Element>>,
    src_name: Option<String>,
    view: MessageView,
}

/// An immutable, refcounted bus message.
#[derive(Clone)]
pub struct Message(Arc<MessageInner>);

impl Message {
    /// Message from `src` (or from the application when `None`).
    pub fn new(src: Option<&Element>, view: MessageView) -> Self {
        Self(Arc::new(MessageInner {
            seqnum: next_seqnum(),
            src: src.map(Element::downgrade),
            src_name: src.map(|e| e.name().to_string()),
            view,
        }))
    }

    /// EOS.
    pub fn eos(src: Option<&Element>) -> Self {
        Self::new(src, MessageView::Eos)
    }

    /// ERROR.
    pub fn error(src: Option<&Element>, kind: ErrorKind, text: impl Into<String>) -> Self {
        Self::new(src, MessageView::Error(ErrorMessage::new(kind, text)))
    }

    /// WARNING.
    pub fn warning(src: Option<&Element>, kind: ErrorKind, text: impl Into<String>) -> Self {
        Self::new(src, MessageView::Warning(ErrorMessage::new(kind, text)))
    }

    /// INFO.
    pub fn info(src: Option<&Element>, kind: ErrorKind, text: impl Into<String>) -> Self {
        Self::new(src, MessageView::Info(ErrorMessage::new(kind, text)))
    }

    /// STATE-CHANGED.
    pub fn state_changed(src: Option<&Element>, old: State, current: State, pending: State) -> Self {
        Self::new(
            src,
            MessageView::StateChanged {
                old,
                current,
                pending,
            },
        )
    }

    /// TAG.
    pub fn tag(src: Option<&Element>, tags: TagList) -> Self {
        Self::new(src, MessageView::Tag(tags))
    }

    /// APPLICATION.
    pub fn application(src: Option<&Element>, structure: Structure) -> Self {
        Self::new(src, MessageView::Application(structure))
    }

    /// Contents.
    pub fn view(&self) -> &MessageView {
        &self.0.view
    }

    /// Type bit.
    pub fn message_type(&self) -> MessageType {
        self.0.view.message_type()
    }

    /// Sequence number.
    pub fn seqnum(&self) -> u32 {
        self.0.seqnum
    }

    /// Posting element, if it is still alive.
    pub fn src(&self) -> Option<Arc<Element>> {
        self.0.src.as_ref().and_then(Weak::upgrade)
    }

    /// Name of the posting element.
    pub fn src_name(&self) -> Option<&str> {
        self.0.src_name.as_deref()
    }

    /// True if `element` posted this message.
    pub fn is_from(&self, element: &Element) -> bool {
        self.0
            .src
            .as_ref()
            .is_some_and(|src| std::ptr::eq(src.as_ptr(), element))
    }

    /// Error payload of ERROR, WARNING and INFO messages.
    pub fn error_message(&self) -> Option<&ErrorMessage> {
        match &self.0.view {
            MessageView::Error(e) | MessageView::Warning(e) | MessageView::Info(e) => Some(e),
            _ => None,
        }
    }

    /// Number of handles sharing this message.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// True if both handles refer to the same message.
    pub fn ptr_eq(&self, other: &Message) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type", &self.message_type().name())
            .field("seqnum", &self.0.seqnum)
            .field("src", &self.0.src_name)
            .field("view", &self.0.view)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mask() {
        let mask = MessageType::ERROR | MessageType::EOS;
        assert!(mask.contains(MessageType::EOS));
        assert!(!mask.contains(MessageType::WARNING));
        assert!(MessageType::ANY.contains(MessageType::STATE_CHANGED));
        assert_eq!(MessageType::ASYNC_DONE.name(), "async-done");
    }

    #[test]
    fn test_error_kinds_are_distinct() {
        let negotiation = ErrorMessage::new(ErrorKind::Stream(StreamError::NotNegotiated), "caps");
        let io = ErrorMessage::new(ErrorKind::Resource(ResourceError::Read), "disk").with_debug("EIO");
        assert_ne!(negotiation.kind, io.kind);
        assert_eq!(io.debug.as_deref(), Some("EIO"));
        assert_eq!(negotiation.to_string(), "stream: not negotiated: caps");
    }

    #[test]
    fn test_application_message_without_source() {
        let msg = Message::application(None, Structure::new("app/ping"));
        assert!(msg.src().is_none());
        assert!(msg.src_name().is_none());
        assert_eq!(msg.message_type(), MessageType::APPLICATION);
        let copy = msg.clone();
        assert_eq!(msg.ref_count(), 2);
        assert!(copy.ptr_eq(&msg));
    }
}
