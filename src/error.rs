//! Error types for padline.
//!
//! Library-level failures use the enums in this module. Data-path results
//! are not errors in this sense: they travel as [`FlowResult`](crate::flow::FlowResult)
//! values through `push`/`pull_range`, and state changes report a
//! [`StateChangeReturn`](crate::element::StateChangeReturn).

use thiserror::Error;

/// Result type alias using padline's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for padline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Buffer access or mutation failed.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// Two pads could not be linked.
    #[error(transparent)]
    PadLink(#[from] PadLinkError),

    /// A caps string could not be parsed.
    #[error(transparent)]
    CapsParse(#[from] CapsParseError),

    /// A state change could not be completed.
    #[error(transparent)]
    State(#[from] StateError),

    /// A bus operation was rejected.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Object name is not acceptable (empty, duplicate in container, bad pattern).
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Element is already part of a container.
    #[error("element '{0}' already has a parent")]
    AlreadyParented(String),

    /// Operation needs a container element.
    #[error("element '{0}' is not a bin")]
    NotABin(String),

    /// Element or pad lookup failed.
    #[error("not found: {0}")]
    NotFound(String),

    /// A pad template does not allow the requested operation.
    #[error("pad template '{template}': {reason}")]
    PadTemplate {
        /// Template name pattern.
        template: String,
        /// What went wrong.
        reason: String,
    },

    /// Factory name is not present in the registry.
    #[error("no such element factory: {0}")]
    NoSuchFactory(String),

    /// Property rejected by an element.
    #[error("invalid property '{name}': {reason}")]
    InvalidProperty {
        /// Property name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Launch description could not be parsed.
    #[error("launch parse error: {0}")]
    LaunchParse(String),

    /// A streaming task could not be spawned.
    #[error("task error: {0}")]
    Task(#[from] std::io::Error),
}

/// Errors from buffer mapping and mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Write access requested on a buffer or memory that is shared.
    #[error("buffer is not writable (shared with {refcount} holders)")]
    NotWritable {
        /// Number of handles currently sharing the buffer.
        refcount: usize,
    },

    /// Region lies outside the buffer contents.
    #[error("region {offset}+{size} out of range for buffer of {len} bytes")]
    OutOfRange {
        /// Requested start offset.
        offset: usize,
        /// Requested length.
        size: usize,
        /// Actual buffer size.
        len: usize,
    },
}

/// Result of a failed pad link.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadLinkError {
    /// Pads have the wrong directions (must be src → sink).
    #[error("pads have wrong direction")]
    WrongDirection,
    /// One of the pads already has a peer.
    #[error("pad was already linked")]
    WasLinked,
    /// Pads do not live in the same container.
    #[error("pads have no common grandparent")]
    WrongHierarchy,
    /// Pads have no common format.
    #[error("pads have no common format")]
    NoFormat,
    /// A link handler refused the link.
    #[error("link refused")]
    Refused,
}

/// Errors from parsing a caps string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapsParseError {
    /// Input is not valid caps syntax.
    #[error("invalid caps syntax at '{rest}'")]
    Syntax {
        /// Unparsed remainder of the input.
        rest: String,
    },
    /// A field value does not match its declared type.
    #[error("field '{field}': cannot parse '{value}' as {kind}")]
    BadValue {
        /// Field name.
        field: String,
        /// Offending text.
        value: String,
        /// Declared type name.
        kind: String,
    },
}

/// State change failures reported through the library API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// An element refused a transition.
    #[error("element '{element}' failed to change state {transition}")]
    ChangeFailed {
        /// Name of the failing element.
        element: String,
        /// Transition that failed, e.g. `READY->PAUSED`.
        transition: String,
    },
}

/// Bus operation failures.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// A watch is already installed on this bus.
    #[error("bus already has a watch")]
    WatchExists,
    /// The bus is flushing and drops all messages.
    #[error("bus is flushing")]
    Flushing,
}
