//! Data-path return values.
//!
//! Every `push`, `pull_range` and chain/getrange handler returns a
//! [`FlowResult`]. The `Ok` side carries the successful outcomes, the `Err`
//! side everything that must stop the streaming thread. [`FlowReturn`] is
//! the flat view of both, with the canonical lowercase names used in logs
//! and bus messages.
//!
//! # Example
//!
//! ```rust
//! use padline::flow::{FlowError, FlowReturn, FlowSuccess};
//!
//! let ret = FlowReturn::from(Err::<FlowSuccess, _>(FlowError::NotLinked));
//! assert_eq!(ret.name(), "not-linked");
//! assert!(FlowError::NotNegotiated.is_fatal());
//! assert!(!FlowError::Flushing.is_fatal());
//! ```

use std::fmt;

/// Successful streaming outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlowSuccess {
    /// Data passed.
    #[default]
    Ok,
    /// Element-specific success.
    CustomSuccess,
}

/// Streaming outcomes that stop the data flow.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowError {
    /// The pad has no peer.
    #[error("not-linked")]
    NotLinked,
    /// The element is not in a state that allows streaming.
    #[error("wrong-state")]
    WrongState,
    /// The pad is flushing; the caller must unwind.
    #[error("flushing")]
    Flushing,
    /// End of stream was reached.
    #[error("eos")]
    Eos,
    /// No common format, or data arrived before caps.
    #[error("not-negotiated")]
    NotNegotiated,
    /// Generic fatal error; the element should have posted an ERROR message.
    #[error("error")]
    Error,
    /// Operation not supported by this pad or element.
    #[error("not-supported")]
    NotSupported,
    /// Element-specific error.
    #[error("custom-error")]
    CustomError,
}

impl FlowError {
    /// Fatal results require an ERROR message on the bus.
    ///
    /// `Eos`, `Flushing` and `WrongState` are orderly shutdown paths.
    pub const fn is_fatal(self) -> bool {
        matches!(
            self,
            FlowError::NotLinked
                | FlowError::NotNegotiated
                | FlowError::Error
                | FlowError::NotSupported
                | FlowError::CustomError
        )
    }
}

/// Result of a streaming operation.
pub type FlowResult = Result<FlowSuccess, FlowError>;

/// Flat view of a [`FlowResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlowReturn {
    /// Data passed.
    #[default]
    Ok,
    /// Element-specific success.
    CustomSuccess,
    /// The pad has no peer.
    NotLinked,
    /// Element not in a streaming state.
    WrongState,
    /// Pad is flushing.
    Flushing,
    /// End of stream.
    Eos,
    /// Format negotiation failed.
    NotNegotiated,
    /// Fatal error.
    Error,
    /// Operation not supported.
    NotSupported,
    /// Element-specific error.
    CustomError,
}

impl FlowReturn {
    /// Canonical name of this flow return.
    pub const fn name(self) -> &'static str {
        match self {
            FlowReturn::Ok => "ok",
            FlowReturn::CustomSuccess => "custom-success",
            FlowReturn::NotLinked => "not-linked",
            FlowReturn::WrongState => "wrong-state",
            FlowReturn::Flushing => "flushing",
            FlowReturn::Eos => "eos",
            FlowReturn::NotNegotiated => "not-negotiated",
            FlowReturn::Error => "error",
            FlowReturn::NotSupported => "not-supported",
            FlowReturn::CustomError => "custom-error",
        }
    }

    /// Convert back into the `Result` form.
    pub const fn into_result(self) -> FlowResult {
        match self {
            FlowReturn::Ok => Ok(FlowSuccess::Ok),
            FlowReturn::CustomSuccess => Ok(FlowSuccess::CustomSuccess),
            FlowReturn::NotLinked => Err(FlowError::NotLinked),
            FlowReturn::WrongState => Err(FlowError::WrongState),
            FlowReturn::Flushing => Err(FlowError::Flushing),
            FlowReturn::Eos => Err(FlowError::Eos),
            FlowReturn::NotNegotiated => Err(FlowError::NotNegotiated),
            FlowReturn::Error => Err(FlowError::Error),
            FlowReturn::NotSupported => Err(FlowError::NotSupported),
            FlowReturn::CustomError => Err(FlowError::CustomError),
        }
    }

    /// True for `Ok` and `CustomSuccess`.
    pub const fn is_success(self) -> bool {
        matches!(self, FlowReturn::Ok | FlowReturn::CustomSuccess)
    }
}

impl From<FlowResult> for FlowReturn {
    fn from(result: FlowResult) -> Self {
        match result {
            Ok(FlowSuccess::Ok) => FlowReturn::Ok,
            Ok(FlowSuccess::CustomSuccess) => FlowReturn::CustomSuccess,
            Err(FlowError::NotLinked) => FlowReturn::NotLinked,
            Err(FlowError::WrongState) => FlowReturn::WrongState,
            Err(FlowError::Flushing) => FlowReturn::Flushing,
            Err(FlowError::Eos) => FlowReturn::Eos,
            Err(FlowError::NotNegotiated) => FlowReturn::NotNegotiated,
            Err(FlowError::Error) => FlowReturn::Error,
            Err(FlowError::NotSupported) => FlowReturn::NotSupported,
            Err(FlowError::CustomError) => FlowReturn::CustomError,
        }
    }
}

impl From<FlowError> for FlowReturn {
    fn from(err: FlowError) -> Self {
        FlowReturn::from(Err::<FlowSuccess, _>(err))
    }
}

impl fmt::Display for FlowReturn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A blocking waiter that a pad flush must be able to interrupt.
///
/// Elements register their queues and clock waits on the pads that drive
/// them (see [`Pad::add_flush_target`](crate::pad::Pad::add_flush_target)).
/// FLUSH-START and pad deactivation call [`flush_start`](Self::flush_start),
/// which must wake every thread blocked in the target and make it return
/// [`FlowError::Flushing`]; FLUSH-STOP re-arms it.
pub trait FlushTarget: Send + Sync {
    /// Enter flushing: wake all waiters, refuse new waits.
    fn flush_start(&self);

    /// Leave flushing.
    fn flush_stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_return_names() {
        assert_eq!(FlowReturn::Ok.name(), "ok");
        assert_eq!(FlowReturn::Eos.name(), "eos");
        assert_eq!(FlowReturn::CustomSuccess.name(), "custom-success");
        assert_eq!(FlowReturn::CustomError.name(), "custom-error");
        assert_eq!(FlowReturn::NotNegotiated.to_string(), "not-negotiated");
    }

    #[test]
    fn test_flow_return_conversion() {
        for ret in [
            FlowReturn::Ok,
            FlowReturn::CustomSuccess,
            FlowReturn::NotLinked,
            FlowReturn::WrongState,
            FlowReturn::Flushing,
            FlowReturn::Eos,
            FlowReturn::NotNegotiated,
            FlowReturn::Error,
            FlowReturn::NotSupported,
            FlowReturn::CustomError,
        ] {
            assert_eq!(FlowReturn::from(ret.into_result()), ret);
        }
    }

    #[test]
    fn test_flow_error_display_matches_name() {
        assert_eq!(FlowError::NotLinked.to_string(), FlowReturn::NotLinked.name());
        assert_eq!(FlowError::Flushing.to_string(), "flushing");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(FlowError::Error.is_fatal());
        assert!(FlowError::NotLinked.is_fatal());
        assert!(!FlowError::Eos.is_fatal());
        assert!(!FlowError::Flushing.is_fatal());
        assert!(!FlowError::WrongState.is_fatal());
    }
}
