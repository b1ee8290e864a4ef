//! # Padline
//!
//! A media-agnostic streaming pipeline engine.
//!
//! Elements exchange refcounted [`Buffer`](buffer::Buffer)s through linked
//! [`Pad`](pad::Pad)s, agree on formats by intersecting
//! [`Caps`](caps::Caps), move together through the NULL, READY, PAUSED and
//! PLAYING [`State`](element::State)s, and report to the application over a
//! [`Bus`](bus::Bus).
//!
//! ## Features
//!
//! - **Push and pull scheduling**: source tasks push downstream, or a sink
//!   pulls ranges from upstream
//! - **Caps negotiation**: structured format descriptions with ranges,
//!   lists, intersection and fixation
//! - **Sticky events**: STREAM-START, CAPS and SEGMENT are replayed to new
//!   peers in order
//! - **Containers**: bins change their children sink-first and aggregate
//!   async completion and EOS
//! - **Clocks**: pipeline clock selection, base time and flushable waits
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use padline::prelude::*;
//!
//! let registry = ElementRegistry::with_core_elements();
//! let pipeline = parse_launch("fakesrc num-buffers=5 size=16 ! identity ! fakesink", &registry)?;
//!
//! pipeline.set_state(State::Playing);
//! let msg = pipeline
//!     .bus()
//!     .timed_pop_filtered(Some(Duration::from_secs(5)), MessageType::EOS | MessageType::ERROR);
//! assert_eq!(msg.map(|m| m.message_type()), Some(MessageType::EOS));
//! pipeline.set_state(State::Null);
//! # Ok::<(), padline::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod buffer;
pub mod bus;
pub mod caps;
pub mod clock;
pub mod dataqueue;
pub mod element;
pub mod elements;
pub mod error;
pub mod event;
pub mod flow;
pub mod launch;
pub mod message;
pub mod object;
pub mod pad;
pub mod query;
pub mod task;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::{Buffer, BufferList};
    pub use crate::bus::Bus;
    pub use crate::caps::Caps;
    pub use crate::clock::{Clock, ClockTime};
    pub use crate::element::{
        Bin, Element, ElementImpl, ElementRegistry, Pipeline, State, StateChange, StateChangeReturn,
    };
    pub use crate::error::{Error, Result};
    pub use crate::event::Event;
    pub use crate::flow::{FlowError, FlowResult, FlowSuccess};
    pub use crate::launch::parse_launch;
    pub use crate::message::{Message, MessageType, MessageView};
    pub use crate::pad::{Pad, PadDirection, PadPresence, PadTemplate};
    pub use crate::query::Query;
}

pub use error::{Error, Result};
