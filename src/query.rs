//! Queries: synchronous request/response round trips along a link.
//!
//! A [`Query`] is created by the asker, passed as `&mut` through
//! [`Pad::query`](crate::pad::Pad::query) or
//! [`Pad::peer_query`](crate::pad::Pad::peer_query), and filled in by
//! whichever handler answers it. The boolean returned by the pad call says
//! whether anyone did.
//!
//! ```rust
//! use padline::caps::Caps;
//! use padline::query::Query;
//!
//! let mut query = Query::caps(None);
//! assert!(query.caps_result().is_none());
//! query.set_caps_result(Caps::new_any());
//! assert!(query.caps_result().unwrap().is_any());
//! ```

use std::fmt;

use crate::caps::{Caps, Structure};
use crate::clock::ClockTime;
use crate::event::Format;
use crate::pad::PadMode;

/// Query type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    /// Which formats can the pad handle.
    Caps,
    /// Would the pad accept these fixed caps.
    AcceptCaps,
    /// Current stream position.
    Position,
    /// Total stream duration.
    Duration,
    /// Latency of the upstream chain.
    Latency,
    /// Can the stream be seeked.
    Seeking,
    /// Which scheduling modes does the peer support.
    Scheduling,
    /// Application-defined.
    Custom,
}

impl QueryType {
    /// Canonical name.
    pub const fn name(self) -> &'static str {
        match self {
            QueryType::Caps => "caps",
            QueryType::AcceptCaps => "accept-caps",
            QueryType::Position => "position",
            QueryType::Duration => "duration",
            QueryType::Latency => "latency",
            QueryType::Seeking => "seeking",
            QueryType::Scheduling => "scheduling",
            QueryType::Custom => "custom",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed query contents: request fields and answer slots.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryView {
    /// Caps query.
    Caps {
        /// Restrict the answer to these caps, in this preference order.
        filter: Option<Caps>,
        /// Answer.
        result: Option<Caps>,
    },
    /// Accept-caps query.
    AcceptCaps {
        /// Caps to check.
        caps: Caps,
        /// Answer.
        accepted: bool,
    },
    /// Position query.
    Position {
        /// Requested unit.
        format: Format,
        /// Answer.
        position: Option<u64>,
    },
    /// Duration query.
    Duration {
        /// Requested unit.
        format: Format,
        /// Answer.
        duration: Option<u64>,
    },
    /// Latency query.
    Latency {
        /// Upstream is live.
        live: bool,
        /// Minimum latency.
        min: ClockTime,
        /// Maximum latency, `NONE` for unlimited.
        max: ClockTime,
    },
    /// Seeking query.
    Seeking {
        /// Unit of the range.
        format: Format,
        /// Seekable at all.
        seekable: bool,
        /// First seekable position.
        start: Option<u64>,
        /// Last seekable position.
        end: Option<u64>,
    },
    /// Scheduling query.
    Scheduling {
        /// Supported modes, preferred first.
        modes: Vec<PadMode>,
        /// Random access is cheap.
        seekable: bool,
    },
    /// Application query.
    Custom(Structure),
}

/// A mutable request/response object.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    view: QueryView,
}

impl Query {
    /// Caps query with an optional filter.
    pub fn caps(filter: Option<Caps>) -> Self {
        Self {
            view: QueryView::Caps {
                filter,
                result: None,
            },
        }
    }

    /// Accept-caps query.
    pub fn accept_caps(caps: Caps) -> Self {
        Self {
            view: QueryView::AcceptCaps {
                caps,
                accepted: false,
            },
        }
    }

    /// Position query.
    pub fn position(format: Format) -> Self {
        Self {
            view: QueryView::Position {
                format,
                position: None,
            },
        }
    }

    /// Duration query.
    pub fn duration(format: Format) -> Self {
        Self {
            view: QueryView::Duration {
                format,
                duration: None,
            },
        }
    }

    /// Latency query.
    pub fn latency() -> Self {
        Self {
            view: QueryView::Latency {
                live: false,
                min: ClockTime::ZERO,
                max: ClockTime::NONE,
            },
        }
    }

    /// Seeking query.
    pub fn seeking(format: Format) -> Self {
        Self {
            view: QueryView::Seeking {
                format,
                seekable: false,
                start: None,
                end: None,
            },
        }
    }

    /// Scheduling query.
    pub fn scheduling() -> Self {
        Self {
            view: QueryView::Scheduling {
                modes: Vec::new(),
                seekable: false,
            },
        }
    }

    /// Application query.
    pub fn custom(structure: Structure) -> Self {
        Self {
            view: QueryView::Custom(structure),
        }
    }

    /// Type tag.
    pub fn query_type(&self) -> QueryType {
        match &self.view {
            QueryView::Caps { .. } => QueryType::Caps,
            QueryView::AcceptCaps { .. } => QueryType::AcceptCaps,
            QueryView::Position { .. } => QueryType::Position,
            QueryView::Duration { .. } => QueryType::Duration,
            QueryView::Latency { .. } => QueryType::Latency,
            QueryView::Seeking { .. } => QueryType::Seeking,
            QueryView::Scheduling { .. } => QueryType::Scheduling,
            QueryView::Custom(_) => QueryType::Custom,
        }
    }

    /// Contents.
    pub fn view(&self) -> &QueryView {
        &self.view
    }

    /// Mutable contents, for handlers filling in answers.
    pub fn view_mut(&mut self) -> &mut QueryView {
        &mut self.view
    }

    /// Filter of a caps query.
    pub fn caps_filter(&self) -> Option<&Caps> {
        match &self.view {
            QueryView::Caps { filter, .. } => filter.as_ref(),
            _ => None,
        }
    }

    /// Answer of a caps query.
    pub fn caps_result(&self) -> Option<&Caps> {
        match &self.view {
            QueryView::Caps { result, .. } => result.as_ref(),
            _ => None,
        }
    }

    /// Answer a caps query. Ignored for other types.
    pub fn set_caps_result(&mut self, caps: Caps) {
        if let QueryView::Caps { result, .. } = &mut self.view {
            *result = Some(caps);
        }
    }

    /// Caps carried by an accept-caps query.
    pub fn accept_caps_caps(&self) -> Option<&Caps> {
        match &self.view {
            QueryView::AcceptCaps { caps, .. } => Some(caps),
            _ => None,
        }
    }

    /// Answer of an accept-caps query.
    pub fn accept_caps_result(&self) -> bool {
        matches!(self.view, QueryView::AcceptCaps { accepted: true, .. })
    }

    /// Answer an accept-caps query. Ignored for other types.
    pub fn set_accept_caps_result(&mut self, value: bool) {
        if let QueryView::AcceptCaps { accepted, .. } = &mut self.view {
            *accepted = value;
        }
    }

    /// Answer a scheduling query. Ignored for other types.
    pub fn set_scheduling(&mut self, supported: &[PadMode], random_access: bool) {
        if let QueryView::Scheduling { modes, seekable } = &mut self.view {
            modes.clear();
            modes.extend_from_slice(supported);
            *seekable = random_access;
        }
    }

    /// True if a scheduling query lists `mode`.
    pub fn has_scheduling_mode(&self, mode: PadMode) -> bool {
        match &self.view {
            QueryView::Scheduling { modes, .. } => modes.contains(&mode),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_types() {
        assert_eq!(Query::caps(None).query_type(), QueryType::Caps);
        assert_eq!(Query::latency().query_type().name(), "latency");
        assert_eq!(
            Query::custom(Structure::new("app")).query_type(),
            QueryType::Custom
        );
    }

    #[test]
    fn test_accept_caps_answer() {
        let caps = Caps::builder("audio/x-raw").field("rate", 8000).build();
        let mut query = Query::accept_caps(caps.clone());
        assert_eq!(query.accept_caps_caps(), Some(&caps));
        assert!(!query.accept_caps_result());
        query.set_accept_caps_result(true);
        assert!(query.accept_caps_result());
    }

    #[test]
    fn test_setters_ignore_other_types() {
        let mut query = Query::position(Format::Time);
        query.set_caps_result(Caps::new_any());
        assert!(query.caps_result().is_none());

        let mut scheduling = Query::scheduling();
        scheduling.set_scheduling(&[PadMode::Push, PadMode::Pull], true);
        assert!(scheduling.has_scheduling_mode(PadMode::Pull));
    }
}
