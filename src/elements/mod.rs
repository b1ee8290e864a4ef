//! Built-in elements.
//!
//! | Factory    | Element                | Purpose                                   |
//! |------------|------------------------|-------------------------------------------|
//! | `fakesrc`  | [`FakeSrc`]            | Produces filler buffers from its own task |
//! | `fakesink` | [`FakeSink`]           | Discards buffers, optionally synced       |
//! | `identity` | [`Identity`]           | Passes buffers through, with a handoff    |
//! | `queue`    | [`Queue`]              | Thread boundary with a bounded queue      |
//! | `tee`      | [`Tee`]                | Duplicates buffers to request pads        |
//!
//! They are registered in [`ElementRegistry::with_core_elements`] and
//! configured through properties.
//!
//! [`ElementRegistry::with_core_elements`]: crate::element::ElementRegistry::with_core_elements

mod fakesink;
mod fakesrc;
mod identity;
mod queue;
mod tee;

pub use fakesink::{FakeSink, HandoffCallback};
pub use fakesrc::FakeSrc;
pub use identity::{BufferCallback, Identity, IdentityStats};
pub use queue::{LeakyMode, Queue, QueueConfig, QueueStats};
pub use tee::Tee;

use std::sync::{Arc, OnceLock};

use tracing::warn;

use crate::caps::Caps;
use crate::element::Element;
use crate::error::{Error, Result};
use crate::pad::{Pad, PadDirection, PadPresence, PadTemplate};

/// Templates accepting any caps.
pub(crate) fn any_templates(specs: &[(&str, PadDirection, PadPresence)]) -> Vec<PadTemplate> {
    specs
        .iter()
        .filter_map(|&(name, direction, presence)| {
            PadTemplate::new(name, direction, presence, Caps::new_any())
                .inspect_err(|err| warn!(template = name, error = %err, "invalid pad template"))
                .ok()
        })
        .collect()
}

/// Look up an ALWAYS pad created during construction and remember it.
pub(crate) fn cache_pad(element: &Element, slot: &OnceLock<Arc<Pad>>, name: &str) -> Result<()> {
    let pad = element
        .static_pad(name)
        .ok_or_else(|| Error::NotFound(format!("{}:{name}", element.name())))?;
    let _ = slot.set(pad);
    Ok(())
}
