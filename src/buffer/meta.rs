//! Typed side-channel annotations attached to buffers.
//!
//! A meta is any `Send + Sync` struct implementing [`Meta`]. The type itself
//! is the descriptor: [`Buffer::meta`](super::Buffer::meta) looks entries up
//! by type, and [`MetaInfo`] carries the name, tags and `TypeId` for code
//! that only knows a meta by name (see [`MetaRegistry`]).
//!
//! Lifecycle hooks map onto Rust ownership: construction is "init", `Drop`
//! is "free", and [`Meta::transform`] decides whether and how the meta
//! survives a buffer copy or region extraction.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use crate::caps::Caps;
use crate::clock::ClockTime;

/// Why a meta is being carried over to another buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaTransform {
    /// Whole-buffer copy (`copy`, `make_writable`).
    Copy,
    /// A region of the source buffer was extracted.
    Region {
        /// Start of the region in the source buffer.
        offset: usize,
        /// Length of the region.
        size: usize,
    },
}

/// An annotation type that can be attached to a buffer.
pub trait Meta: Any + Send + Sync + fmt::Debug + Sized {
    /// Registered name, e.g. `"NetAddressMeta"`.
    const NAME: &'static str;

    /// Tags describing what aspect of the data the meta depends on.
    ///
    /// Metas without tags survive any transformation; a `"memory"` tag
    /// means the meta describes the bytes themselves.
    fn tags() -> &'static [&'static str] {
        &[]
    }

    /// The meta to attach to the transformed buffer, or `None` to drop it.
    fn transform(&self, transform: &MetaTransform) -> Option<Self>;

    /// Descriptor for this meta type.
    fn info() -> MetaInfo {
        MetaInfo {
            name: Self::NAME,
            tags: Self::tags(),
            type_id: TypeId::of::<Self>(),
        }
    }
}

/// Descriptor of a registered meta type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaInfo {
    /// Registered name.
    pub name: &'static str,
    /// API tags.
    pub tags: &'static [&'static str],
    /// Concrete type.
    pub type_id: TypeId,
}

/// Object-safe view of a [`Meta`], as stored on a buffer.
pub trait AnyMeta: Send + Sync + fmt::Debug {
    /// Descriptor of the concrete meta type.
    fn meta_info(&self) -> MetaInfo;
    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
    /// Owned downcast support.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
    /// Boxed [`Meta::transform`].
    fn transform_boxed(&self, transform: &MetaTransform) -> Option<Box<dyn AnyMeta>>;
}

impl<M: Meta> AnyMeta for M {
    fn meta_info(&self) -> MetaInfo {
        M::info()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }

    fn transform_boxed(&self, transform: &MetaTransform) -> Option<Box<dyn AnyMeta>> {
        self.transform(transform)
            .map(|meta| Box::new(meta) as Box<dyn AnyMeta>)
    }
}

/// Explicit registry of meta types, keyed by name.
///
/// Buffers do not need the registry; it exists for code that resolves metas
/// from names (serializers, debug tooling).
#[derive(Debug, Default)]
pub struct MetaRegistry {
    by_name: HashMap<&'static str, MetaInfo>,
}

impl MetaRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-filled with the built-in metas.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register::<NetAddressMeta>();
        registry.register::<ReferenceTimestampMeta>();
        registry
    }

    /// Register `M`. Returns `false` if the name was already taken.
    pub fn register<M: Meta>(&mut self) -> bool {
        let info = M::info();
        match self.by_name.entry(info.name) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(info);
                true
            }
        }
    }

    /// Look up a descriptor by name.
    pub fn lookup(&self, name: &str) -> Option<&MetaInfo> {
        self.by_name.get(name)
    }

    /// True if `M` is registered.
    pub fn is_registered<M: Meta>(&self) -> bool {
        self.by_name
            .get(M::NAME)
            .is_some_and(|info| info.type_id == TypeId::of::<M>())
    }

    /// Number of registered metas.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

// ============================================================================
// Built-in metas
// ============================================================================

/// Network address the buffer was received from or is destined to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetAddressMeta {
    /// Socket address.
    pub addr: SocketAddr,
}

impl Meta for NetAddressMeta {
    const NAME: &'static str = "NetAddressMeta";

    fn transform(&self, _transform: &MetaTransform) -> Option<Self> {
        Some(*self)
    }
}

/// Timestamp of the buffer against a reference timeline (e.g. NTP, PTP).
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceTimestampMeta {
    /// Caps naming the reference, e.g. `timestamp/x-ntp`.
    pub reference: Caps,
    /// Timestamp on the reference timeline.
    pub timestamp: ClockTime,
    /// Duration on the reference timeline.
    pub duration: ClockTime,
}

impl Meta for ReferenceTimestampMeta {
    const NAME: &'static str = "ReferenceTimestampMeta";

    fn tags() -> &'static [&'static str] {
        &["timestamp"]
    }

    fn transform(&self, transform: &MetaTransform) -> Option<Self> {
        match transform {
            MetaTransform::Copy => Some(self.clone()),
            MetaTransform::Region { offset: 0, .. } => Some(self.clone()),
            MetaTransform::Region { .. } => None,
        }
    }
}
