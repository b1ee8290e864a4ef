//! Reference-counted media buffers.
//!
//! A [`Buffer`] is a shared handle: `clone()` is a ref, dropping is an
//! unref. Contents are shared read-only between holders. Mutation follows
//! three rules:
//!
//! - Timestamps, flags and caps use copy-on-write setters that never fail
//!   (the handle is detached from other holders first).
//! - Write maps, memory and meta mutation require exclusive ownership and
//!   fail with [`BufferError::NotWritable`] otherwise. Call
//!   [`Buffer::make_writable`] first.
//! - Memory blocks are themselves copy-on-write, so a buffer made writable
//!   by a shallow copy only duplicates bytes when they are written.
//!
//! ```rust
//! use padline::buffer::Buffer;
//! use padline::clock::ClockTime;
//!
//! let buffer = Buffer::from_slice(b"abcd");
//! let other = buffer.clone();
//! assert_eq!(buffer.ref_count(), 2);
//!
//! let mut own = other.make_writable();
//! own.set_pts(ClockTime::from_millis(40));
//! own.map_writable().unwrap()[0] = b'x';
//!
//! assert_eq!(&*buffer.map_readable(), b"abcd");
//! assert_eq!(&*own.map_readable(), b"xbcd");
//! ```

mod list;
mod memory;
mod meta;

pub use list::BufferList;
pub use memory::Memory;
pub use meta::{
    AnyMeta, Meta, MetaInfo, MetaRegistry, MetaTransform, NetAddressMeta, ReferenceTimestampMeta,
};

use std::any::TypeId;
use std::borrow::Cow;
use std::fmt;
use std::ops::{Deref, DerefMut};

use smallvec::SmallVec;

use crate::caps::Caps;
use crate::clock::ClockTime;
use crate::error::BufferError;
use crate::object::Shared;
use memory::check_region;

// ============================================================================
// Flags
// ============================================================================

/// Buffer flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct BufferFlags(u32);

impl BufferFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// Produced by a live source.
    pub const LIVE: Self = Self(1 << 0);
    /// Data is discontinuous with the previous buffer.
    pub const DISCONT: Self = Self(1 << 1);
    /// Cannot be decoded on its own.
    pub const DELTA_UNIT: Self = Self(1 << 2);
    /// Gap filler without meaningful data.
    pub const GAP: Self = Self(1 << 3);
    /// Data is known to be corrupted.
    pub const CORRUPTED: Self = Self(1 << 4);
    /// Stream header.
    pub const HEADER: Self = Self(1 << 5);
    /// Can be dropped without breaking the stream.
    pub const DROPPABLE: Self = Self(1 << 6);
    /// Media-specific boundary marker.
    pub const MARKER: Self = Self(1 << 7);

    /// True if all bits of `other` are set.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Bitwise OR.
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Clear the bits of `other`.
    #[inline]
    pub const fn remove(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// True if no flag is set.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

// ============================================================================
// Buffer
// ============================================================================

struct BufferInner {
    memories: SmallVec<[Memory; 1]>,
    pts: ClockTime,
    dts: ClockTime,
    duration: ClockTime,
    offset: u64,
    offset_end: u64,
    flags: BufferFlags,
    metas: Vec<Box<dyn AnyMeta>>,
    caps: Option<Caps>,
}

impl BufferInner {
    fn with_memories(memories: SmallVec<[Memory; 1]>) -> Self {
        Self {
            memories,
            pts: ClockTime::NONE,
            dts: ClockTime::NONE,
            duration: ClockTime::NONE,
            offset: u64::MAX,
            offset_end: u64::MAX,
            flags: BufferFlags::NONE,
            metas: Vec::new(),
            caps: None,
        }
    }

    fn size(&self) -> usize {
        self.memories.iter().map(Memory::size).sum()
    }

    /// Copy of everything but the memories, with metas transformed.
    fn copy_header(&self, transform: &MetaTransform) -> Self {
        Self {
            memories: SmallVec::new(),
            pts: self.pts,
            dts: self.dts,
            duration: self.duration,
            offset: self.offset,
            offset_end: self.offset_end,
            flags: self.flags,
            metas: self
                .metas
                .iter()
                .filter_map(|meta| meta.transform_boxed(transform))
                .collect(),
            caps: self.caps.clone(),
        }
    }

    /// Memories covering `offset..offset + size`, sharing blocks.
    fn share_region(&self, offset: usize, size: usize) -> Result<SmallVec<[Memory; 1]>, BufferError> {
        check_region(offset, size, self.size())?;
        let mut out = SmallVec::new();
        let mut skip = offset;
        let mut left = size;
        for memory in &self.memories {
            if left == 0 {
                break;
            }
            if skip >= memory.size() {
                skip -= memory.size();
                continue;
            }
            let take = (memory.size() - skip).min(left);
            out.push(memory.share(skip, take)?);
            left -= take;
            skip = 0;
        }
        Ok(out)
    }
}

impl Clone for BufferInner {
    fn clone(&self) -> Self {
        let mut inner = self.copy_header(&MetaTransform::Copy);
        inner.memories = self.memories.clone();
        inner
    }
}

/// A reference-counted, timestamped chunk of data.
#[derive(Clone)]
pub struct Buffer(Shared<BufferInner>);

impl Buffer {
    /// Buffer with one zero-filled memory of `capacity` bytes.
    ///
    /// A zero capacity creates a buffer without memory.
    pub fn new(capacity: usize) -> Self {
        let mut memories = SmallVec::new();
        if capacity > 0 {
            memories.push(Memory::with_size(capacity));
        }
        Self(Shared::new(BufferInner::with_memories(memories)))
    }

    /// Buffer owning `bytes`.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self::from_memory(Memory::from_vec(bytes))
    }

    /// Buffer holding a copy of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::from_memory(Memory::from_slice(bytes))
    }

    /// Buffer wrapping foreign read-only storage without copying.
    pub fn wrap_readonly<T>(storage: T) -> Self
    where
        T: AsRef<[u8]> + Send + Sync + 'static,
    {
        Self::from_memory(Memory::wrap_readonly(storage))
    }

    /// Buffer with a single memory.
    pub fn from_memory(memory: Memory) -> Self {
        let mut memories = SmallVec::new();
        memories.push(memory);
        Self(Shared::new(BufferInner::with_memories(memories)))
    }

    // ------------------------------------------------------------------------
    // Ownership
    // ------------------------------------------------------------------------

    /// Number of handles sharing this buffer.
    #[inline]
    pub fn ref_count(&self) -> usize {
        self.0.ref_count()
    }

    /// True if this handle is the only one.
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.0.is_writable()
    }

    /// True if both handles refer to the same buffer.
    #[inline]
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        self.0.ptr_eq(&other.0)
    }

    /// This buffer if sole-owned, otherwise a writable copy.
    ///
    /// The copy shares memory blocks; they are copied on first write.
    pub fn make_writable(mut self) -> Buffer {
        self.0.make_mut();
        self
    }

    /// Deep copy: new memory holding the same bytes, metas transformed.
    pub fn copy(&self) -> Buffer {
        let mut inner = self.0.copy_header(&MetaTransform::Copy);
        let bytes = self.map_readable();
        if !bytes.is_empty() {
            inner.memories.push(Memory::from_slice(&bytes));
        }
        Buffer(Shared::new(inner))
    }

    fn inner_mut(&mut self) -> Result<&mut BufferInner, BufferError> {
        let refcount = self.0.ref_count();
        self.0.get_mut().ok_or(BufferError::NotWritable { refcount })
    }

    // ------------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------------

    /// Total size in bytes over all memories.
    pub fn size(&self) -> usize {
        self.0.size()
    }

    /// Number of memory spans.
    pub fn n_memory(&self) -> usize {
        self.0.memories.len()
    }

    /// Memory at `idx`.
    pub fn peek_memory(&self, idx: usize) -> Option<&Memory> {
        self.0.memories.get(idx)
    }

    /// All memory spans.
    pub fn memories(&self) -> impl Iterator<Item = &Memory> {
        self.0.memories.iter()
    }

    /// Append a memory span.
    pub fn append_memory(&mut self, memory: Memory) -> Result<(), BufferError> {
        self.inner_mut()?.memories.push(memory);
        Ok(())
    }

    /// Read access to the contents.
    ///
    /// A single-memory buffer maps in place; multiple memories are joined
    /// into a temporary copy.
    pub fn map_readable(&self) -> BufferMap<'_> {
        let data = match self.0.memories.as_slice() {
            [] => Cow::Borrowed(&[][..]),
            [memory] => Cow::Borrowed(memory.as_slice()),
            memories => Cow::Owned(memories.iter().flat_map(|m| m.as_slice()).copied().collect()),
        };
        BufferMap { data }
    }

    /// Write access to the contents.
    ///
    /// Requires exclusive ownership of the buffer. Multiple memories are
    /// merged into one first; shared or read-only blocks are copied.
    pub fn map_writable(&mut self) -> Result<BufferMapMut<'_>, BufferError> {
        let inner = self.inner_mut()?;
        if inner.memories.len() != 1 {
            let merged: Vec<u8> = inner
                .memories
                .iter()
                .flat_map(|m| m.as_slice())
                .copied()
                .collect();
            inner.memories.clear();
            inner.memories.push(Memory::from_vec(merged));
        }
        Ok(BufferMapMut {
            data: inner.memories[0].make_mut(),
        })
    }

    /// New buffer sharing the memory of `offset..offset + size`.
    ///
    /// Timestamps are kept only when the region starts at offset 0.
    pub fn copy_region(&self, offset: usize, size: usize) -> Result<Buffer, BufferError> {
        let memories = self.0.share_region(offset, size)?;
        let mut inner = self.0.copy_header(&MetaTransform::Region { offset, size });
        inner.memories = memories;
        if offset != 0 {
            inner.pts = ClockTime::NONE;
            inner.dts = ClockTime::NONE;
            inner.duration = ClockTime::NONE;
            inner.offset = u64::MAX;
            inner.offset_end = u64::MAX;
        }
        Ok(Buffer(Shared::new(inner)))
    }

    /// Copy `size` bytes starting at `offset` out of the buffer.
    pub fn extract(&self, offset: usize, size: usize) -> Result<Vec<u8>, BufferError> {
        check_region(offset, size, self.size())?;
        Ok(self.map_readable()[offset..offset + size].to_vec())
    }

    /// Overwrite bytes starting at `offset` with `src`.
    pub fn fill(&mut self, offset: usize, src: &[u8]) -> Result<(), BufferError> {
        check_region(offset, src.len(), self.size())?;
        let mut map = self.map_writable()?;
        map[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Keep only `offset..offset + size` of the contents.
    pub fn resize(&mut self, offset: usize, size: usize) -> Result<(), BufferError> {
        let memories = self.0.share_region(offset, size)?;
        self.inner_mut()?.memories = memories;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Timestamps and flags
    // ------------------------------------------------------------------------

    /// Presentation timestamp.
    pub fn pts(&self) -> ClockTime {
        self.0.pts
    }

    /// Set the presentation timestamp.
    pub fn set_pts(&mut self, pts: ClockTime) {
        self.0.make_mut().pts = pts;
    }

    /// Decode timestamp.
    pub fn dts(&self) -> ClockTime {
        self.0.dts
    }

    /// Set the decode timestamp.
    pub fn set_dts(&mut self, dts: ClockTime) {
        self.0.make_mut().dts = dts;
    }

    /// Duration.
    pub fn duration(&self) -> ClockTime {
        self.0.duration
    }

    /// Set the duration.
    pub fn set_duration(&mut self, duration: ClockTime) {
        self.0.make_mut().duration = duration;
    }

    /// Media-specific offset, `u64::MAX` when unset.
    pub fn offset(&self) -> u64 {
        self.0.offset
    }

    /// Set the media offset.
    pub fn set_offset(&mut self, offset: u64) {
        self.0.make_mut().offset = offset;
    }

    /// Media-specific end offset, `u64::MAX` when unset.
    pub fn offset_end(&self) -> u64 {
        self.0.offset_end
    }

    /// Set the media end offset.
    pub fn set_offset_end(&mut self, offset_end: u64) {
        self.0.make_mut().offset_end = offset_end;
    }

    /// Flags.
    pub fn flags(&self) -> BufferFlags {
        self.0.flags
    }

    /// Set flags in addition to the current ones.
    pub fn set_flags(&mut self, flags: BufferFlags) {
        let inner = self.0.make_mut();
        inner.flags = inner.flags.union(flags);
    }

    /// Clear flags.
    pub fn unset_flags(&mut self, flags: BufferFlags) {
        let inner = self.0.make_mut();
        inner.flags = inner.flags.remove(flags);
    }

    /// Caps describing the contents, if attached.
    pub fn caps(&self) -> Option<&Caps> {
        self.0.caps.as_ref()
    }

    /// Attach caps.
    pub fn set_caps(&mut self, caps: Option<Caps>) {
        self.0.make_mut().caps = caps;
    }

    // ------------------------------------------------------------------------
    // Metas
    // ------------------------------------------------------------------------

    /// Attach a meta. Requires exclusive ownership.
    pub fn add_meta<M: Meta>(&mut self, meta: M) -> Result<(), BufferError> {
        self.inner_mut()?.metas.push(Box::new(meta));
        Ok(())
    }

    /// First meta of type `M`.
    pub fn meta<M: Meta>(&self) -> Option<&M> {
        self.0
            .metas
            .iter()
            .find_map(|meta| meta.as_any().downcast_ref::<M>())
    }

    /// Detach and return the first meta of type `M`.
    pub fn remove_meta<M: Meta>(&mut self) -> Result<Option<M>, BufferError> {
        let metas = &mut self.inner_mut()?.metas;
        let Some(idx) = metas
            .iter()
            .position(|meta| meta.meta_info().type_id == TypeId::of::<M>())
        else {
            return Ok(None);
        };
        let meta = metas.remove(idx);
        Ok(meta.into_any().downcast::<M>().ok().map(|boxed| *boxed))
    }

    /// Descriptors of all attached metas, in insertion order.
    pub fn metas(&self) -> impl Iterator<Item = MetaInfo> + '_ {
        self.0.metas.iter().map(|meta| meta.meta_info())
    }

    /// Number of attached metas.
    pub fn n_metas(&self) -> usize {
        self.0.metas.len()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("size", &self.size())
            .field("pts", &self.pts())
            .field("dts", &self.dts())
            .field("duration", &self.duration())
            .field("flags", &self.flags())
            .field("metas", &self.n_metas())
            .finish()
    }
}

// ============================================================================
// Map guards
// ============================================================================

/// Read mapping of a buffer's contents.
pub struct BufferMap<'a> {
    data: Cow<'a, [u8]>,
}

impl BufferMap<'_> {
    /// Mapped bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Deref for BufferMap<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

/// Write mapping of a buffer's contents.
pub struct BufferMapMut<'a> {
    data: &'a mut [u8],
}

impl Deref for BufferMapMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl DerefMut for BufferMapMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_new_is_zeroed() {
        let buffer = Buffer::new(8);
        assert_eq!(buffer.size(), 8);
        assert_eq!(buffer.n_memory(), 1);
        assert!(buffer.map_readable().iter().all(|b| *b == 0));
        assert!(buffer.pts().is_none());
        assert_eq!(Buffer::new(0).n_memory(), 0);
    }

    #[test]
    fn test_ref_unref_round_trip() {
        let buffer = Buffer::from_slice(&[1, 2, 3, 4]);
        let extra = buffer.clone();
        assert_eq!(buffer.ref_count(), 2);
        drop(extra);
        assert_eq!(buffer.ref_count(), 1);
        assert_eq!(&*buffer.map_readable(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_write_map_on_shared_buffer_fails() {
        let mut buffer = Buffer::from_slice(b"data");
        let _other = buffer.clone();
        assert!(matches!(
            buffer.map_writable(),
            Err(BufferError::NotWritable { refcount: 2 })
        ));
        assert!(buffer.add_meta(NetAddressMeta { addr: "127.0.0.1:5000".parse().unwrap() }).is_err());
        assert!(buffer.append_memory(Memory::with_size(2)).is_err());
    }

    #[test]
    fn test_make_writable_detaches() {
        let original = Buffer::from_slice(b"abcd");
        let shared = original.clone();
        let mut own = shared.make_writable();
        assert!(!own.ptr_eq(&original));
        assert_eq!(original.ref_count(), 1);
        own.map_writable().unwrap()[3] = b'z';
        assert_eq!(&*original.map_readable(), b"abcd");
        assert_eq!(&*own.map_readable(), b"abcz");
    }

    #[test]
    fn test_make_writable_sole_owner_is_same() {
        let buffer = Buffer::from_slice(b"x");
        let ptr = buffer.map_readable().as_ptr();
        let buffer = buffer.make_writable();
        assert_eq!(buffer.map_readable().as_ptr(), ptr);
    }

    #[test]
    fn test_setters_copy_on_write() {
        let mut a = Buffer::from_slice(b"ab");
        let b = a.clone();
        a.set_pts(ClockTime::from_millis(10));
        a.set_flags(BufferFlags::DISCONT | BufferFlags::LIVE);
        assert_eq!(a.pts(), ClockTime::from_millis(10));
        assert!(b.pts().is_none());
        assert!(a.flags().contains(BufferFlags::DISCONT));
        assert!(b.flags().is_empty());
        a.unset_flags(BufferFlags::LIVE);
        assert!(!a.flags().contains(BufferFlags::LIVE));
    }

    #[test]
    fn test_multi_memory_map_and_region() {
        let mut buffer = Buffer::from_slice(b"abc");
        buffer.append_memory(Memory::from_slice(b"def")).unwrap();
        assert_eq!(buffer.n_memory(), 2);
        assert_eq!(&*buffer.map_readable(), b"abcdef");

        let region = buffer.copy_region(2, 3).unwrap();
        assert_eq!(&*region.map_readable(), b"cde");
        assert_eq!(region.n_memory(), 2);
        assert_eq!(buffer.extract(1, 2).unwrap(), b"bc");

        assert!(matches!(
            buffer.extract(4, 3),
            Err(BufferError::OutOfRange { offset: 4, size: 3, len: 6 })
        ));

        buffer.map_writable().unwrap()[0] = b'A';
        assert_eq!(buffer.n_memory(), 1);
        assert_eq!(&*buffer.map_readable(), b"Abcdef");
    }

    #[test]
    fn test_fill_and_resize() {
        let mut buffer = Buffer::new(6);
        buffer.fill(1, b"xyz").unwrap();
        assert_eq!(&*buffer.map_readable(), b"\0xyz\0\0");
        buffer.resize(1, 3).unwrap();
        assert_eq!(&*buffer.map_readable(), b"xyz");
        assert!(buffer.fill(2, b"ab").is_err());
    }

    #[test]
    fn test_copy_is_deep() {
        let mut buffer = Buffer::from_slice(b"1234");
        buffer.set_pts(ClockTime::from_secs(1));
        let copy = buffer.copy();
        assert_eq!(copy.pts(), ClockTime::from_secs(1));
        assert!(!copy.peek_memory(0).unwrap().shares_block(buffer.peek_memory(0).unwrap()));
        assert_eq!(&*copy.map_readable(), b"1234");
    }

    #[test]
    fn test_meta_add_get_remove() {
        let addr: SocketAddr = "10.0.0.1:5004".parse().unwrap();
        let mut buffer = Buffer::new(4);
        buffer.add_meta(NetAddressMeta { addr }).unwrap();
        assert_eq!(buffer.meta::<NetAddressMeta>().unwrap().addr, addr);
        assert!(buffer.meta::<ReferenceTimestampMeta>().is_none());
        assert_eq!(buffer.metas().next().unwrap().name, "NetAddressMeta");

        let copy = buffer.copy();
        assert_eq!(copy.meta::<NetAddressMeta>().unwrap().addr, addr);

        let removed = buffer.remove_meta::<NetAddressMeta>().unwrap();
        assert_eq!(removed.unwrap().addr, addr);
        assert_eq!(buffer.n_metas(), 0);
        assert!(buffer.remove_meta::<NetAddressMeta>().unwrap().is_none());
    }

    #[derive(Debug)]
    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Meta for DropCounter {
        const NAME: &'static str = "DropCounter";

        fn tags() -> &'static [&'static str] {
            &["memory"]
        }

        fn transform(&self, _transform: &MetaTransform) -> Option<Self> {
            None
        }
    }

    #[test]
    fn test_last_unref_frees_metas() {
        let freed = Arc::new(AtomicUsize::new(0));
        let mut buffer = Buffer::new(1);
        buffer.add_meta(DropCounter(freed.clone())).unwrap();

        let copy = buffer.copy();
        assert!(copy.meta::<DropCounter>().is_none());

        let other = buffer.clone();
        drop(buffer);
        assert_eq!(freed.load(Ordering::SeqCst), 0);
        drop(other);
        assert_eq!(freed.load(Ordering::SeqCst), 1);
    }
}
