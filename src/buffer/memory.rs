//! Memory spans backing a buffer.
//!
//! A [`Memory`] is a view (offset + size) over a refcounted block. Cloning a
//! `Memory` shares the block; writing through [`Memory::make_mut`] copies the
//! visible bytes into a private block first when the block is shared or
//! wraps read-only storage.

use std::fmt;
use std::sync::Arc;

use crate::error::BufferError;

enum MemoryBlock {
    /// Bytes owned by the block.
    Owned(Vec<u8>),
    /// Foreign read-only storage. Dropping it releases the storage.
    Wrapped(Box<dyn AsRef<[u8]> + Send + Sync>),
}

impl MemoryBlock {
    fn as_slice(&self) -> &[u8] {
        match self {
            MemoryBlock::Owned(bytes) => bytes,
            MemoryBlock::Wrapped(storage) => (**storage).as_ref(),
        }
    }
}

/// Handle to a region of a memory block.
///
/// Cheap to clone (refcount increment + offset/size copy).
#[derive(Clone)]
pub struct Memory {
    block: Arc<MemoryBlock>,
    offset: usize,
    size: usize,
}

impl Memory {
    /// Zero-filled memory of `size` bytes.
    pub fn with_size(size: usize) -> Self {
        Self::from_vec(vec![0; size])
    }

    /// Memory owning `bytes`.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let size = bytes.len();
        Self {
            block: Arc::new(MemoryBlock::Owned(bytes)),
            offset: 0,
            size,
        }
    }

    /// Memory holding a copy of `bytes`.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::from_vec(bytes.to_vec())
    }

    /// Wrap foreign storage without copying.
    ///
    /// The storage is never written to. It is dropped when the last memory
    /// and buffer referencing it go away.
    pub fn wrap_readonly<T>(storage: T) -> Self
    where
        T: AsRef<[u8]> + Send + Sync + 'static,
    {
        let size = storage.as_ref().len();
        Self {
            block: Arc::new(MemoryBlock::Wrapped(Box::new(storage))),
            offset: 0,
            size,
        }
    }

    /// Number of visible bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Offset of the view inside its block.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// True for wrapped read-only storage.
    pub fn is_readonly(&self) -> bool {
        matches!(*self.block, MemoryBlock::Wrapped(_))
    }

    /// True if the block is referenced by more than one memory.
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.block) > 1
    }

    /// True if both memories view the same block.
    pub fn shares_block(&self, other: &Memory) -> bool {
        Arc::ptr_eq(&self.block, &other.block)
    }

    /// The visible bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.block.as_slice()[self.offset..self.offset + self.size]
    }

    /// A new memory sharing the block, covering `offset..offset + size` of
    /// this view.
    pub fn share(&self, offset: usize, size: usize) -> Result<Memory, BufferError> {
        check_region(offset, size, self.size)?;
        Ok(Memory {
            block: Arc::clone(&self.block),
            offset: self.offset + offset,
            size,
        })
    }

    /// Narrow the view in place.
    pub fn resize(&mut self, offset: usize, size: usize) -> Result<(), BufferError> {
        check_region(offset, size, self.size)?;
        self.offset += offset;
        self.size = size;
        Ok(())
    }

    /// Writable access to the visible bytes, copying them first if the block
    /// is shared or read-only.
    pub fn make_mut(&mut self) -> &mut [u8] {
        let exclusive = matches!(Arc::get_mut(&mut self.block), Some(MemoryBlock::Owned(_)));
        if !exclusive {
            let copy = self.as_slice().to_vec();
            self.block = Arc::new(MemoryBlock::Owned(copy));
            self.offset = 0;
        }
        let (start, end) = (self.offset, self.offset + self.size);
        match Arc::get_mut(&mut self.block) {
            Some(MemoryBlock::Owned(bytes)) => &mut bytes[start..end],
            // Exclusive and owned after the copy above.
            _ => &mut [],
        }
    }

    /// Deep copy of the visible bytes into a fresh block.
    pub fn copy(&self) -> Memory {
        Memory::from_slice(self.as_slice())
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("readonly", &self.is_readonly())
            .finish()
    }
}

pub(crate) fn check_region(offset: usize, size: usize, len: usize) -> Result<(), BufferError> {
    match offset.checked_add(size) {
        Some(end) if end <= len => Ok(()),
        _ => Err(BufferError::OutOfRange { offset, size, len }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_share_views_same_block() {
        let mem = Memory::from_vec(vec![1, 2, 3, 4, 5]);
        let sub = mem.share(1, 3).unwrap();
        assert_eq!(sub.as_slice(), &[2, 3, 4]);
        assert!(sub.shares_block(&mem));
        assert!(mem.is_shared());
        assert!(matches!(
            mem.share(4, 2),
            Err(BufferError::OutOfRange { offset: 4, size: 2, len: 5 })
        ));
    }

    #[test]
    fn test_make_mut_copies_shared_block() {
        let mem = Memory::from_vec(vec![0; 4]);
        let mut other = mem.clone();
        other.make_mut()[0] = 9;
        assert_eq!(mem.as_slice(), &[0, 0, 0, 0]);
        assert_eq!(other.as_slice(), &[9, 0, 0, 0]);
        assert!(!other.shares_block(&mem));
    }

    #[test]
    fn test_make_mut_exclusive_in_place() {
        let mut mem = Memory::from_vec(vec![0; 4]);
        let before = mem.as_slice().as_ptr();
        mem.make_mut()[1] = 7;
        assert_eq!(mem.as_slice().as_ptr(), before);
    }

    struct Tracked(Vec<u8>, Arc<AtomicUsize>);

    impl AsRef<[u8]> for Tracked {
        fn as_ref(&self) -> &[u8] {
            &self.0
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.1.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_wrapped_storage_freed_once() {
        let freed = Arc::new(AtomicUsize::new(0));
        let mem = Memory::wrap_readonly(Tracked(vec![1, 2], freed.clone()));
        assert!(mem.is_readonly());
        let mut copy = mem.clone();
        copy.make_mut()[0] = 5;
        assert_eq!(mem.as_slice(), &[1, 2]);
        drop(mem);
        assert_eq!(freed.load(Ordering::SeqCst), 1);
        drop(copy);
        assert_eq!(freed.load(Ordering::SeqCst), 1);
    }
}
