use std::fmt;

use super::Buffer;
use crate::object::Shared;

/// An ordered, shared group of buffers pushed as one unit.
///
/// See [`Pad::push_list`](crate::pad::Pad::push_list).
#[derive(Clone, Default)]
pub struct BufferList(Shared<Vec<Buffer>>);

impl BufferList {
    /// Empty list.
    pub fn new() -> Self {
        Self(Shared::new(Vec::new()))
    }

    /// Append a buffer, detaching the list from other holders if needed.
    pub fn add(&mut self, buffer: Buffer) {
        self.0.make_mut().push(buffer);
    }

    /// Number of buffers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the list holds no buffer.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Buffer at `idx`.
    pub fn get(&self, idx: usize) -> Option<&Buffer> {
        self.0.get(idx)
    }

    /// Iterate in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Buffer> {
        self.0.iter()
    }

    /// Total payload size of all buffers.
    pub fn calculate_size(&self) -> usize {
        self.0.iter().map(Buffer::size).sum()
    }

    /// Number of handles sharing this list.
    pub fn ref_count(&self) -> usize {
        self.0.ref_count()
    }

    /// The buffers, cloning the vector only if it is shared.
    pub fn into_buffers(self) -> Vec<Buffer> {
        let mut shared = self.0;
        match shared.get_mut() {
            Some(buffers) => std::mem::take(buffers),
            None => shared.to_vec(),
        }
    }
}

impl FromIterator<Buffer> for BufferList {
    fn from_iter<I: IntoIterator<Item = Buffer>>(iter: I) -> Self {
        Self(Shared::new(iter.into_iter().collect()))
    }
}

impl<'a> IntoIterator for &'a BufferList {
    type Item = &'a Buffer;
    type IntoIter = std::slice::Iter<'a, Buffer>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for BufferList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_copy_on_write() {
        let mut list: BufferList = (0..3).map(|_| Buffer::new(2)).collect();
        let snapshot = list.clone();
        list.add(Buffer::new(4));
        assert_eq!(list.len(), 4);
        assert_eq!(snapshot.len(), 3);
        assert_eq!(list.calculate_size(), 10);
    }

    #[test]
    fn test_into_buffers_keeps_buffer_refs() {
        let buffer = Buffer::new(1);
        let list: BufferList = std::iter::once(buffer.clone()).collect();
        let buffers = list.into_buffers();
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffer.ref_count(), 2);
    }
}
