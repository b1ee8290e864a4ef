//! Shared ownership handle with copy-on-write.
//!
//! [`Shared<T>`] is the refcounted handle behind [`Buffer`](crate::buffer::Buffer),
//! [`Caps`](crate::caps::Caps) and [`BufferList`](crate::buffer::BufferList).
//! Cloning the handle is a reference ("ref"), dropping it an unref. Mutation
//! requires exclusive ownership: either check [`Shared::is_writable`] and use
//! [`Shared::get_mut`], or call [`Shared::make_mut`], which deep-copies the
//! value when it is still shared.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Atomically refcounted, copy-on-write handle.
pub struct Shared<T>(Arc<T>);

impl<T> Shared<T> {
    /// Wrap a value with a refcount of one.
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Number of handles sharing the value.
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// True when this is the only handle, so mutation is allowed in place.
    #[inline]
    pub fn is_writable(&self) -> bool {
        Arc::strong_count(&self.0) == 1 && Arc::weak_count(&self.0) == 0
    }

    /// Mutable access if this handle is the sole owner.
    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        Arc::get_mut(&mut self.0)
    }

    /// True if both handles point at the same value.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Clone> Shared<T> {
    /// Mutable access, copying the value first if it is shared.
    #[inline]
    pub fn make_mut(&mut self) -> &mut T {
        Arc::make_mut(&mut self.0)
    }
}

impl<T> Clone for Shared<T> {
    #[inline]
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Deref for Shared<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: fmt::Debug> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<T: PartialEq> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || *self.0 == *other.0
    }
}

impl<T: Eq> Eq for Shared<T> {}

/// Validate an object name.
///
/// Names must be non-empty and must not contain `/` (reserved for paths in
/// bins). This is used for elements and pads alike.
pub fn name_is_valid(name: &str) -> bool {
    !name.is_empty() && !name.contains('/')
}
