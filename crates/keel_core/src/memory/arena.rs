//! # Arena Allocator
//!
//! A bump allocator for transient allocations that are released all at once.

use std::ptr::NonNull;

use crate::error::MemoryResult;
use crate::memory::allocator::Allocator;
use crate::memory::raw::{align_up, RawBuffer, BACKING_ALIGN};

/// A bump-pointer arena allocator.
///
/// Allocations are fast (just bump an offset). Individual deallocation is a
/// no-op; memory comes back all at once on [`Allocator::invalidate`].
///
/// # Thread Safety
///
/// This arena is NOT thread-safe. Use one arena per thread.
///
/// # Example
///
/// ```rust
/// use keel_core::{Allocator, ArenaAllocator};
///
/// let mut arena = ArenaAllocator::new(1024 * 1024).unwrap(); // 1MB
///
/// let data = arena.allocate::<f32>(1000 * 4).unwrap();
/// assert!(arena.used() >= 4000);
///
/// // Rewind to free all allocations
/// arena.invalidate();
/// assert_eq!(arena.used(), 0);
/// # let _ = data;
/// ```
pub struct ArenaAllocator {
    buffer: Option<RawBuffer>,
    /// Current allocation offset.
    offset: usize,
}

impl ArenaAllocator {
    /// Creates a new arena with the specified capacity in bytes.
    ///
    /// # Errors
    ///
    /// Fails if `capacity` is zero or cannot be allocated.
    pub fn new(capacity: usize) -> MemoryResult<Self> {
        Ok(Self {
            buffer: Some(RawBuffer::new(capacity)?),
            offset: 0,
        })
    }

    /// Returns the total capacity in bytes (0 once freed).
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.as_ref().map_or(0, RawBuffer::len)
    }

    /// Returns the current used space in bytes, including alignment padding.
    #[inline]
    #[must_use]
    pub const fn used(&self) -> usize {
        self.offset
    }

    /// Returns the remaining free space in bytes.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.offset
    }
}

impl Allocator for ArenaAllocator {
    fn allocate<T>(&mut self, size: usize) -> Option<NonNull<T>> {
        let buffer = self.buffer.as_ref()?;
        let align = std::mem::align_of::<T>();
        if align > BACKING_ALIGN {
            tracing::error!(align, "arena alignment above backing alignment");
            return None;
        }

        let size = align_up(size, align);
        let start = align_up(buffer.base_addr() + self.offset, align) - buffer.base_addr();
        let end = start.checked_add(size)?;
        if end > buffer.len() {
            tracing::warn!(size, remaining = self.remaining(), "arena exhausted");
            return None;
        }

        self.offset = end;
        Some(buffer.ptr_at(start).cast())
    }

    fn deallocate<T>(&mut self, _ptr: NonNull<T>) {
        // Memory is reclaimed by `invalidate`.
    }

    fn invalidate(&mut self) {
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.zero();
        }
        self.offset = 0;
    }

    fn free(&mut self) {
        self.buffer = None;
        self.offset = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::allocator::contract;

    #[test]
    fn test_arena_allocation() {
        let mut arena = ArenaAllocator::new(1024).unwrap();
        let a = arena.allocate::<u8>(10).unwrap();
        let b = arena.allocate::<u8>(10).unwrap();
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 10);
        assert_eq!(arena.used(), 20);
    }

    #[test]
    fn test_arena_alignment_padding() {
        let mut arena = ArenaAllocator::new(1024).unwrap();
        let _ = arena.allocate::<u8>(3).unwrap();
        let wide = arena.allocate::<u64>(8).unwrap();
        assert_eq!(wide.as_ptr() as usize % 8, 0);
        assert_eq!(arena.used(), 16);
    }

    #[test]
    fn test_arena_exhaustion() {
        let mut arena = ArenaAllocator::new(64).unwrap();
        assert!(arena.allocate::<u8>(64).is_some());
        assert!(arena.allocate::<u8>(1).is_none());
        assert_eq!(arena.remaining(), 0);
    }

    #[test]
    fn test_arena_invalidate() {
        let mut arena = ArenaAllocator::new(1024).unwrap();
        let _ = arena.allocate::<f32>(40).unwrap();
        assert!(arena.used() > 0);

        arena.invalidate();
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.remaining(), 1024);
    }

    #[test]
    fn test_allocator_contract() {
        let mut arena = ArenaAllocator::new(1024).unwrap();
        contract::write_read_back(&mut arena);
        contract::free_then_allocate_fails(&mut arena);
        assert_eq!(arena.capacity(), 0);
    }
}
