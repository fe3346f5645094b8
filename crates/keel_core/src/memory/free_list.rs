//! # Free-List Allocator
//!
//! Fixed-size block allocator. Every allocation takes one block, so both
//! directions are O(1) and the arena never fragments.

use std::ptr::NonNull;

use crate::error::{MemoryError, MemoryResult};
use crate::memory::allocator::Allocator;
use crate::memory::raw::{align_up, RawBuffer, BACKING_ALIGN};

/// Allocator handing out equally sized blocks from one buffer.
///
/// Block size is rounded up to the backing alignment, so every block is
/// aligned for any type the crate stores.
///
/// # Example
///
/// ```rust
/// use keel_core::{Allocator, FreeListAllocator};
///
/// let mut blocks = FreeListAllocator::new(64, 4).unwrap();
/// let a = blocks.allocate::<[f32; 4]>(16).unwrap();
/// assert_eq!(blocks.free_count(), 3);
///
/// blocks.deallocate(a);
/// assert_eq!(blocks.free_count(), 4);
/// ```
pub struct FreeListAllocator {
    buffer: Option<RawBuffer>,
    block_size: usize,
    block_count: usize,
    /// Free block indices, next to use on top.
    free_list: Vec<u32>,
    /// Tracks which blocks are handed out, for double-free detection.
    in_use: Vec<bool>,
}

impl FreeListAllocator {
    /// Creates `block_count` blocks of at least `block_size` bytes.
    ///
    /// # Errors
    ///
    /// Fails if either argument is zero, the block count does not fit in
    /// `u32`, or the buffer cannot be allocated.
    pub fn new(block_size: usize, block_count: usize) -> MemoryResult<Self> {
        if block_count == 0 || u32::try_from(block_count).is_err() {
            return Err(MemoryError::InvalidCapacity {
                requested: block_count,
                min: 1,
                max: u32::MAX as usize,
            });
        }
        let block_size = align_up(block_size.max(1), BACKING_ALIGN);
        let total = block_size
            .checked_mul(block_count)
            .ok_or(MemoryError::InvalidLayout {
                size: usize::MAX,
                align: BACKING_ALIGN,
            })?;

        let mut allocator = Self {
            buffer: Some(RawBuffer::new(total)?),
            block_size,
            block_count,
            free_list: Vec::with_capacity(block_count),
            in_use: Vec::new(),
        };
        allocator.reset();
        Ok(allocator)
    }

    /// Size of one block in bytes, after rounding.
    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks not handed out.
    #[inline]
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    fn reset(&mut self) {
        self.free_list.clear();
        if self.buffer.is_some() {
            self.free_list.extend((0..self.block_count as u32).rev());
        }
        self.in_use.clear();
        self.in_use.resize(self.free_list.len(), false);
    }
}

impl Allocator for FreeListAllocator {
    fn allocate<T>(&mut self, size: usize) -> Option<NonNull<T>> {
        let buffer = self.buffer.as_ref()?;
        if size > self.block_size || std::mem::align_of::<T>() > BACKING_ALIGN {
            tracing::error!(size, block_size = self.block_size, "request does not fit a block");
            return None;
        }
        let Some(index) = self.free_list.pop() else {
            tracing::warn!(blocks = self.block_count, "free-list allocator exhausted");
            return None;
        };

        self.in_use[index as usize] = true;
        Some(buffer.ptr_at(index as usize * self.block_size).cast())
    }

    fn deallocate<T>(&mut self, ptr: NonNull<T>) {
        let offset = self
            .buffer
            .as_ref()
            .and_then(|buffer| buffer.offset_of(ptr.as_ptr().cast()));
        let Some(offset) = offset.filter(|offset| offset % self.block_size == 0) else {
            tracing::error!(ptr = ?ptr, "deallocate of pointer not owned by free-list allocator");
            return;
        };

        let index = offset / self.block_size;
        if !self.in_use[index] {
            tracing::error!(block = index, "double free in free-list allocator");
            return;
        }
        self.in_use[index] = false;
        self.free_list.push(index as u32);
    }

    fn invalidate(&mut self) {
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.zero();
        }
        self.reset();
    }

    fn free(&mut self) {
        self.buffer = None;
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::allocator::contract;

    #[test]
    fn test_block_size_rounded() {
        let blocks = FreeListAllocator::new(20, 4).unwrap();
        assert_eq!(blocks.block_size(), 32);
        assert!(FreeListAllocator::new(16, 0).is_err());
    }

    #[test]
    fn test_blocks_handed_out_in_order() {
        let mut blocks = FreeListAllocator::new(16, 3).unwrap();
        let a = blocks.allocate::<u8>(16).unwrap();
        let b = blocks.allocate::<u8>(16).unwrap();
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 16);
    }

    #[test]
    fn test_exhaustion_and_oversize() {
        let mut blocks = FreeListAllocator::new(16, 1).unwrap();
        assert!(blocks.allocate::<u8>(17).is_none());
        assert!(blocks.allocate::<u8>(16).is_some());
        assert!(blocks.allocate::<u8>(1).is_none());
    }

    #[test]
    fn test_double_free_detected() {
        let mut blocks = FreeListAllocator::new(16, 2).unwrap();
        let a = blocks.allocate::<u8>(8).unwrap();
        blocks.deallocate(a);
        blocks.deallocate(a);
        assert_eq!(blocks.free_count(), 2);

        // Still hands out two distinct blocks.
        let x = blocks.allocate::<u8>(8).unwrap();
        let y = blocks.allocate::<u8>(8).unwrap();
        assert_ne!(x, y);
    }

    #[test]
    fn test_interior_pointer_rejected() {
        let mut blocks = FreeListAllocator::new(16, 2).unwrap();
        let a = blocks.allocate::<u8>(8).unwrap();
        // SAFETY: still inside the same block.
        #[allow(unsafe_code)]
        let interior = unsafe { NonNull::new_unchecked(a.as_ptr().add(1)) };
        blocks.deallocate(interior);
        assert_eq!(blocks.free_count(), 1);
    }

    #[test]
    fn test_invalidate_returns_all_blocks() {
        let mut blocks = FreeListAllocator::new(16, 4).unwrap();
        for _ in 0..4 {
            let _ = blocks.allocate::<u8>(4);
        }
        blocks.invalidate();
        assert_eq!(blocks.free_count(), 4);
    }

    #[test]
    fn test_allocator_contract() {
        let mut blocks = FreeListAllocator::new(64, 2).unwrap();
        contract::write_read_back(&mut blocks);
        assert_eq!(blocks.free_count(), 2);
        contract::free_then_allocate_fails(&mut blocks);
        assert_eq!(blocks.free_count(), 0);
    }
}
