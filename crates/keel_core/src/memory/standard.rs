//! # Standard Allocator
//!
//! Global-heap backend. Useful as a baseline in benchmarks and for resources
//! with no size pattern worth pooling.

#![allow(unsafe_code)]

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;

use crate::memory::allocator::Allocator;

/// Allocator that forwards to the global heap and tracks live blocks.
///
/// `invalidate` and `free` release every block still tracked, as does drop.
#[derive(Debug, Default)]
pub struct StandardAllocator {
    live: HashMap<usize, Layout>,
    freed: bool,
}

impl StandardAllocator {
    /// Creates an allocator with no live blocks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks currently handed out.
    #[inline]
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    fn release_all(&mut self) {
        for (addr, layout) in self.live.drain() {
            // SAFETY: every tracked address came from `alloc_zeroed` with
            // exactly this layout and has not been deallocated since.
            unsafe { dealloc(addr as *mut u8, layout) };
        }
    }
}

impl Allocator for StandardAllocator {
    fn allocate<T>(&mut self, size: usize) -> Option<NonNull<T>> {
        if self.freed {
            return None;
        }
        let layout = match Layout::from_size_align(size.max(1), std::mem::align_of::<T>()) {
            Ok(layout) => layout,
            Err(_) => {
                tracing::error!(size, "invalid layout for heap allocation");
                return None;
            }
        };

        // SAFETY: layout has non-zero size.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })?;
        self.live.insert(ptr.as_ptr() as usize, layout);
        Some(ptr.cast())
    }

    fn deallocate<T>(&mut self, ptr: NonNull<T>) {
        let addr = ptr.as_ptr() as usize;
        let Some(layout) = self.live.remove(&addr) else {
            tracing::error!(ptr = ?ptr, "deallocate of untracked heap pointer");
            return;
        };
        // SAFETY: the address was tracked, so it is live with this layout.
        unsafe { dealloc(addr as *mut u8, layout) };
    }

    fn invalidate(&mut self) {
        self.release_all();
    }

    fn free(&mut self) {
        self.release_all();
        self.freed = true;
    }
}

impl Drop for StandardAllocator {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::allocator::contract;

    #[test]
    fn test_tracks_live_blocks() {
        let mut heap = StandardAllocator::new();
        let a = heap.allocate::<u32>(16).unwrap();
        let _b = heap.allocate::<u32>(16).unwrap();
        assert_eq!(heap.live_count(), 2);

        heap.deallocate(a);
        assert_eq!(heap.live_count(), 1);

        // Second release is ignored.
        heap.deallocate(a);
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn test_invalidate_releases_everything() {
        let mut heap = StandardAllocator::new();
        for _ in 0..8 {
            let _ = heap.allocate::<u8>(64);
        }
        heap.invalidate();
        assert_eq!(heap.live_count(), 0);
        assert!(heap.allocate::<u8>(1).is_some());
    }

    #[test]
    fn test_allocator_contract() {
        let mut heap = StandardAllocator::new();
        contract::write_read_back(&mut heap);
        contract::free_then_allocate_fails(&mut heap);
    }
}
