//! # Raw Backing Buffer
//!
//! Owned, zero-initialized, over-aligned byte buffer shared by the
//! arena-backed allocators.
//!
//! ## Safety Note
//!
//! This is the only place that talks to the global allocator for arena
//! storage. Every other allocator works in offsets and asks this type for
//! pointers.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{MemoryError, MemoryResult};

/// Alignment of every backing buffer. Covers every primitive and SIMD type
/// the engine stores in sub-allocations.
pub const BACKING_ALIGN: usize = 16;

/// Heap buffer owned by an allocator.
pub(crate) struct RawBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl RawBuffer {
    /// Allocates `size` zeroed bytes aligned to [`BACKING_ALIGN`].
    pub(crate) fn new(size: usize) -> MemoryResult<Self> {
        if size == 0 {
            return Err(MemoryError::InvalidCapacity {
                requested: 0,
                min: 1,
                max: isize::MAX as usize,
            });
        }
        let layout = Layout::from_size_align(size, BACKING_ALIGN).map_err(|_| {
            MemoryError::InvalidLayout {
                size,
                align: BACKING_ALIGN,
            }
        })?;

        // SAFETY: layout has non-zero size (checked above).
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(MemoryError::BackingAllocationFailed {
            size,
            align: BACKING_ALIGN,
        })?;

        Ok(Self { ptr, layout })
    }

    /// Buffer length in bytes.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.layout.size()
    }

    /// Pointer to the byte at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is past the end of the buffer.
    #[inline]
    pub(crate) fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(offset <= self.len(), "offset {offset} out of bounds");
        // SAFETY: offset is within (or one past) the allocation.
        unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset)) }
    }

    /// Address of the first byte. Used for alignment arithmetic.
    #[inline]
    pub(crate) fn base_addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Maps a pointer back to its byte offset, if it lies inside the buffer.
    #[inline]
    pub(crate) fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        let addr = ptr as usize;
        let base = self.base_addr();
        (addr >= base && addr < base + self.len()).then(|| addr - base)
    }

    /// Overwrites the whole buffer with zeroes.
    pub(crate) fn zero(&mut self) {
        // SAFETY: we own `len` writable bytes starting at `ptr`.
        unsafe { self.ptr.as_ptr().write_bytes(0, self.len()) };
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with exactly this layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// SAFETY: RawBuffer uniquely owns its allocation, like Box<[u8]>.
unsafe impl Send for RawBuffer {}
// SAFETY: shared access only exposes addresses; writes need &mut self.
unsafe impl Sync for RawBuffer {}

/// Rounds `value` up to the next multiple of `align` (a power of two).
#[inline]
pub(crate) const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
