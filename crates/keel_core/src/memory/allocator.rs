//! # Allocation Strategy Trait
//!
//! Common contract for every byte allocator in the crate. Call sites are
//! generic over [`Allocator`] and monomorphized, so switching strategy costs
//! nothing in the hot path.

use std::ptr::NonNull;

/// A byte allocator handing out typed pointers.
///
/// `size` is always in bytes. Implementations round it to `align_of::<T>()`
/// and return a pointer aligned for `T`, or `None` when they cannot satisfy
/// the request (which they also log).
///
/// Misuse - freeing a foreign pointer, freeing twice - is logged and ignored,
/// never a panic.
pub trait Allocator {
    /// Allocates `size` bytes suitable for `T`.
    fn allocate<T>(&mut self, size: usize) -> Option<NonNull<T>>;

    /// Returns an allocation made by this allocator.
    fn deallocate<T>(&mut self, ptr: NonNull<T>);

    /// Forgets every allocation but keeps the backing memory.
    ///
    /// Outstanding pointers must not be used afterwards.
    fn invalidate(&mut self);

    /// Releases the backing memory. Later allocations fail until the
    /// allocator is re-initialized.
    fn free(&mut self);
}
