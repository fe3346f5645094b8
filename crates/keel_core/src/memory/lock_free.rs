//! # Lock-Free Index Stack
//!
//! Treiber stack of `u16` slot indices with an ABA tag in the head word.
//!
//! ```text
//! head: AtomicU32 = [ tag:16 | index:16 ]
//!
//!   head ──► 4 ──► 1 ──► 7 ──► INVALID
//!            next[4]=1, next[1]=7, next[7]=0xFFFF
//! ```
//!
//! Every successful push or pop bumps the tag, so a head that was popped,
//! reused and pushed back between another thread's load and CAS no longer
//! compares equal and that CAS retries.

use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};

/// Terminates the free chain and signals an empty stack.
pub const INVALID_INDEX: u16 = 0xFFFF;

#[inline]
const fn pack(index: u16, tag: u16) -> u32 {
    ((tag as u32) << 16) | index as u32
}

#[inline]
const fn unpack(head: u32) -> (u16, u16) {
    (head as u16, (head >> 16) as u16)
}

/// Concurrent free-list of indices `0..count`.
///
/// # Thread Safety
///
/// `pop` and `push` are lock-free and may be called from any number of
/// threads. An index must only be pushed by the thread that popped it.
pub struct LockFreeIndexStack {
    head: AtomicU32,
    next: Box<[AtomicU16]>,
}

impl LockFreeIndexStack {
    /// Creates a stack holding every index `0..count`, lowest on top.
    ///
    /// # Panics
    ///
    /// Panics if `count` does not fit below [`INVALID_INDEX`].
    #[must_use]
    pub fn new(count: u16) -> Self {
        assert!(count < INVALID_INDEX, "index stack capacity must be below 0xFFFF");

        let next: Box<[AtomicU16]> = (0..count)
            .map(|i| {
                let successor = if i + 1 < count { i + 1 } else { INVALID_INDEX };
                AtomicU16::new(successor)
            })
            .collect();
        let first = if count == 0 { INVALID_INDEX } else { 0 };

        Self {
            head: AtomicU32::new(pack(first, 0)),
            next,
        }
    }

    /// Number of indices the stack was built over.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.next.len()
    }

    /// Returns true if no index is currently available.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        unpack(self.head.load(Ordering::Acquire)).0 == INVALID_INDEX
    }

    /// Takes an index, or returns [`INVALID_INDEX`] if the stack is empty.
    pub fn pop(&self) -> u16 {
        let mut current = self.head.load(Ordering::Acquire);
        loop {
            let (index, tag) = unpack(current);
            if index == INVALID_INDEX {
                return INVALID_INDEX;
            }
            // May be stale if `index` was popped concurrently; the tag makes
            // the CAS below fail in that case.
            let next = self.next[usize::from(index)].load(Ordering::Relaxed);

            match self.head.compare_exchange_weak(
                current,
                pack(next, tag.wrapping_add(1)),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return index,
                Err(observed) => current = observed,
            }
        }
    }

    /// Returns `index` to the stack.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn push(&self, index: u16) {
        let slot = &self.next[usize::from(index)];
        let mut current = self.head.load(Ordering::Acquire);
        loop {
            let (top, tag) = unpack(current);
            slot.store(top, Ordering::Relaxed);

            match self.head.compare_exchange_weak(
                current,
                pack(index, tag.wrapping_add(1)),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Walks the chain and counts the available indices.
    ///
    /// Diagnostic only: the walk is not atomic with respect to concurrent
    /// pushes and pops, so call it while the stack is quiescent.
    #[must_use]
    pub fn non_invalid_count(&self) -> usize {
        let (mut index, _) = unpack(self.head.load(Ordering::Acquire));
        let mut count = 0;
        while index != INVALID_INDEX && count <= self.capacity() {
            count += 1;
            index = self.next[usize::from(index)].load(Ordering::Relaxed);
        }
        count
    }
}

impl std::fmt::Debug for LockFreeIndexStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (top, tag) = unpack(self.head.load(Ordering::Relaxed));
        f.debug_struct("LockFreeIndexStack")
            .field("top", &top)
            .field("tag", &tag)
            .field("capacity", &self.capacity())
            .finish()
    }
}
