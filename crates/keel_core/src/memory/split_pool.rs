//! # Split Pool
//!
//! Fixed-capacity, lock-free pool that keeps "hot" data (touched every
//! frame) and "cold" data (touched on creation, destruction and debugging)
//! in separate parallel arrays.
//!
//! ## Safety Note
//!
//! Slots are written through `UnsafeCell`s while other threads read other
//! slots. All unsafe blocks are documented with the invariant they rely on.

#![allow(unsafe_code)]

//! ## Architecture
//!
//! ```text
//!   index:      0        1        2        3      ...  capacity-1
//!   hot:     [ THot ] [ THot ] [  --  ] [ THot ]       (iterated per frame)
//!   cold:    [TCold ] [TCold ] [  --  ] [TCold ]       (rarely touched)
//!   state:   [o|p|r|g] [o|p|r|g] [-|-|0|g] [o|p|r|g]   (AtomicU32 per slot)
//!   free:    LockFreeIndexStack ──► 2 ──► ...
//!
//!   state word = [ occupied:1 | pending:1 | readers:14 | generation:16 ]
//! ```
//!
//! ## Slot Lifecycle
//!
//! - `insert` pops a free index; that slot is exclusively owned until
//!   `occupied` is set, after its cells are written.
//! - Accessors pin the slot by bumping `readers`, but only if the slot is
//!   occupied and the generation still matches the handle. A free slot keeps
//!   its next generation, so `occupied` is what rejects handles that were
//!   never issued by this pool.
//! - `remove` advances the generation at once, so no new accessor can pin the
//!   slot. If readers are still pinned, `pending` is set and the last reader
//!   to unpin drops the contents and returns the index to the free stack.
//!
//! No operation blocks; every step is a CAS loop or a single RMW.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::error::{MemoryError, MemoryResult};
use crate::handle::Handle;
use crate::memory::lock_free::{LockFreeIndexStack, INVALID_INDEX};
use crate::memory::pool::next_generation;

/// Smallest capacity a split pool accepts.
pub const MIN_SPLIT_POOL_CAPACITY: usize = 32;

/// Largest capacity a split pool accepts.
pub const MAX_SPLIT_POOL_CAPACITY: usize = 0xFFFE;

const GENERATION_MASK: u32 = 0xFFFF;
const READER_ONE: u32 = 1 << 16;
const READER_MASK: u32 = 0x3FFF << 16;
const PENDING: u32 = 1 << 30;
const OCCUPIED: u32 = 1 << 31;

/// Occupied, not pending removal, and at `generation`.
#[inline]
const fn is_live(state: u32, generation: u16) -> bool {
    state & (OCCUPIED | PENDING) == OCCUPIED && generation_of(state) == generation
}

#[inline]
const fn generation_of(state: u32) -> u16 {
    (state & GENERATION_MASK) as u16
}

/// Concurrent pool with hot/cold data separation.
///
/// Capacity is fixed at construction: growing would require moving slots
/// other threads may be reading.
///
/// # Thread Safety
///
/// `insert`, `remove` and every accessor take `&self` and may be called from
/// any thread. A handle must reach other threads through a synchronizing
/// hand-off (channel, mutex, `Arc` clone) after `insert` returns it.
///
/// # Example
///
/// ```rust
/// use keel_core::SplitPool;
///
/// struct Transform { x: f32 }
/// struct DebugName(String);
///
/// let pool: SplitPool<Transform, DebugName> = SplitPool::new(64).unwrap();
/// let handle = pool.insert(Transform { x: 1.0 }, DebugName("crate".into()));
///
/// assert_eq!(pool.get_hot(handle).unwrap().x, 1.0);
/// assert_eq!(pool.get_cold(handle).unwrap().0, "crate");
///
/// assert!(pool.remove(handle));
/// assert!(pool.get_hot(handle).is_none());
/// ```
pub struct SplitPool<THot, TCold, H = THot> {
    hot: Box<[UnsafeCell<Option<THot>>]>,
    cold: Box<[UnsafeCell<Option<TCold>>]>,
    state: Box<[AtomicU32]>,
    free: LockFreeIndexStack,
    live: AtomicUsize,
    _handle: PhantomData<fn() -> H>,
}

// SAFETY: slot contents are only written by the thread that exclusively owns
// the slot (fresh from the free stack, or last reader out), and only shared
// references are handed out while a slot is pinned. Contents may be dropped on
// any thread, hence `Send`.
unsafe impl<THot: Send + Sync, TCold: Send + Sync, H> Sync for SplitPool<THot, TCold, H> {}

impl<THot, TCold, H> SplitPool<THot, TCold, H> {
    /// Creates a pool with `capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidCapacity`] unless
    /// `MIN_SPLIT_POOL_CAPACITY <= capacity <= MAX_SPLIT_POOL_CAPACITY`.
    pub fn new(capacity: usize) -> MemoryResult<Self> {
        if !(MIN_SPLIT_POOL_CAPACITY..=MAX_SPLIT_POOL_CAPACITY).contains(&capacity) {
            return Err(MemoryError::InvalidCapacity {
                requested: capacity,
                min: MIN_SPLIT_POOL_CAPACITY,
                max: MAX_SPLIT_POOL_CAPACITY,
            });
        }

        Ok(Self {
            hot: (0..capacity).map(|_| UnsafeCell::new(None)).collect(),
            cold: (0..capacity).map(|_| UnsafeCell::new(None)).collect(),
            state: (0..capacity).map(|_| AtomicU32::new(1)).collect(),
            free: LockFreeIndexStack::new(capacity as u16),
            live: AtomicUsize::new(0),
            _handle: PhantomData,
        })
    }

    /// Total number of slots.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.len()
    }

    /// Number of objects inserted and not yet removed.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Returns true if no object is live.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores a hot/cold pair and returns its handle.
    ///
    /// Returns an invalid handle (and logs) when every slot is in use; the
    /// values are dropped in that case.
    pub fn insert(&self, hot: THot, cold: TCold) -> Handle<H> {
        let index = self.free.pop();
        if index == INVALID_INDEX {
            tracing::warn!(capacity = self.capacity(), "split pool exhausted");
            return Handle::INVALID;
        }
        let slot = usize::from(index);

        // SAFETY: a popped index is owned by this thread alone. Its previous
        // contents were taken before it was pushed, and no accessor pins a
        // slot until `OCCUPIED` is published below.
        unsafe {
            *self.hot[slot].get() = Some(hot);
            *self.cold[slot].get() = Some(cold);
        }
        self.live.fetch_add(1, Ordering::Relaxed);

        let previous = self.state[slot].fetch_or(OCCUPIED, Ordering::Release);
        Handle::new(index, generation_of(previous))
    }

    /// Removes the object behind `handle`.
    ///
    /// Returns false for invalid or stale handles. Once this returns true,
    /// every accessor using `handle` fails, even if the slot is reused before
    /// it runs. Contents are dropped as soon as no accessor guard pins them.
    pub fn remove(&self, handle: Handle<H>) -> bool {
        let Some(slot) = self.slot_of(handle) else {
            return false;
        };

        let state = &self.state[slot];
        let mut current = state.load(Ordering::Acquire);
        loop {
            if !is_live(current, handle.generation()) {
                return false;
            }
            let readers = current & READER_MASK;
            let advanced = u32::from(next_generation(generation_of(current)));
            // With readers pinned the slot stays occupied until the last one
            // leaves; otherwise it is free from this CAS on.
            let next = if readers == 0 {
                advanced
            } else {
                advanced | readers | OCCUPIED | PENDING
            };

            match state.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    self.live.fetch_sub(1, Ordering::Relaxed);
                    if readers == 0 {
                        self.release_slot(slot);
                    }
                    return true;
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Returns true if `handle` refers to a live object.
    #[must_use]
    pub fn contains(&self, handle: Handle<H>) -> bool {
        self.slot_of(handle).is_some_and(|slot| {
            is_live(self.state[slot].load(Ordering::Acquire), handle.generation())
        })
    }

    /// Borrows the hot half of a live object.
    #[must_use]
    pub fn get_hot(&self, handle: Handle<H>) -> Option<HotRef<'_, THot, TCold, H>> {
        let pin = self.pin(handle)?;
        // SAFETY: the slot is pinned, so no thread writes its cells.
        let value = unsafe { (*self.hot[pin.slot].get()).as_ref() }?;
        Some(HotRef { value, _pin: pin })
    }

    /// Borrows the cold half of a live object.
    #[must_use]
    pub fn get_cold(&self, handle: Handle<H>) -> Option<ColdRef<'_, THot, TCold, H>> {
        let pin = self.pin(handle)?;
        // SAFETY: the slot is pinned, so no thread writes its cells.
        let value = unsafe { (*self.cold[pin.slot].get()).as_ref() }?;
        Some(ColdRef { value, _pin: pin })
    }

    /// Borrows both halves of a live object under a single pin.
    #[must_use]
    pub fn get(&self, handle: Handle<H>) -> Option<SplitRef<'_, THot, TCold, H>> {
        let pin = self.pin(handle)?;
        // SAFETY: the slot is pinned, so no thread writes its cells.
        let (hot, cold) = unsafe {
            (
                (*self.hot[pin.slot].get()).as_ref()?,
                (*self.cold[pin.slot].get()).as_ref()?,
            )
        };
        Some(SplitRef {
            hot,
            cold,
            _pin: pin,
        })
    }

    /// Mutable access to the hot half. Exclusive borrow, so no guard needed.
    pub fn get_hot_mut(&mut self, handle: Handle<H>) -> Option<&mut THot> {
        let slot = self.exclusive_slot(handle)?;
        self.hot[slot].get_mut().as_mut()
    }

    /// Mutable access to the cold half. Exclusive borrow, so no guard needed.
    pub fn get_cold_mut(&mut self, handle: Handle<H>) -> Option<&mut TCold> {
        let slot = self.exclusive_slot(handle)?;
        self.cold[slot].get_mut().as_mut()
    }

    /// Iterates over the hot array only, in slot order.
    ///
    /// Takes `&mut self` so no insert or remove can run concurrently.
    pub fn iter_hot(&mut self) -> impl Iterator<Item = (Handle<H>, &THot)> {
        self.hot
            .iter_mut()
            .zip(self.state.iter_mut())
            .enumerate()
            .filter_map(|(slot, (cell, state))| {
                let current = *state.get_mut();
                if current & (OCCUPIED | PENDING) != OCCUPIED {
                    return None;
                }
                let value: &THot = cell.get_mut().as_ref()?;
                Some((Handle::new(slot as u16, generation_of(current)), value))
            })
    }

    fn slot_of(&self, handle: Handle<H>) -> Option<usize> {
        let slot = usize::from(handle.index());
        (handle.is_valid() && slot < self.capacity()).then_some(slot)
    }

    fn exclusive_slot(&mut self, handle: Handle<H>) -> Option<usize> {
        let slot = self.slot_of(handle)?;
        is_live(*self.state[slot].get_mut(), handle.generation()).then_some(slot)
    }

    /// Registers a reader on the slot if the handle is still current.
    fn pin(&self, handle: Handle<H>) -> Option<SlotPin<'_, THot, TCold, H>> {
        let slot = self.slot_of(handle)?;
        let state = &self.state[slot];
        let mut current = state.load(Ordering::Acquire);
        loop {
            if !is_live(current, handle.generation()) {
                return None;
            }
            if current & READER_MASK == READER_MASK {
                tracing::warn!(slot, "split pool slot reader count saturated");
                return None;
            }
            match state.compare_exchange_weak(
                current,
                current + READER_ONE,
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(SlotPin { pool: self, slot }),
                Err(observed) => current = observed,
            }
        }
    }

    fn unpin(&self, slot: usize) {
        let state = &self.state[slot];
        let previous = state.fetch_sub(READER_ONE, Ordering::AcqRel);
        if previous & READER_MASK == READER_ONE && previous & PENDING != 0 {
            // Last reader of a removed slot. The generation has moved on, so
            // nobody else can pin or remove it: finish the removal here.
            state.fetch_and(!(PENDING | OCCUPIED), Ordering::AcqRel);
            self.release_slot(slot);
        }
    }

    fn release_slot(&self, slot: usize) {
        // SAFETY: called exactly once per removal, by the thread that cleared
        // `OCCUPIED` with zero readers left. No other thread can reach these
        // cells until the index is pushed below.
        unsafe {
            drop((*self.hot[slot].get()).take());
            drop((*self.cold[slot].get()).take());
        }
        self.free.push(slot as u16);
    }
}

impl<THot, TCold, H> std::fmt::Debug for SplitPool<THot, TCold, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplitPool")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

/// Keeps one slot pinned against reuse.
struct SlotPin<'a, THot, TCold, H> {
    pool: &'a SplitPool<THot, TCold, H>,
    slot: usize,
}

impl<THot, TCold, H> Drop for SlotPin<'_, THot, TCold, H> {
    fn drop(&mut self) {
        self.pool.unpin(self.slot);
    }
}

/// Shared borrow of an object's hot data. The slot is not reused while alive.
pub struct HotRef<'a, THot, TCold, H> {
    value: &'a THot,
    _pin: SlotPin<'a, THot, TCold, H>,
}

impl<THot, TCold, H> Deref for HotRef<'_, THot, TCold, H> {
    type Target = THot;

    #[inline]
    fn deref(&self) -> &THot {
        self.value
    }
}

/// Shared borrow of an object's cold data. The slot is not reused while alive.
pub struct ColdRef<'a, THot, TCold, H> {
    value: &'a TCold,
    _pin: SlotPin<'a, THot, TCold, H>,
}

impl<THot, TCold, H> Deref for ColdRef<'_, THot, TCold, H> {
    type Target = TCold;

    #[inline]
    fn deref(&self) -> &TCold {
        self.value
    }
}

/// Shared borrow of both halves of an object.
pub struct SplitRef<'a, THot, TCold, H> {
    hot: &'a THot,
    cold: &'a TCold,
    _pin: SlotPin<'a, THot, TCold, H>,
}

impl<THot, TCold, H> SplitRef<'_, THot, TCold, H> {
    /// The hot half.
    #[inline]
    #[must_use]
    pub fn hot(&self) -> &THot {
        self.hot
    }

    /// The cold half.
    #[inline]
    #[must_use]
    pub fn cold(&self) -> &TCold {
        self.cold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    struct Bounds(f32);

    #[derive(Debug, PartialEq)]
    struct Label(&'static str);

    fn pool() -> SplitPool<Bounds, Label> {
        SplitPool::new(32).unwrap()
    }

    #[test]
    fn test_capacity_bounds() {
        assert!(SplitPool::<u8, u8>::new(31).is_err());
        assert!(SplitPool::<u8, u8>::new(0xFFFF).is_err());
        assert_eq!(SplitPool::<u8, u8>::new(32).unwrap().capacity(), 32);
        assert_eq!(
            SplitPool::<u8, u8>::new(MAX_SPLIT_POOL_CAPACITY).unwrap().capacity(),
            MAX_SPLIT_POOL_CAPACITY
        );
    }

    #[test]
    fn test_insert_and_get() {
        let pool = pool();
        let handle = pool.insert(Bounds(2.0), Label("rock"));
        assert!(handle.is_valid());
        assert_eq!(handle.generation(), 1);
        assert_eq!(*pool.get_hot(handle).unwrap(), Bounds(2.0));
        assert_eq!(*pool.get_cold(handle).unwrap(), Label("rock"));

        let both = pool.get(handle).unwrap();
        assert_eq!(both.hot(), &Bounds(2.0));
        assert_eq!(both.cold(), &Label("rock"));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_stale_handle_fails_after_reuse() {
        let pool = pool();
        let old = pool.insert(Bounds(1.0), Label("old"));
        assert!(pool.remove(old));

        // Drain so the freed index is certainly reused.
        let fresh: Vec<_> = (0..32).map(|_| pool.insert(Bounds(0.0), Label("new"))).collect();
        assert!(fresh.iter().all(|h| h.is_valid()));
        assert!(fresh.iter().any(|h| h.index() == old.index()));

        assert!(pool.get_hot(old).is_none());
        assert!(pool.get_cold(old).is_none());
        assert!(pool.get(old).is_none());
        assert!(!pool.remove(old));
    }

    #[test]
    fn test_exhaustion_returns_invalid() {
        let pool = pool();
        for _ in 0..32 {
            assert!(pool.insert(Bounds(0.0), Label("x")).is_valid());
        }
        assert!(!pool.insert(Bounds(0.0), Label("overflow")).is_valid());
        assert_eq!(pool.len(), 32);
    }

    #[test]
    fn test_remove_while_pinned_defers_reuse() {
        let pool = pool();
        let handle = pool.insert(Bounds(5.0), Label("pinned"));

        let guard = pool.get_hot(handle).unwrap();
        assert!(pool.remove(handle));

        // Handle is dead for new accessors, but the guard still reads.
        assert!(pool.get_hot(handle).is_none());
        assert!(!pool.contains(handle));
        assert_eq!(*guard, Bounds(5.0));

        // The slot is not back on the free stack yet.
        let others: Vec<_> = (0..32).map(|_| pool.insert(Bounds(0.0), Label("o"))).collect();
        assert_eq!(others.iter().filter(|h| h.is_valid()).count(), 31);
        assert!(others
            .iter()
            .filter(|h| h.is_valid())
            .all(|h| h.index() != handle.index()));

        drop(guard);
        let reused = pool.insert(Bounds(6.0), Label("reused"));
        assert_eq!(reused.index(), handle.index());
        assert_eq!(reused.generation(), 2);
    }

    #[test]
    fn test_contents_dropped_on_remove() {
        let tracker = Arc::new(());
        let pool: SplitPool<Arc<()>, ()> = SplitPool::new(32).unwrap();
        let handle = pool.insert(Arc::clone(&tracker), ());
        assert_eq!(Arc::strong_count(&tracker), 2);

        pool.remove(handle);
        assert_eq!(Arc::strong_count(&tracker), 1);
    }

    #[test]
    fn test_mutable_access_and_hot_iteration() {
        let mut pool = pool();
        let a = pool.insert(Bounds(1.0), Label("a"));
        let b = pool.insert(Bounds(2.0), Label("b"));
        pool.remove(b);

        pool.get_hot_mut(a).unwrap().0 = 10.0;
        pool.get_cold_mut(a).unwrap().0 = "renamed";
        assert!(pool.get_hot_mut(b).is_none());

        let hot: Vec<_> = pool.iter_hot().collect();
        assert_eq!(hot.len(), 1);
        assert_eq!(hot[0].0, a);
        assert_eq!(hot[0].1, &Bounds(10.0));
        assert_eq!(*pool.get_cold(a).unwrap(), Label("renamed"));
    }

    #[test]
    fn test_forged_handle_to_free_slot_ignored() {
        let pool: SplitPool<u32, u32> = SplitPool::new(32).unwrap();
        let forged = Handle::new(5, 1);
        assert!(!pool.contains(forged));
        assert!(pool.get_hot(forged).is_none());
        assert!(pool.get(forged).is_none());
        assert!(!pool.remove(forged));
        assert_eq!(pool.len(), 0);

        // The free stack is intact: every index is handed out exactly once.
        let handles: Vec<_> = (0..32).map(|i| pool.insert(i, i)).collect();
        let indices: std::collections::HashSet<u16> = handles.iter().map(|h| h.index()).collect();
        assert!(handles.iter().all(|h| h.is_valid()));
        assert_eq!(indices.len(), 32);
        assert_eq!(pool.len(), 32);
    }

    #[test]
    fn test_next_generation_of_removed_slot_not_live() {
        let mut pool = pool();
        let handle = pool.insert(Bounds(1.0), Label("gone"));
        assert!(pool.remove(handle));

        let ahead = Handle::new(handle.index(), next_generation(handle.generation()));
        assert!(!pool.contains(ahead));
        assert!(!pool.remove(ahead));
        assert!(pool.get_hot_mut(ahead).is_none());
        assert_eq!(pool.iter_hot().count(), 0);

        let reused = pool.insert(Bounds(2.0), Label("new"));
        assert_eq!(reused, ahead);
        assert!(pool.contains(reused));
    }

    #[test]
    fn test_invalid_and_out_of_range_handles() {
        let pool = pool();
        assert!(pool.get_hot(Handle::INVALID).is_none());
        assert!(pool.get_hot(Handle::new(500, 1)).is_none());
        assert!(!pool.remove(Handle::new(500, 1)));
    }
}
