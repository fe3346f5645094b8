//! # Generational Pool
//!
//! Growable slot array for objects that are frequently inserted and removed
//! from a single thread.

use crate::handle::Handle;

/// Largest number of slots a pool can hold. Index `0xFFFF` is never issued.
pub const MAX_POOL_SLOTS: usize = u16::MAX as usize;

/// Slot count used by [`Pool::new`].
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// A single-threaded pool addressed by generation-checked handles.
///
/// Objects live in one contiguous array. Removing an object bumps its slot's
/// generation, so every handle issued for the old occupant stops resolving
/// even after the slot is reused.
///
/// `H` is the handle tag; it defaults to `T` but lets several pools with the
/// same storage type hand out distinct handle types.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. Use [`SplitPool`](super::SplitPool) when
/// slots are inserted or removed from worker threads.
///
/// # Example
///
/// ```rust
/// use keel_core::Pool;
///
/// struct Mesh { vertex_count: u32 }
///
/// let mut meshes: Pool<Mesh> = Pool::with_capacity(16);
///
/// let handle = meshes.insert(Mesh { vertex_count: 3 });
/// assert_eq!(meshes.get(handle).unwrap().vertex_count, 3);
///
/// let removed = meshes.remove(handle);
/// assert!(removed.is_some());
/// assert!(meshes.get(handle).is_none()); // stale now
/// ```
pub struct Pool<T, H = T> {
    /// The storage array.
    storage: Vec<Option<T>>,
    /// Current generation of every slot. Starts at 1.
    generations: Vec<u16>,
    /// Free list - indices of available slots, next to use on top.
    free_list: Vec<u16>,
    /// Number of occupied slots.
    len: usize,
    _handle: std::marker::PhantomData<fn() -> H>,
}

impl<T, H> Pool<T, H> {
    /// Creates a pool with [`DEFAULT_POOL_CAPACITY`] slots.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    /// Creates a pool with room for `capacity` objects before the first growth.
    ///
    /// The capacity is clamped to `1..=MAX_POOL_SLOTS`.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_POOL_SLOTS);
        let mut pool = Self {
            storage: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            len: 0,
            _handle: std::marker::PhantomData,
        };
        pool.grow_to(capacity);
        pool
    }

    /// Returns the number of slots currently backed by storage.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Returns the number of live objects.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the pool holds no objects.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores `value` and returns its handle.
    ///
    /// Doubles the backing arrays when no slot is free. Only fails - with a
    /// logged error and an invalid handle - once all [`MAX_POOL_SLOTS`]
    /// indices are live.
    pub fn insert(&mut self, value: T) -> Handle<H> {
        if self.free_list.is_empty() {
            let capacity = self.capacity();
            if capacity >= MAX_POOL_SLOTS {
                tracing::error!(capacity, "pool index space exhausted");
                return Handle::INVALID;
            }
            let new_capacity = (capacity * 2).min(MAX_POOL_SLOTS);
            tracing::debug!(from = capacity, to = new_capacity, "growing pool");
            self.grow_to(new_capacity);
        }

        let Some(index) = self.free_list.pop() else {
            return Handle::INVALID;
        };
        let slot = usize::from(index);
        self.storage[slot] = Some(value);
        self.len += 1;

        Handle::new(index, self.generations[slot])
    }

    /// Removes the object behind `handle` and returns it.
    ///
    /// Invalid and stale handles are ignored and return `None`.
    pub fn remove(&mut self, handle: Handle<H>) -> Option<T> {
        let slot = self.live_slot(handle)?;
        let value = self.storage[slot].take();

        self.generations[slot] = next_generation(self.generations[slot]);
        self.free_list.push(handle.index());
        self.len -= 1;

        value
    }

    /// Gets a reference to a live object.
    #[inline]
    #[must_use]
    pub fn get(&self, handle: Handle<H>) -> Option<&T> {
        let slot = self.live_slot(handle)?;
        self.storage[slot].as_ref()
    }

    /// Gets a mutable reference to a live object.
    #[inline]
    pub fn get_mut(&mut self, handle: Handle<H>) -> Option<&mut T> {
        let slot = self.live_slot(handle)?;
        self.storage[slot].as_mut()
    }

    /// Returns true if `handle` resolves to a live object.
    #[inline]
    #[must_use]
    pub fn contains(&self, handle: Handle<H>) -> bool {
        self.live_slot(handle).is_some()
    }

    /// Rebuilds the handle of the object stored at `index`.
    ///
    /// Returns an invalid handle if the index is out of range or unoccupied.
    #[must_use]
    pub fn get_handle_from_index(&self, index: u16) -> Handle<H> {
        let slot = usize::from(index);
        match self.storage.get(slot) {
            Some(Some(_)) => Handle::new(index, self.generations[slot]),
            _ => Handle::INVALID,
        }
    }

    /// Removes every object. All outstanding handles become stale.
    ///
    /// Storage is kept, nothing is reallocated.
    pub fn clear(&mut self) {
        for (slot, value) in self.storage.iter_mut().enumerate() {
            if value.take().is_some() {
                self.generations[slot] = next_generation(self.generations[slot]);
            }
        }
        self.free_list.clear();
        self.free_list.extend((0..self.capacity() as u16).rev());
        self.len = 0;
    }

    /// Iterates over all live objects with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<H>, &T)> {
        self.storage
            .iter()
            .zip(&self.generations)
            .enumerate()
            .filter_map(|(slot, (value, &generation))| {
                value
                    .as_ref()
                    .map(|v| (Handle::new(slot as u16, generation), v))
            })
    }

    /// Iterates mutably over all live objects with their handles.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<H>, &mut T)> {
        self.storage
            .iter_mut()
            .zip(&self.generations)
            .enumerate()
            .filter_map(|(slot, (value, &generation))| {
                value
                    .as_mut()
                    .map(|v| (Handle::new(slot as u16, generation), v))
            })
    }

    fn live_slot(&self, handle: Handle<H>) -> Option<usize> {
        if !handle.is_valid() {
            return None;
        }
        let slot = usize::from(handle.index());
        let occupied = matches!(self.storage.get(slot), Some(Some(_)));
        (occupied && self.generations[slot] == handle.generation()).then_some(slot)
    }

    /// Extends the arrays to `new_capacity` slots. Existing generations are
    /// kept; new slots start at generation 1.
    fn grow_to(&mut self, new_capacity: usize) {
        let old_capacity = self.capacity();
        self.storage.resize_with(new_capacity, || None);
        self.generations.resize(new_capacity, 1);
        // Lowest new index on top so slots fill in order.
        self.free_list
            .extend((old_capacity as u16..new_capacity as u16).rev());
    }
}

impl<T, H> Default for Pool<T, H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Advances a generation, skipping 0 so a reissued slot never produces the
/// invalid handle.
#[inline]
pub(crate) const fn next_generation(generation: u16) -> u16 {
    match generation.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}
