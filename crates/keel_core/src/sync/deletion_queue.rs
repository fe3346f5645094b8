//! # Frame-Deferred Deletion Queue
//!
//! GPU resources may still be referenced by frames in flight when the CPU
//! side drops them. Destruction is therefore queued with the frame number
//! after which it becomes safe, and run once the frame counter passes it.
//!
//! ```text
//!   push(5, a)  push(5, b)  push(7, c)
//!   ┌──────┬──────┬──────┬──────┐
//!   │ 5: a │ 5: b │ 7: c │      │   head = 0, len = 3
//!   └──────┴──────┴──────┴──────┘
//!
//!   flush(6) → runs a, b   (5 < 6), stops at c
//!   flush(8) → runs c
//! ```
//!
//! Frames must be pushed in non-decreasing order; `flush` stops scanning at
//! the first entry that is not ready yet. Producers that derive the frame
//! from a shared counter use [`ResourceDeletionQueue::push_with_frame`], which
//! reads it under the queue lock.
//!
//! A panicking deletor is logged and skipped; the rest of the batch still
//! runs.

use std::panic::{self, AssertUnwindSafe};

use parking_lot::Mutex;

/// Default ring capacity.
pub const DEFAULT_DELETION_QUEUE_CAPACITY: usize = 64;

/// A queued destruction closure.
pub type Deletor = Box<dyn FnOnce() + Send + 'static>;

struct DeleteItem {
    frame: u32,
    deletor: Deletor,
}

/// Growable ring of pending deletions. Only touched under the mutex.
struct Ring {
    slots: Vec<Option<DeleteItem>>,
    head: usize,
    len: usize,
}

impl Ring {
    fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, item: DeleteItem) {
        if self.len == self.slots.len() {
            self.grow();
        }
        let tail = (self.head + self.len) % self.slots.len();
        self.slots[tail] = Some(item);
        self.len += 1;
    }

    /// Doubles the ring, laying the entries out again from slot 0.
    fn grow(&mut self) {
        let new_capacity = (self.slots.len() * 2).max(1);
        let mut slots: Vec<Option<DeleteItem>> = Vec::with_capacity(new_capacity);
        for i in 0..self.len {
            let index = (self.head + i) % self.slots.len();
            slots.push(self.slots[index].take());
        }
        slots.resize_with(new_capacity, || None);

        tracing::debug!(
            old = self.slots.len(),
            new = new_capacity,
            "deletion queue grew"
        );
        self.slots = slots;
        self.head = 0;
    }

    /// Moves every entry with `frame < current_frame` off the front.
    fn drain_ready(&mut self, current_frame: u32, out: &mut Vec<Deletor>) {
        while self.len > 0 {
            let slot = &mut self.slots[self.head];
            match slot {
                Some(item) if item.frame < current_frame => {}
                _ => break,
            }
            if let Some(item) = slot.take() {
                out.push(item.deletor);
            }
            self.head = (self.head + 1) % self.slots.len();
            self.len -= 1;
        }
    }

    fn drain_all(&mut self, out: &mut Vec<Deletor>) {
        while self.len > 0 {
            if let Some(item) = self.slots[self.head].take() {
                out.push(item.deletor);
            }
            self.head = (self.head + 1) % self.slots.len();
            self.len -= 1;
        }
    }
}

/// Multi-producer queue of frame-tagged deletion closures.
///
/// # Thread Safety
///
/// `push` may be called from any thread. `flush` holds the lock only while
/// collecting ready entries; the deletors run after it is released, so a
/// deletor may itself push more work.
pub struct ResourceDeletionQueue {
    ring: Mutex<Ring>,
}

impl ResourceDeletionQueue {
    /// Creates a queue with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_DELETION_QUEUE_CAPACITY)
    }

    /// Creates a queue with room for `capacity` entries before growing.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring::with_capacity(capacity.max(1))),
        }
    }

    /// Queues `deletor` to run once the frame counter passes `frame`.
    pub fn push<F>(&self, frame: u32, deletor: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.ring.lock().push(DeleteItem {
            frame,
            deletor: Box::new(deletor),
        });
    }

    /// Queues `deletor` for the frame returned by `frame`, which is called
    /// with the queue locked. Returns that frame.
    ///
    /// Producers racing on a monotonic frame counter therefore enqueue in
    /// non-decreasing frame order.
    pub fn push_with_frame<R, F>(&self, frame: R, deletor: F) -> u32
    where
        R: FnOnce() -> u32,
        F: FnOnce() + Send + 'static,
    {
        let mut ring = self.ring.lock();
        let frame = frame();
        ring.push(DeleteItem {
            frame,
            deletor: Box::new(deletor),
        });
        frame
    }

    /// Runs every deletor queued for a frame before `current_frame`.
    ///
    /// Returns the number of deletors executed.
    pub fn flush(&self, current_frame: u32) -> usize {
        let mut ready = Vec::new();
        self.ring.lock().drain_ready(current_frame, &mut ready);
        let count = run_deletors(ready);

        if count > 0 {
            tracing::trace!(current_frame, count, "deletion queue flushed");
        }
        count
    }

    /// Runs everything regardless of frame, including deletors queued by
    /// other deletors while flushing. Used at shutdown.
    pub fn flush_all(&self) -> usize {
        let mut total = 0;
        loop {
            let mut batch = Vec::new();
            self.ring.lock().drain_all(&mut batch);
            if batch.is_empty() {
                break;
            }
            total += run_deletors(batch);
        }

        tracing::debug!(count = total, "deletion queue drained");
        total
    }

    /// Number of pending entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.lock().len
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current ring capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.lock().slots.len()
    }
}

/// Runs each deletor outside the lock. Returns how many ran.
fn run_deletors(batch: Vec<Deletor>) -> usize {
    let count = batch.len();
    for deletor in batch {
        if panic::catch_unwind(AssertUnwindSafe(deletor)).is_err() {
            tracing::error!("deletor panicked; continuing with the rest of the batch");
        }
    }
    count
}

impl Default for ResourceDeletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResourceDeletionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("ResourceDeletionQueue")
            .field("len", &ring.len)
            .field("capacity", &ring.slots.len())
            .finish()
    }
}
