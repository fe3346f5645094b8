//! # Memory Management
//!
//! Handle-addressed pools and byte allocators for engine resources.
//!
//! ## Design Philosophy
//!
//! Resources are created and destroyed constantly, but their storage is
//! reused rather than returned to the heap:
//! - Slots are recycled through free lists, never shifted
//! - Stale handles are rejected by generation checks
//! - Byte allocators carve one pre-allocated buffer

mod allocator;
mod arena;
mod bin;
mod free_list;
mod lock_free;
mod pool;
pub(crate) mod raw;
mod split_pool;
mod standard;

pub use allocator::Allocator;
pub use arena::ArenaAllocator;
pub use bin::{
    small_float, BinAllocator, StorageReport, BINS_PER_LEAF, DEFAULT_MAX_ALLOCS, NUM_LEAF_BINS,
    NUM_TOP_BINS,
};
pub use free_list::FreeListAllocator;
pub use lock_free::{LockFreeIndexStack, INVALID_INDEX};
pub use pool::{Pool, DEFAULT_POOL_CAPACITY, MAX_POOL_SLOTS};
pub use raw::BACKING_ALIGN;
pub use split_pool::{
    ColdRef, HotRef, SplitPool, SplitRef, MAX_SPLIT_POOL_CAPACITY, MIN_SPLIT_POOL_CAPACITY,
};
pub use standard::StandardAllocator;
