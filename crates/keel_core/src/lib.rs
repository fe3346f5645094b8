//! # KEEL Core
//!
//! The resource-handle and allocation layer every engine subsystem sits on:
//! textures, buffers, shaders, meshes and materials are all stored in pools
//! defined here and referenced through [`Handle`]s.
//!
//! ## Architecture Rules
//!
//! 1. **Handles never own** - a [`Handle`] is a weak `(index, generation)` pair
//! 2. **Stale handles fail, they never alias** - every access re-checks the generation
//! 3. **Misuse degrades gracefully** - double frees and exhaustion are logged, not fatal
//! 4. **Lock-free where shared** - [`SplitPool`] and [`LockFreeIndexStack`] never block
//!
//! ## Components
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────────┐   ┌──────────────────────┐
//! │  Handle<T>   │◄──│ Pool<T, H>           │   │ ResourceDeletionQueue│
//! │ (index, gen) │   │ single-threaded      │   │ frame-deferred drops │
//! └──────▲───────┘   └──────────────────────┘   └──────────────────────┘
//!        │           ┌──────────────────────┐
//!        └───────────│ SplitPool<H, C, _>   │──► LockFreeIndexStack
//!                    │ lock-free, hot/cold  │
//!                    └──────────────────────┘
//!
//!  Allocator trait:  BinAllocator │ ArenaAllocator │ FreeListAllocator │ StandardAllocator
//! ```
//!
//! ## Example
//!
//! ```rust
//! use keel_core::Pool;
//!
//! struct Texture { width: u32 }
//!
//! let mut textures: Pool<Texture> = Pool::new();
//! let handle = textures.insert(Texture { width: 256 });
//! assert_eq!(textures.get(handle).map(|t| t.width), Some(256));
//!
//! textures.remove(handle);
//! assert!(textures.get(handle).is_none());
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod handle;
pub mod memory;
pub mod sync;

pub use config::{
    BinAllocatorConfig, DeletionQueueConfig, MemoryConfig, PoolConfig, SplitPoolConfig,
};
pub use error::{ConfigError, MemoryError, MemoryResult};
pub use handle::{decode_handles, encode_handles, Handle, PackedHandle};
pub use memory::{
    Allocator, ArenaAllocator, BinAllocator, ColdRef, FreeListAllocator, HotRef,
    LockFreeIndexStack, Pool, SplitPool, SplitRef, StandardAllocator, StorageReport,
};
pub use sync::{RefCount, RefCounted, ResourceDeletionQueue};
