//! # Cross-Thread Resource Lifetime
//!
//! ## The Problem
//!
//! ```text
//! Frame N (CPU):   destroy(texture)
//! Frame N (GPU):   still sampling texture      ← in flight
//!
//! Destroy now:     GPU reads freed memory → CRASH
//! ```
//!
//! ## The Solution
//!
//! - [`ResourceDeletionQueue`] defers destruction until the frame counter
//!   passes the last frame that could reference the resource
//! - [`RefCount`] lets shared owners agree on who destroys, without locks

mod deletion_queue;
mod ref_count;

pub use deletion_queue::{Deletor, ResourceDeletionQueue, DEFAULT_DELETION_QUEUE_CAPACITY};
pub use ref_count::{RefCount, RefCounted};
