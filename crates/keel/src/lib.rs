//! # KEEL
//!
//! Resource handles and pools wired to the frame loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    ResourceRegistry                      │
//! │                                                          │
//! │  create ──► SplitPool<Hot, Cold> ◄── hot / cold / alive  │
//! │                    ▲                                     │
//! │  destroy ──► ResourceDeletionQueue (frame + in flight)   │
//! │                    │                                     │
//! │  end_frame ──► frame += 1, flush ──► SplitPool::remove   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `error`: Umbrella error type
//! - `registry`: Registry and its configuration
//!
//! ## Example
//!
//! ```rust
//! use keel::{RegistryConfig, ResourceRegistry};
//!
//! struct Extent { width: u32, height: u32 }
//! struct DebugName(String);
//!
//! let registry: ResourceRegistry<Extent, DebugName> =
//!     ResourceRegistry::new(&RegistryConfig::default()).unwrap();
//!
//! let texture = registry.create(Extent { width: 64, height: 64 }, DebugName("albedo".into()));
//! assert_eq!(registry.hot(texture).map(|e| e.width), Some(64));
//!
//! registry.destroy(texture);
//! assert!(!registry.is_alive(texture));
//!
//! // Released once the frames that might still use it have passed.
//! assert_eq!(registry.end_frame(), 0);
//! assert_eq!(registry.end_frame(), 0);
//! assert_eq!(registry.end_frame(), 1);
//! assert_eq!(registry.live_count(), 0);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
pub mod registry;

// Re-export the core
pub use keel_core as core;

pub use error::{KeelError, KeelResult};
pub use keel_core::{Handle, MemoryConfig, PackedHandle};
pub use registry::{RegistryConfig, ResourceRegistry};
