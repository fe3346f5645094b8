//! # KEEL Error Types

use keel_core::{ConfigError, MemoryError};
use thiserror::Error;

/// Errors raised while building a registry.
#[derive(Error, Debug)]
pub enum KeelError {
    /// A pool or allocator could not be constructed.
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    /// Configuration could not be loaded or is out of range.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for registry construction.
pub type KeelResult<T> = Result<T, KeelError>;
