//! # Core Error Types
//!
//! Only construction and configuration can fail with an error. Misuse of a
//! live data structure (stale handles, double frees, exhaustion) is logged
//! and degrades to `None`, an invalid handle or a no-op instead.

use thiserror::Error;

/// Errors raised while constructing pools and allocators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// Requested capacity is outside the range the structure supports.
    #[error("invalid capacity {requested}: must be in {min}..={max}")]
    InvalidCapacity {
        /// The capacity that was asked for.
        requested: usize,
        /// Smallest accepted capacity.
        min: usize,
        /// Largest accepted capacity.
        max: usize,
    },

    /// The global allocator could not provide the backing buffer.
    #[error("backing allocation of {size} bytes (align {align}) failed")]
    BackingAllocationFailed {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// Size and alignment do not form a valid layout.
    #[error("invalid layout: size {size}, align {align}")]
    InvalidLayout {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },
}

/// Result type for pool and allocator construction.
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid TOML for the expected schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed fine but is out of range.
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}
