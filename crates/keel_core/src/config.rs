//! # Memory Configuration
//!
//! Sizes for every pool and allocator, loadable from TOML. Missing tables and
//! fields fall back to their defaults:
//!
//! ```toml
//! [pool]
//! initial_capacity = 128
//!
//! [split_pool]
//! capacity = 8192
//!
//! [bin_allocator]
//! size_bytes = 33554432
//! max_allocs = 8192
//!
//! [deletion_queue]
//! initial_capacity = 64
//! frames_in_flight = 3
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::memory::{
    DEFAULT_MAX_ALLOCS, DEFAULT_POOL_CAPACITY, MAX_POOL_SLOTS, MAX_SPLIT_POOL_CAPACITY,
    MIN_SPLIT_POOL_CAPACITY,
};
use crate::sync::DEFAULT_DELETION_QUEUE_CAPACITY;

/// Configuration for [`Pool`](crate::Pool).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Slots allocated up front.
    pub initial_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

/// Configuration for [`SplitPool`](crate::SplitPool).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitPoolConfig {
    /// Fixed slot count. The pool never grows.
    pub capacity: usize,
}

impl Default for SplitPoolConfig {
    fn default() -> Self {
        Self { capacity: 4096 }
    }
}

/// Configuration for [`BinAllocator`](crate::BinAllocator).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinAllocatorConfig {
    /// Backing arena size in bytes.
    pub size_bytes: u32,
    /// Maximum number of live nodes (allocations plus free regions).
    pub max_allocs: u32,
}

impl Default for BinAllocatorConfig {
    fn default() -> Self {
        Self {
            size_bytes: 16 * 1024 * 1024, // 16 MiB
            max_allocs: DEFAULT_MAX_ALLOCS,
        }
    }
}

/// Configuration for [`ResourceDeletionQueue`](crate::ResourceDeletionQueue).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeletionQueueConfig {
    /// Ring capacity before the first growth.
    pub initial_capacity: usize,
    /// Frames the GPU may lag behind the CPU. A resource destroyed at frame
    /// `n` is released once frame `n + frames_in_flight` has passed.
    pub frames_in_flight: u32,
}

impl Default for DeletionQueueConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_DELETION_QUEUE_CAPACITY,
            frames_in_flight: 2,
        }
    }
}

/// Complete memory configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Single-threaded pools.
    pub pool: PoolConfig,
    /// Lock-free split pools.
    pub split_pool: SplitPoolConfig,
    /// General-purpose byte allocator.
    pub bin_allocator: BinAllocatorConfig,
    /// Frame-deferred deletion.
    pub deletion_queue: DeletionQueueConfig,
}

impl MemoryConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed input and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`MemoryConfig::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&source)?;
        tracing::debug!(path = %path.display(), "loaded memory config");
        Ok(config)
    }

    /// Checks every value against the limits of the structure it sizes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.initial_capacity == 0 || self.pool.initial_capacity > MAX_POOL_SLOTS {
            return Err(invalid(
                "pool.initial_capacity",
                format!("must be in 1..={MAX_POOL_SLOTS}"),
            ));
        }
        if !(MIN_SPLIT_POOL_CAPACITY..=MAX_SPLIT_POOL_CAPACITY).contains(&self.split_pool.capacity)
        {
            return Err(invalid(
                "split_pool.capacity",
                format!("must be in {MIN_SPLIT_POOL_CAPACITY}..={MAX_SPLIT_POOL_CAPACITY}"),
            ));
        }
        if self.bin_allocator.size_bytes == 0 {
            return Err(invalid("bin_allocator.size_bytes", "must be non-zero".into()));
        }
        if self.bin_allocator.max_allocs < 2 {
            return Err(invalid("bin_allocator.max_allocs", "must be at least 2".into()));
        }
        if self.deletion_queue.initial_capacity == 0 {
            return Err(invalid(
                "deletion_queue.initial_capacity",
                "must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}
