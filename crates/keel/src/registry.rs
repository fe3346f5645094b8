//! # Resource Registry
//!
//! Owns one [`SplitPool`] and one [`ResourceDeletionQueue`] and ties them to
//! a frame counter. Applications create one registry per resource kind and
//! pass it explicitly to whatever needs it.
//!
//! ```text
//! frame:      0          1          2          3
//!             destroy(h)                       released
//!             │◄── frames_in_flight = 2 ──►│
//! ```
//!
//! A destroyed handle stops being alive immediately, but its storage stays
//! readable until every frame that may still reference it has ended.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use keel_core::{
    ColdRef, ConfigError, DeletionQueueConfig, Handle, HotRef, MemoryConfig,
    ResourceDeletionQueue, SplitPool, SplitPoolConfig,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::KeelResult;

/// Configuration for a [`ResourceRegistry`].
///
/// ```toml
/// name = "textures"
///
/// [split_pool]
/// capacity = 2048
///
/// [deletion_queue]
/// frames_in_flight = 3
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Label used in log output.
    pub name: String,
    /// Slot count of the backing pool.
    pub split_pool: SplitPoolConfig,
    /// Deferred deletion policy.
    pub deletion_queue: DeletionQueueConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            name: "resources".to_owned(),
            split_pool: SplitPoolConfig::default(),
            deletion_queue: DeletionQueueConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// Takes the pool and deletion settings from a full memory config.
    #[must_use]
    pub fn from_memory_config(name: impl Into<String>, memory: &MemoryConfig) -> Self {
        Self {
            name: name.into(),
            split_pool: memory.split_pool.clone(),
            deletion_queue: memory.deletion_queue.clone(),
        }
    }

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
    /// [`RegistryConfig::from_toml_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Checks the pool and queue sizes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        MemoryConfig {
            split_pool: self.split_pool.clone(),
            deletion_queue: self.deletion_queue.clone(),
            ..MemoryConfig::default()
        }
        .validate()
    }
}

/// Handles whose removal is queued but has not run yet.
type PendingSet<H> = Arc<Mutex<HashSet<Handle<H>>>>;

/// Frame-aware owner of one kind of resource.
///
/// All methods take `&self`; share the registry across threads with `Arc`.
/// [`ResourceRegistry::end_frame`] is expected to be called by one thread at
/// each frame boundary.
pub struct ResourceRegistry<THot, TCold, H = THot> {
    name: String,
    pool: Arc<SplitPool<THot, TCold, H>>,
    deletions: ResourceDeletionQueue,
    pending: PendingSet<H>,
    frame: AtomicU32,
    frames_in_flight: u32,
}

impl<THot, TCold, H> ResourceRegistry<THot, TCold, H>
where
    THot: Send + Sync + 'static,
    TCold: Send + Sync + 'static,
    H: 'static,
{
    /// Builds the pool and deletion queue described by `config`.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is out of range.
    pub fn new(config: &RegistryConfig) -> KeelResult<Self> {
        config.validate()?;
        let pool = SplitPool::new(config.split_pool.capacity)?;

        tracing::debug!(
            name = %config.name,
            capacity = config.split_pool.capacity,
            frames_in_flight = config.deletion_queue.frames_in_flight,
            "resource registry created"
        );

        Ok(Self {
            name: config.name.clone(),
            pool: Arc::new(pool),
            deletions: ResourceDeletionQueue::with_capacity(
                config.deletion_queue.initial_capacity,
            ),
            pending: Arc::new(Mutex::new(HashSet::new())),
            frame: AtomicU32::new(0),
            frames_in_flight: config.deletion_queue.frames_in_flight,
        })
    }

    /// Stores a new resource. Returns an invalid handle when the pool is full.
    pub fn create(&self, hot: THot, cold: TCold) -> Handle<H> {
        let handle = self.pool.insert(hot, cold);
        if !handle.is_valid() {
            tracing::warn!(name = %self.name, "registry full, resource not created");
        }
        handle
    }

    /// Hot data of a resource that has not been released yet.
    #[must_use]
    pub fn hot(&self, handle: Handle<H>) -> Option<HotRef<'_, THot, TCold, H>> {
        self.pool.get_hot(handle)
    }

    /// Cold data of a resource that has not been released yet.
    #[must_use]
    pub fn cold(&self, handle: Handle<H>) -> Option<ColdRef<'_, THot, TCold, H>> {
        self.pool.get_cold(handle)
    }

    /// Returns true if `handle` is live and not scheduled for destruction.
    #[must_use]
    pub fn is_alive(&self, handle: Handle<H>) -> bool {
        self.pool.contains(handle) && !self.pending.lock().contains(&handle)
    }

    /// Schedules `handle` for removal once the frames in flight have ended.
    ///
    /// Returns false if the handle is stale or already scheduled.
    pub fn destroy(&self, handle: Handle<H>) -> bool {
        if !self.pool.contains(handle) || !self.pending.lock().insert(handle) {
            return false;
        }

        let pool = Arc::clone(&self.pool);
        let pending = Arc::clone(&self.pending);
        let release_frame = self.deletions.push_with_frame(
            || self.frame().saturating_add(self.frames_in_flight),
            move || {
                // A panicking drop must not leave the handle pending forever.
                let removed = panic::catch_unwind(AssertUnwindSafe(|| pool.remove(handle)));
                pending.lock().remove(&handle);
                if let Err(payload) = removed {
                    panic::resume_unwind(payload);
                }
            },
        );

        tracing::trace!(name = %self.name, ?handle, release_frame, "resource destroy scheduled");
        true
    }

    /// Advances the frame counter and releases everything that has expired.
    ///
    /// Returns the number of resources released.
    pub fn end_frame(&self) -> usize {
        let frame = self.frame.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        self.deletions.flush(frame)
    }

    /// Releases every scheduled resource regardless of frame.
    pub fn shutdown(&self) -> usize {
        let released = self.deletions.flush_all();
        tracing::debug!(
            name = %self.name,
            released,
            remaining = self.pool.len(),
            "resource registry shut down"
        );
        released
    }

    /// Current frame number.
    #[inline]
    #[must_use]
    pub fn frame(&self) -> u32 {
        self.frame.load(Ordering::Acquire)
    }

    /// The backing pool.
    #[inline]
    #[must_use]
    pub fn pool(&self) -> &SplitPool<THot, TCold, H> {
        &self.pool
    }

    /// Resources stored, including those awaiting release.
    #[inline]
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.pool.len()
    }

    /// Resources scheduled for destruction but not yet released.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl<THot, TCold, H> std::fmt::Debug for ResourceRegistry<THot, TCold, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("name", &self.name)
            .field("frame", &self.frame.load(Ordering::Relaxed))
            .field("frames_in_flight", &self.frames_in_flight)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Extent(u32);

    fn registry(frames_in_flight: u32) -> ResourceRegistry<Extent, &'static str> {
        let mut config = RegistryConfig::default();
        config.split_pool.capacity = 32;
        config.deletion_queue.frames_in_flight = frames_in_flight;
        ResourceRegistry::new(&config).unwrap()
    }

    #[test]
    fn test_create_and_read() {
        let registry = registry(2);
        let handle = registry.create(Extent(128), "albedo");
        assert!(registry.is_alive(handle));
        assert_eq!(registry.hot(handle).map(|e| e.0), Some(128));
        assert_eq!(registry.cold(handle).map(|name| *name), Some("albedo"));
    }

    #[test]
    fn test_destroy_waits_for_frames_in_flight() {
        let registry = registry(2);
        let handle = registry.create(Extent(1), "shadow");

        assert!(registry.destroy(handle));
        assert!(!registry.is_alive(handle));
        assert_eq!(registry.pending_count(), 1);

        // Frames 1 and 2 may still be using it.
        assert_eq!(registry.end_frame(), 0);
        assert_eq!(registry.end_frame(), 0);
        assert!(registry.hot(handle).is_some());

        assert_eq!(registry.end_frame(), 1);
        assert!(registry.hot(handle).is_none());
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.pending_count(), 0);
        assert_eq!(registry.frame(), 3);
    }

    #[test]
    fn test_destroy_twice_is_rejected() {
        let registry = registry(1);
        let handle = registry.create(Extent(1), "twice");
        assert!(registry.destroy(handle));
        assert!(!registry.destroy(handle));

        registry.end_frame();
        registry.end_frame();
        assert!(!registry.destroy(handle));
    }

    #[test]
    fn test_forged_handle_is_not_alive() {
        let registry = registry(1);
        let forged = Handle::new(5, 1);
        assert!(!registry.is_alive(forged));
        assert!(!registry.destroy(forged));
        assert_eq!(registry.pending_count(), 0);
        assert_eq!(registry.live_count(), 0);
    }

    struct FailsOnDrop;

    impl Drop for FailsOnDrop {
        fn drop(&mut self) {
            panic!("resource teardown failed");
        }
    }

    #[test]
    fn test_panicking_drop_does_not_leave_pending() {
        let mut config = RegistryConfig::default();
        config.split_pool.capacity = 32;
        config.deletion_queue.frames_in_flight = 0;
        let registry: ResourceRegistry<FailsOnDrop, ()> = ResourceRegistry::new(&config).unwrap();

        let doomed = registry.create(FailsOnDrop, ());
        let kept = registry.create(FailsOnDrop, ());
        assert!(registry.destroy(doomed));
        assert_eq!(registry.end_frame(), 1);

        assert_eq!(registry.pending_count(), 0);
        assert!(!registry.is_alive(doomed));
        assert!(registry.is_alive(kept));
        std::mem::forget(registry);
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let registry = registry(8);
        let handles: Vec<_> = (0..4).map(|i| registry.create(Extent(i), "x")).collect();
        for &handle in &handles {
            registry.destroy(handle);
        }
        assert_eq!(registry.shutdown(), 4);
        assert_eq!(registry.live_count(), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = RegistryConfig::default();
        config.split_pool.capacity = 4;
        assert!(ResourceRegistry::<Extent, ()>::new(&config).is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let config = RegistryConfig::from_toml_str(
            "name = \"meshes\"\n\n[split_pool]\ncapacity = 256\n",
        )
        .unwrap();
        assert_eq!(config.name, "meshes");
        assert_eq!(config.split_pool.capacity, 256);
        assert_eq!(config.deletion_queue, DeletionQueueConfig::default());
    }

    #[test]
    fn test_config_from_memory_config() {
        let memory = MemoryConfig::default();
        let config = RegistryConfig::from_memory_config("buffers", &memory);
        assert_eq!(config.split_pool, memory.split_pool);
        assert_eq!(config.name, "buffers");
    }
}
