//! # Registry Verification
//!
//! End-to-end frame flow: worker threads create and destroy resources while a
//! frame thread reads hot data and advances the frame counter.
//!
//! Run with: cargo test -p keel --test registry_test -- --nocapture

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use keel::{Handle, RegistryConfig, ResourceRegistry};

#[derive(Debug)]
struct GpuBuffer {
    size: u64,
}

struct BufferInfo {
    label: String,
}

fn registry(capacity: usize, frames_in_flight: u32) -> Arc<ResourceRegistry<GpuBuffer, BufferInfo>> {
    let mut config = RegistryConfig::default();
    config.name = "buffers".to_owned();
    config.split_pool.capacity = capacity;
    config.deletion_queue.frames_in_flight = frames_in_flight;
    Arc::new(ResourceRegistry::new(&config).unwrap())
}

#[test]
fn verify_streaming_workers_and_frame_thread() {
    const WORKERS: usize = 4;
    const PER_WORKER: usize = 500;

    let registry = registry(4096, 2);
    let barrier = Arc::new(Barrier::new(WORKERS + 1));
    let done = Arc::new(AtomicBool::new(false));

    let frame_thread = {
        let registry = Arc::clone(&registry);
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            barrier.wait();
            let mut released = 0;
            while !done.load(Ordering::Acquire) {
                released += registry.end_frame();
                thread::yield_now();
            }
            released
        })
    };

    let workers: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..PER_WORKER {
                    let size = (worker * PER_WORKER + i) as u64;
                    let handle = registry.create(
                        GpuBuffer { size },
                        BufferInfo {
                            label: format!("w{worker}/{i}"),
                        },
                    );
                    assert!(handle.is_valid());
                    assert_eq!(registry.hot(handle).map(|b| b.size), Some(size));
                    assert!(registry.destroy(handle));
                    assert!(!registry.is_alive(handle));
                }
            })
        })
        .collect();

    for w in workers {
        w.join().unwrap();
    }
    done.store(true, Ordering::Release);
    let released_by_frames = frame_thread.join().unwrap();

    let released_at_shutdown = registry.shutdown();
    assert_eq!(released_by_frames + released_at_shutdown, WORKERS * PER_WORKER);
    assert_eq!(registry.live_count(), 0);
    assert_eq!(registry.pending_count(), 0);
}

#[test]
fn verify_stale_handle_after_slot_reuse() {
    let registry = registry(32, 0);

    let old = registry.create(
        GpuBuffer { size: 1 },
        BufferInfo {
            label: "old".into(),
        },
    );
    assert!(registry.destroy(old));
    assert_eq!(registry.end_frame(), 1);

    let fresh: Vec<Handle<GpuBuffer>> = (0..32)
        .map(|i| {
            registry.create(
                GpuBuffer { size: i },
                BufferInfo {
                    label: format!("fresh{i}"),
                },
            )
        })
        .collect();
    let reused = fresh
        .iter()
        .find(|h| h.index() == old.index())
        .copied()
        .unwrap();

    assert_ne!(reused, old);
    assert!(registry.hot(old).is_none());
    assert!(registry.cold(old).is_none());
    assert!(!registry.destroy(old));
    assert_eq!(
        registry.cold(reused).map(|info| info.label.clone()),
        Some(format!("fresh{}", registry.hot(reused).unwrap().size))
    );
}

#[test]
fn verify_registry_full() {
    let registry = registry(32, 1);
    for i in 0..32 {
        assert!(registry
            .create(GpuBuffer { size: i }, BufferInfo { label: String::new() })
            .is_valid());
    }
    let overflow = registry.create(GpuBuffer { size: 99 }, BufferInfo { label: String::new() });
    assert!(!overflow.is_valid());
    assert!(registry.hot(overflow).is_none());
}

#[test]
fn verify_config_file_loading() {
    let path = std::env::temp_dir().join(format!("keel_registry_{}.toml", std::process::id()));
    std::fs::write(
        &path,
        "name = \"textures\"\n\n[split_pool]\ncapacity = 64\n\n[deletion_queue]\nframes_in_flight = 3\n",
    )
    .unwrap();

    let config = RegistryConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.name, "textures");
    assert_eq!(config.split_pool.capacity, 64);
    assert_eq!(config.deletion_queue.frames_in_flight, 3);

    let registry: ResourceRegistry<GpuBuffer, BufferInfo> = ResourceRegistry::new(&config).unwrap();
    assert_eq!(registry.pool().capacity(), 64);
}
