//! Stress tests for the caches.
//!
//! These runners drive heavy and concurrent workloads and report what they
//! did; assertions on the outcome are left to the calling test.

use shardlog_common::{Address, ObjectId, StreamId};
use shardlog_runtime::{MvoCache, SnapshotProxy, SnapshotReferenceProxy, VersionedObjectIdentifier};
use shardlog_sequencer::{ConflictKey, SequencerConflictCache};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Number of distinct objects or streams.
    pub objects: usize,
    /// Conflict keys written per commit.
    pub keys_per_commit: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            objects: 64,
            keys_per_commit: 4,
        }
    }
}

/// Commits random-looking write sets to a conflict cache at increasing
/// addresses.
///
/// An operation fails if `put` errors or the cache exceeds its capacity
/// afterwards.
pub fn stress_conflict_cache(capacity: usize, config: &StressConfig) -> StressTestResult {
    let Ok(mut cache) = SequencerConflictCache::new(capacity, Address::ZERO) else {
        return StressTestResult::new(0, config.operations, Duration::ZERO);
    };

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let keys: HashSet<ConflictKey> = (0..config.keys_per_commit)
            .map(|k| {
                let n = (i * 31 + k * 17) % (config.objects * 8);
                ConflictKey::new(
                    StreamId::from_u128((n % config.objects) as u128),
                    (n as u64).to_be_bytes().to_vec(),
                )
            })
            .collect();

        match cache.put(keys, Address::new(i as u64 + 1)) {
            Ok(()) if cache.size() <= cache.capacity() => successful += 1,
            _ => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Runs concurrent puts, lookups and prefix evictions against a cache.
///
/// Each thread owns a disjoint set of objects and writes increasing
/// versions. A lookup fails if it returns a snapshot for the wrong version.
pub fn stress_concurrent_mvo_cache(
    cache: Arc<MvoCache<u64>>,
    config: &StressConfig,
) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads.max(1);
    let objects_per_thread = (config.objects / config.threads.max(1)).max(1);

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let object = ObjectId::from_u128((t * objects_per_thread + i % objects_per_thread) as u128);
                    let version = (i / objects_per_thread) as u64;
                    let vo_id = VersionedObjectIdentifier::new(object, Address::new(version));

                    let ok = match i % 4 {
                        0 | 1 => {
                            cache.put(vo_id, version);
                            true
                        }
                        2 => cache
                            .floor_entry(&vo_id, SnapshotReferenceProxy::generate)
                            .is_none_or(|proxy| {
                                *proxy.snapshot() == proxy.vo_id().version().as_u64()
                                    && proxy.vo_id().version() <= vo_id.version()
                            }),
                        _ => {
                            if version > 2 {
                                cache.prefix_evict(&vo_id.with_version(Address::new(version - 2)));
                            }
                            true
                        }
                    };

                    if ok {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        if handle.join().is_err() {
            failed.fetch_add(ops_per_thread, Ordering::Relaxed);
        }
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}
