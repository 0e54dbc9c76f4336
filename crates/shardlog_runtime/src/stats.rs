//! MVO cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing the MVO cache and its background workers.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct MvoCacheStats {
    // Lookups
    /// Exact-version lookups that found a snapshot.
    hits: AtomicU64,
    /// Exact-version lookups that missed.
    misses: AtomicU64,
    /// Floor lookups that found a snapshot.
    floor_hits: AtomicU64,
    /// Floor lookups that missed.
    floor_misses: AtomicU64,

    // Mutations
    /// Snapshots inserted.
    puts: AtomicU64,
    /// Versions removed by prefix eviction.
    versions_evicted: AtomicU64,

    // Eviction worker
    /// Eviction notifications queued for the worker.
    eviction_notifications: AtomicU64,
    /// Eviction notifications diverted to the overflow map because the
    /// queue was full.
    eviction_notifications_overflowed: AtomicU64,

    // Sync worker
    /// Completed sync passes.
    sync_runs: AtomicU64,
    /// Objects refreshed by sync.
    objects_synced: AtomicU64,
    /// Failed tail queries or object refreshes.
    sync_failures: AtomicU64,
}

impl MvoCacheStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_floor_hit(&self) {
        self.floor_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_floor_miss(&self) {
        self.floor_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_versions_evicted(&self, count: usize) {
        self.versions_evicted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction_notification(&self) {
        self.eviction_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overflowed_notification(&self) {
        self.eviction_notifications_overflowed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sync_run(&self, synced: usize) {
        self.sync_runs.fetch_add(1, Ordering::Relaxed);
        self.objects_synced
            .fetch_add(synced as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_sync_failure(&self) {
        self.sync_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of exact-version hits.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Returns the number of exact-version misses.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Returns the number of floor hits.
    pub fn floor_hits(&self) -> u64 {
        self.floor_hits.load(Ordering::Relaxed)
    }

    /// Returns the number of floor misses.
    pub fn floor_misses(&self) -> u64 {
        self.floor_misses.load(Ordering::Relaxed)
    }

    /// Returns the number of inserted snapshots.
    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Returns the number of versions removed by prefix eviction.
    pub fn versions_evicted(&self) -> u64 {
        self.versions_evicted.load(Ordering::Relaxed)
    }

    /// Returns the number of queued eviction notifications.
    pub fn eviction_notifications(&self) -> u64 {
        self.eviction_notifications.load(Ordering::Relaxed)
    }

    /// Returns the number of eviction notifications that found the queue
    /// full.
    ///
    /// A non-zero value means the eviction worker is falling behind. The
    /// notifications are not lost: they are merged per object and picked up
    /// by the worker's next batch.
    pub fn eviction_notifications_overflowed(&self) -> u64 {
        self.eviction_notifications_overflowed.load(Ordering::Relaxed)
    }

    /// Returns the number of completed sync passes.
    pub fn sync_runs(&self) -> u64 {
        self.sync_runs.load(Ordering::Relaxed)
    }

    /// Returns the number of objects refreshed by sync.
    pub fn objects_synced(&self) -> u64 {
        self.objects_synced.load(Ordering::Relaxed)
    }

    /// Returns the number of sync failures.
    pub fn sync_failures(&self) -> u64 {
        self.sync_failures.load(Ordering::Relaxed)
    }

    /// Returns the exact-version hit ratio, or 0.0 before any lookup.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
