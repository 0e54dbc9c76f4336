//! Sequencer cache statistics.
//!
//! The conflict cache is single-threaded, but its statistics are read by
//! whatever exports them, so every counter is atomic and the cache hands
//! out a shared handle.

use std::sync::atomic::{AtomicU64, Ordering};

/// Gauges and counters describing the conflict cache.
#[derive(Debug, Default)]
pub struct SequencerStats {
    /// Number of conflict keys currently tracked.
    conflict_keys: AtomicU64,
    /// Number of distinct addresses in the resolution window.
    window_size: AtomicU64,
    /// Total conflict keys evicted, by capacity or by trim.
    evicted_keys: AtomicU64,
    /// Total addresses (whole buckets) evicted.
    evicted_addresses: AtomicU64,
    /// Total transactions resolved as committed.
    commits: AtomicU64,
    /// Total transactions resolved as aborted.
    aborts: AtomicU64,
}

impl SequencerStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_sizes(&self, conflict_keys: usize, window_size: usize) {
        self.conflict_keys
            .store(conflict_keys as u64, Ordering::Relaxed);
        self.window_size.store(window_size as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self, keys: usize) {
        self.evicted_keys.fetch_add(keys as u64, Ordering::Relaxed);
        self.evicted_addresses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of tracked conflict keys.
    pub fn conflict_keys(&self) -> u64 {
        self.conflict_keys.load(Ordering::Relaxed)
    }

    /// Returns the number of addresses in the resolution window.
    pub fn window_size(&self) -> u64 {
        self.window_size.load(Ordering::Relaxed)
    }

    /// Returns the total number of evicted conflict keys.
    pub fn evicted_keys(&self) -> u64 {
        self.evicted_keys.load(Ordering::Relaxed)
    }

    /// Returns the total number of evicted addresses.
    pub fn evicted_addresses(&self) -> u64 {
        self.evicted_addresses.load(Ordering::Relaxed)
    }

    /// Returns the number of committed resolutions.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Returns the number of aborted resolutions.
    pub fn aborts(&self) -> u64 {
        self.aborts.load(Ordering::Relaxed)
    }
}
