//! MVO cache configuration.

use crate::error::{RuntimeError, RuntimeResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest accepted `cache_expiry`: 1000 years, the bound of the snapshot
/// cache's expiry timer.
pub const MAX_CACHE_EXPIRY: Duration = Duration::from_secs(1000 * 365 * 24 * 60 * 60);

/// Configuration for the multi-version object cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MvoCacheConfig {
    /// Maximum number of cached snapshots.
    pub max_cache_entries: u64,

    /// Idle and live expiry of a cached snapshot.
    pub cache_expiry: Duration,

    /// How often hot objects are synced to the log tail (0 = never).
    pub background_sync_period: Duration,

    /// Capacity of the queue between cache evictions and the eviction worker.
    pub eviction_queue_capacity: usize,

    /// Maximum number of eviction notifications coalesced per batch.
    pub eviction_batch_size: usize,
}

impl Default for MvoCacheConfig {
    fn default() -> Self {
        Self {
            max_cache_entries: 2_500,
            cache_expiry: Duration::from_secs(300),
            background_sync_period: Duration::from_secs(30),
            eviction_queue_capacity: 4_096,
            eviction_batch_size: 256,
        }
    }
}

impl MvoCacheConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of cached snapshots.
    #[must_use]
    pub const fn max_cache_entries(mut self, entries: u64) -> Self {
        self.max_cache_entries = entries;
        self
    }

    /// Sets the snapshot expiry.
    #[must_use]
    pub const fn cache_expiry(mut self, expiry: Duration) -> Self {
        self.cache_expiry = expiry;
        self
    }

    /// Sets the background sync period. `Duration::ZERO` disables sync.
    #[must_use]
    pub const fn background_sync_period(mut self, period: Duration) -> Self {
        self.background_sync_period = period;
        self
    }

    /// Sets the eviction queue capacity.
    #[must_use]
    pub const fn eviction_queue_capacity(mut self, capacity: usize) -> Self {
        self.eviction_queue_capacity = capacity;
        self
    }

    /// Sets the eviction batch size.
    #[must_use]
    pub const fn eviction_batch_size(mut self, size: usize) -> Self {
        self.eviction_batch_size = size;
        self
    }

    /// Returns true if background sync is enabled.
    #[must_use]
    pub fn sync_enabled(&self) -> bool {
        !self.background_sync_period.is_zero()
    }

    /// Checks that every bound is usable.
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.max_cache_entries == 0 {
            return Err(RuntimeError::invalid_config(
                "max_cache_entries must be positive",
            ));
        }
        if self.cache_expiry.is_zero() {
            return Err(RuntimeError::invalid_config("cache_expiry must be positive"));
        }
        if self.cache_expiry > MAX_CACHE_EXPIRY {
            return Err(RuntimeError::invalid_config(
                "cache_expiry must not exceed 1000 years",
            ));
        }
        if self.eviction_queue_capacity == 0 {
            return Err(RuntimeError::invalid_config(
                "eviction_queue_capacity must be positive",
            ));
        }
        if self.eviction_batch_size == 0 {
            return Err(RuntimeError::invalid_config(
                "eviction_batch_size must be positive",
            ));
        }
        Ok(())
    }
}
