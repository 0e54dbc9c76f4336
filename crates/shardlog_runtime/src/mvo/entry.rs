//! Cache entries.

use crate::proxy::SnapshotProxy;
use parking_lot::Mutex;
use std::sync::Arc;

/// One cached version: an immutable snapshot plus the proxies handed out
/// for it.
///
/// Entries are never mutated once created, only replaced or removed;
/// registering a proxy does not change the snapshot.
pub(crate) struct MvoCacheEntry<T> {
    base_snapshot: Arc<T>,
    /// Ties the proxies given out to the immutable state in the cache.
    snapshot_proxies: Mutex<Vec<Arc<dyn SnapshotProxy<T>>>>,
}

impl<T: Send + Sync + 'static> MvoCacheEntry<T> {
    pub(crate) fn new(base_snapshot: T) -> Self {
        Self {
            base_snapshot: Arc::new(base_snapshot),
            snapshot_proxies: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn base_snapshot(&self) -> Arc<T> {
        Arc::clone(&self.base_snapshot)
    }

    /// Registers a proxy, dropping proxies nobody else references anymore.
    pub(crate) fn register(&self, proxy: Arc<dyn SnapshotProxy<T>>) {
        let mut proxies = self.snapshot_proxies.lock();
        proxies.retain(|p| Arc::strong_count(p) > 1);
        proxies.push(proxy);
    }

    /// Number of registered proxies still referenced outside the entry.
    pub(crate) fn outstanding_proxies(&self) -> usize {
        self.snapshot_proxies
            .lock()
            .iter()
            .filter(|p| Arc::strong_count(p) > 1)
            .count()
    }
}
