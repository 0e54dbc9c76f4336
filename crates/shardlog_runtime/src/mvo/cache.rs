//! The MVO cache.

use crate::config::MvoCacheConfig;
use crate::error::RuntimeResult;
use crate::mvo::entry::MvoCacheEntry;
use crate::mvo::eviction::{EvictionListener, MvoCacheEviction};
use crate::mvo::sync::MvoCacheSync;
use crate::object::{MultiVersionObject, StreamTailSource, VersionedObjectIdentifier};
use crate::proxy::SnapshotProxy;
use crate::stats::MvoCacheStats;
use dashmap::DashMap;
use moka::notification::RemovalCause;
use moka::sync::Cache;
use parking_lot::Mutex;
use shardlog_common::{Address, ObjectId};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Sorted versions of one object, guarded by that object's lock.
pub(crate) type VersionSet = Arc<Mutex<BTreeSet<Address>>>;

/// State shared between the cache handle and its background workers.
pub(crate) struct CacheState<T> {
    /// Strong references to every cached snapshot.
    object_cache: Cache<VersionedObjectIdentifier, Arc<MvoCacheEntry<T>>>,
    /// Versions of each object, used for floor lookups. Modifications for
    /// one object are serialized by its own lock.
    object_versions: DashMap<ObjectId, VersionSet>,
    /// Every opened object, keyed by id.
    all_mvos: DashMap<ObjectId, Arc<dyn MultiVersionObject>>,
    stats: Arc<MvoCacheStats>,
}

impl<T: Send + Sync + 'static> CacheState<T> {
    /// Returns the version set of an object without creating it.
    ///
    /// The set is cloned out so the map shard is not held while locking.
    fn versions(&self, object_id: &ObjectId) -> Option<VersionSet> {
        self.object_versions
            .get(object_id)
            .map(|versions| Arc::clone(versions.value()))
    }

    fn versions_or_create(&self, object_id: ObjectId) -> VersionSet {
        Arc::clone(
            self.object_versions
                .entry(object_id)
                .or_insert_with(|| Arc::new(Mutex::new(BTreeSet::new())))
                .value(),
        )
    }

    pub(crate) fn put(&self, vo_id: VersionedObjectIdentifier, versioned_object: T) {
        let versions = self.versions_or_create(vo_id.object_id());
        let mut versions = versions.lock();
        self.object_cache
            .insert(vo_id, Arc::new(MvoCacheEntry::new(versioned_object)));
        versions.insert(vo_id.version());
        self.stats.record_put();
    }

    pub(crate) fn prefix_evict(&self, vo_id: &VersionedObjectIdentifier) -> usize {
        let Some(versions) = self.versions(&vo_id.object_id()) else {
            return 0;
        };

        let mut versions = versions.lock();
        // Inclusive, so the index and the cache agree on the evicted range.
        let evicted: Vec<Address> = versions.range(..=vo_id.version()).copied().collect();
        for version in &evicted {
            self.object_cache.invalidate(&vo_id.with_version(*version));
        }
        match vo_id.version().checked_add(1) {
            Some(next) => *versions = versions.split_off(&next),
            None => versions.clear(),
        }
        drop(versions);

        if !evicted.is_empty() {
            debug!(vo_id = %vo_id, count = evicted.len(), "prefixEvict");
        }
        self.stats.record_versions_evicted(evicted.len());
        evicted.len()
    }

    pub(crate) fn latest_version(&self, object_id: &ObjectId) -> Option<Address> {
        self.versions(object_id)
            .and_then(|versions| versions.lock().last().copied())
    }

    pub(crate) fn registered_mvos(&self) -> Vec<(ObjectId, Arc<dyn MultiVersionObject>)> {
        self.all_mvos
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect()
    }

    pub(crate) fn stats(&self) -> &MvoCacheStats {
        &self.stats
    }
}

/// Concurrent cache of materialized object snapshots at specific versions.
///
/// Holds strong references to every cached snapshot, a sorted index of the
/// versions of each object, and the registry of opened objects. Bounded by
/// entry count and expiry; evictions are reconciled with the version index
/// in the background.
///
/// Operations on the same object are serialized by a per-object lock;
/// operations on different objects run in parallel. No operation performs
/// I/O: a miss is reported to the caller, who replays the log and `put`s
/// the result.
pub struct MvoCache<T: Send + Sync + 'static> {
    pub(super) state: Arc<CacheState<T>>,
    eviction: MvoCacheEviction,
    sync: Option<MvoCacheSync>,
}

impl<T: Send + Sync + 'static> MvoCache<T> {
    /// Creates the cache and starts its background workers.
    ///
    /// `tail_source` is queried by the background sync to find objects that
    /// fell behind the log.
    pub fn new(
        config: MvoCacheConfig,
        tail_source: Arc<dyn StreamTailSource>,
    ) -> RuntimeResult<Self> {
        config.validate()?;

        let stats = Arc::new(MvoCacheStats::new());
        let (listener, queue) =
            EvictionListener::channel(config.eviction_queue_capacity, Arc::clone(&stats));

        let object_cache = Cache::builder()
            .max_capacity(config.max_cache_entries)
            .time_to_idle(config.cache_expiry)
            .time_to_live(config.cache_expiry)
            .eviction_listener(
                move |vo_id: Arc<VersionedObjectIdentifier>,
                      _entry: Arc<MvoCacheEntry<T>>,
                      cause: RemovalCause| {
                    listener.on_removal(&vo_id, cause);
                },
            )
            .build();

        let state = Arc::new(CacheState {
            object_cache,
            object_versions: DashMap::new(),
            all_mvos: DashMap::new(),
            stats,
        });

        let evicting = Arc::clone(&state);
        let eviction = MvoCacheEviction::start(
            queue,
            config.eviction_batch_size,
            move |vo_id| evicting.prefix_evict(&vo_id),
        )?;

        let sync = if config.sync_enabled() {
            Some(MvoCacheSync::start(
                Arc::clone(&state),
                tail_source,
                config.background_sync_period,
            )?)
        } else {
            None
        };

        Ok(Self {
            state,
            eviction,
            sync,
        })
    }

    /// Caches `versioned_object` as the snapshot at `vo_id`.
    ///
    /// Replaces any snapshot cached for the exact same identifier.
    pub fn put(&self, vo_id: VersionedObjectIdentifier, versioned_object: T) {
        self.state.put(vo_id, versioned_object);
    }

    /// Returns a proxy for the snapshot cached at exactly `vo_id`.
    ///
    /// `snapshot_proxy_fn` wraps the cached snapshot; proxies that reference
    /// it directly are registered with the entry. `None` is a cache miss.
    pub fn get<P, F>(&self, vo_id: &VersionedObjectIdentifier, snapshot_proxy_fn: F) -> Option<Arc<P>>
    where
        P: SnapshotProxy<T> + 'static,
        F: FnOnce(VersionedObjectIdentifier, Arc<T>) -> Arc<P>,
    {
        let Some(entry) = self.state.object_cache.get(vo_id) else {
            self.state.stats.record_miss();
            return None;
        };

        let proxy = snapshot_proxy_fn(*vo_id, entry.base_snapshot());
        if proxy.holds_snapshot_reference() {
            entry.register(proxy.clone());
        }
        self.state.stats.record_hit();
        Some(proxy)
    }

    /// Returns a proxy for the greatest cached version of the object that is
    /// not above `vo_id.version()`.
    ///
    /// If that version is indexed but its snapshot has already been evicted,
    /// returns `None` instead of falling back to an older version: serving
    /// an earlier snapshot would skip versions. Callers replay the log.
    pub fn floor_entry<P, F>(
        &self,
        vo_id: &VersionedObjectIdentifier,
        snapshot_proxy_fn: F,
    ) -> Option<Arc<P>>
    where
        P: SnapshotProxy<T> + 'static,
        F: FnOnce(VersionedObjectIdentifier, Arc<T>) -> Arc<P>,
    {
        let proxy = self.floor_entry_inner(vo_id, snapshot_proxy_fn);
        if proxy.is_some() {
            self.state.stats.record_floor_hit();
        } else {
            self.state.stats.record_floor_miss();
        }
        proxy
    }

    fn floor_entry_inner<P, F>(
        &self,
        vo_id: &VersionedObjectIdentifier,
        snapshot_proxy_fn: F,
    ) -> Option<Arc<P>>
    where
        P: SnapshotProxy<T> + 'static,
        F: FnOnce(VersionedObjectIdentifier, Arc<T>) -> Arc<P>,
    {
        // The object has not been cached.
        let versions = self.state.versions(&vo_id.object_id())?;
        let versions = versions.lock();

        let floor_version = versions.range(..=vo_id.version()).next_back().copied()?;
        let floor_id = vo_id.with_version(floor_version);

        // Eviction reaches the version index asynchronously, so the floor
        // may already be gone from the cache.
        let entry = self.state.object_cache.get(&floor_id)?;

        let proxy = snapshot_proxy_fn(floor_id, entry.base_snapshot());
        entry.register(proxy.clone());
        Some(proxy)
    }

    /// Returns true if a snapshot is cached at exactly `vo_id`.
    #[must_use]
    pub fn contains_key(&self, vo_id: &VersionedObjectIdentifier) -> bool {
        self.state.object_cache.contains_key(vo_id)
    }

    /// Returns true if any version of the object has been indexed.
    ///
    /// Based on the version index, so it can be true after the object's
    /// snapshots were evicted; pair it with `get` when live data is needed.
    #[must_use]
    pub fn contains_object(&self, object_id: &ObjectId) -> bool {
        self.state.object_versions.contains_key(object_id)
    }

    /// Evicts every version of `vo_id.object_id()` up to and including
    /// `vo_id.version()`, from both the cache and the version index.
    ///
    /// Returns the number of versions evicted.
    pub fn prefix_evict(&self, vo_id: &VersionedObjectIdentifier) -> usize {
        self.state.prefix_evict(vo_id)
    }

    /// Registers the live wrapper that regenerates `object_id` on a miss.
    ///
    /// The first registration wins; later ones are ignored.
    pub fn register_mvo(&self, object_id: ObjectId, mvo: Arc<dyn MultiVersionObject>) {
        self.state.all_mvos.entry(object_id).or_insert(mvo);
    }

    /// Returns the registered wrapper of `object_id`.
    #[must_use]
    pub fn mvo(&self, object_id: &ObjectId) -> Option<Arc<dyn MultiVersionObject>> {
        self.state
            .all_mvos
            .get(object_id)
            .map(|mvo| Arc::clone(mvo.value()))
    }

    /// Returns the indexed versions of `object_id`, oldest first.
    #[must_use]
    pub fn versions_of(&self, object_id: &ObjectId) -> Vec<Address> {
        self.state
            .versions(object_id)
            .map(|versions| versions.lock().iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the number of live proxies registered for the snapshot at
    /// `vo_id`, or `None` if it is not cached.
    #[must_use]
    pub fn outstanding_proxies(&self, vo_id: &VersionedObjectIdentifier) -> Option<usize> {
        self.state
            .object_cache
            .get(vo_id)
            .map(|entry| entry.outstanding_proxies())
    }

    /// Returns every cached identifier. Intended for tests and diagnostics.
    #[must_use]
    pub fn key_set(&self) -> HashSet<VersionedObjectIdentifier> {
        self.state
            .object_cache
            .iter()
            .map(|(vo_id, _)| *vo_id)
            .collect()
    }

    /// Returns the approximate number of cached snapshots.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.state.object_cache.entry_count()
    }

    /// Runs the snapshot cache's pending maintenance, applying any due size
    /// or time based evictions now.
    pub fn run_pending_tasks(&self) {
        self.state.object_cache.run_pending_tasks();
    }

    /// Returns the cache statistics.
    #[must_use]
    pub fn stats(&self) -> &MvoCacheStats {
        &self.state.stats
    }

    /// Returns the eviction worker.
    #[must_use]
    pub fn eviction(&self) -> &MvoCacheEviction {
        &self.eviction
    }

    /// Returns the sync worker, if background sync is enabled.
    #[must_use]
    pub fn sync(&self) -> Option<&MvoCacheSync> {
        self.sync.as_ref()
    }

    /// Stops the background workers without waiting for them.
    ///
    /// In-flight work finishes; nothing new is scheduled. Cache operations
    /// keep working, but evictions are no longer reconciled.
    pub fn shutdown(&self) {
        if let Some(sync) = &self.sync {
            sync.shutdown();
        }
        self.eviction.shutdown();
    }
}

impl<T: Send + Sync + 'static> Drop for MvoCache<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<T: Send + Sync + 'static> std::fmt::Debug for MvoCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MvoCache")
            .field("entries", &self.entry_count())
            .field("objects", &self.state.object_versions.len())
            .field("registered_mvos", &self.state.all_mvos.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use crate::proxy::{MaterializedSnapshotProxy, SnapshotReferenceProxy};
    use std::collections::HashMap;
    use std::time::Duration;

    struct NoTails;

    impl StreamTailSource for NoTails {
        fn stream_tails(
            &self,
            _object_ids: &[ObjectId],
        ) -> RuntimeResult<HashMap<ObjectId, Address>> {
            Err(RuntimeError::stream_tails("not connected"))
        }
    }

    fn cache() -> MvoCache<String> {
        let config = MvoCacheConfig::new()
            .max_cache_entries(1_000)
            .background_sync_period(Duration::ZERO);
        MvoCache::new(config, Arc::new(NoTails)).unwrap()
    }

    fn vo_id(object: u128, version: u64) -> VersionedObjectIdentifier {
        VersionedObjectIdentifier::new(ObjectId::from_u128(object), Address::new(version))
    }

    #[test]
    fn rejects_invalid_config() {
        let config = MvoCacheConfig::new().max_cache_entries(0);
        assert!(matches!(
            MvoCache::<String>::new(config, Arc::new(NoTails)),
            Err(RuntimeError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn put_then_get() {
        let cache = cache();
        cache.put(vo_id(1, 5), "v5".to_string());

        let proxy = cache
            .get(&vo_id(1, 5), SnapshotReferenceProxy::generate)
            .unwrap();
        assert_eq!(proxy.snapshot(), "v5");
        assert_eq!(proxy.vo_id(), vo_id(1, 5));
        assert_eq!(cache.stats().hits(), 1);
    }

    #[test]
    fn get_miss_is_none() {
        let cache = cache();
        cache.put(vo_id(1, 5), "v5".to_string());
        assert!(cache
            .get(&vo_id(1, 6), SnapshotReferenceProxy::generate)
            .is_none());
        assert!(cache
            .get(&vo_id(2, 5), SnapshotReferenceProxy::generate)
            .is_none());
        assert_eq!(cache.stats().misses(), 2);
    }

    #[test]
    fn put_replaces_same_version() {
        let cache = cache();
        cache.put(vo_id(1, 5), "old".to_string());
        cache.put(vo_id(1, 5), "new".to_string());

        let proxy = cache
            .get(&vo_id(1, 5), SnapshotReferenceProxy::generate)
            .unwrap();
        assert_eq!(proxy.snapshot(), "new");
        assert_eq!(cache.versions_of(&ObjectId::from_u128(1)), vec![Address::new(5)]);
    }

    #[test]
    fn only_reference_proxies_are_registered_on_get() {
        let cache = cache();
        cache.put(vo_id(1, 5), "v5".to_string());

        let copy = cache
            .get(&vo_id(1, 5), MaterializedSnapshotProxy::generate)
            .unwrap();
        assert_eq!(cache.outstanding_proxies(&vo_id(1, 5)), Some(0));

        let reference = cache
            .get(&vo_id(1, 5), SnapshotReferenceProxy::generate)
            .unwrap();
        assert_eq!(cache.outstanding_proxies(&vo_id(1, 5)), Some(1));

        drop(reference);
        drop(copy);
        assert_eq!(cache.outstanding_proxies(&vo_id(1, 5)), Some(0));
    }

    #[test]
    fn floor_entry_scenario() {
        let cache = cache();
        let object = ObjectId::from_u128(1);
        cache.put(vo_id(1, 5), "v5".to_string());
        cache.put(vo_id(1, 15), "v15".to_string());

        let proxy = cache
            .floor_entry(&vo_id(1, 12), SnapshotReferenceProxy::generate)
            .unwrap();
        assert_eq!(proxy.snapshot(), "v5");
        assert_eq!(proxy.vo_id(), vo_id(1, 5));

        assert_eq!(cache.prefix_evict(&vo_id(1, 10)), 1);
        assert!(cache
            .floor_entry(&vo_id(1, 12), SnapshotReferenceProxy::generate)
            .is_none());
        assert!(cache.contains_key(&vo_id(1, 15)));
        assert_eq!(cache.versions_of(&object), vec![Address::new(15)]);
    }

    #[test]
    fn floor_entry_exact_and_below_first() {
        let cache = cache();
        cache.put(vo_id(1, 5), "v5".to_string());
        cache.put(vo_id(1, 15), "v15".to_string());

        let exact = cache
            .floor_entry(&vo_id(1, 15), SnapshotReferenceProxy::generate)
            .unwrap();
        assert_eq!(exact.snapshot(), "v15");

        assert!(cache
            .floor_entry(&vo_id(1, 4), SnapshotReferenceProxy::generate)
            .is_none());
        assert!(cache
            .floor_entry(&vo_id(2, 100), SnapshotReferenceProxy::generate)
            .is_none());
    }

    #[test]
    fn floor_entry_does_not_fall_back_past_evicted_floor() {
        let cache = cache();
        cache.put(vo_id(1, 5), "v5".to_string());
        cache.put(vo_id(1, 10), "v10".to_string());

        // Remove the snapshot but leave the index, as a pending eviction would.
        cache.state.object_cache.invalidate(&vo_id(1, 10));
        assert_eq!(
            cache.versions_of(&ObjectId::from_u128(1)),
            vec![Address::new(5), Address::new(10)]
        );

        assert!(cache
            .floor_entry(&vo_id(1, 12), SnapshotReferenceProxy::generate)
            .is_none());
        assert_eq!(cache.stats().floor_misses(), 1);
    }

    #[test]
    fn floor_entry_registers_proxy() {
        let cache = cache();
        cache.put(vo_id(1, 5), "v5".to_string());
        let _proxy = cache
            .floor_entry(&vo_id(1, 9), MaterializedSnapshotProxy::generate)
            .unwrap();
        assert_eq!(cache.outstanding_proxies(&vo_id(1, 5)), Some(1));
    }

    #[test]
    fn prefix_evict_is_inclusive_and_per_object() {
        let cache = cache();
        for version in [1, 2, 3, 4] {
            cache.put(vo_id(1, version), format!("a{version}"));
            cache.put(vo_id(2, version), format!("b{version}"));
        }

        assert_eq!(cache.prefix_evict(&vo_id(1, 3)), 3);
        for version in [1, 2, 3] {
            assert!(!cache.contains_key(&vo_id(1, version)));
            assert!(cache.contains_key(&vo_id(2, version)));
        }
        assert!(cache.contains_key(&vo_id(1, 4)));
        assert_eq!(cache.stats().versions_evicted(), 3);
    }

    #[test]
    fn prefix_evict_unknown_object_is_noop() {
        let cache = cache();
        assert_eq!(cache.prefix_evict(&vo_id(9, 100)), 0);
    }

    #[test]
    fn prefix_evict_at_max_address() {
        let cache = cache();
        cache.put(vo_id(1, 3), "v3".to_string());
        let all = VersionedObjectIdentifier::new(ObjectId::from_u128(1), Address::MAX);
        assert_eq!(cache.prefix_evict(&all), 1);
        assert!(cache.versions_of(&ObjectId::from_u128(1)).is_empty());
    }

    #[test]
    fn contains_object_tracks_index() {
        let cache = cache();
        let object = ObjectId::from_u128(1);
        assert!(!cache.contains_object(&object));

        cache.put(vo_id(1, 1), "v1".to_string());
        assert!(cache.contains_object(&object));

        // The index entry outlives its versions.
        cache.prefix_evict(&vo_id(1, 1));
        assert!(cache.contains_object(&object));
        assert!(!cache.contains_key(&vo_id(1, 1)));
    }

    #[test]
    fn register_mvo_first_wins() {
        struct Named(&'static str);
        impl MultiVersionObject for Named {
            fn sync_to(&self, _version: Address) -> RuntimeResult<()> {
                Err(RuntimeError::stream_tails(self.0))
            }
        }

        let cache = cache();
        let object = ObjectId::from_u128(1);
        cache.register_mvo(object, Arc::new(Named("first")));
        cache.register_mvo(object, Arc::new(Named("second")));

        let err = cache.mvo(&object).unwrap().sync_to(Address::ZERO).unwrap_err();
        assert!(err.to_string().contains("first"));
    }

    #[test]
    fn key_set_lists_cached_ids() {
        let cache = cache();
        cache.put(vo_id(1, 1), "a".to_string());
        cache.put(vo_id(2, 7), "b".to_string());

        let keys = cache.key_set();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&vo_id(1, 1)));
        assert!(keys.contains(&vo_id(2, 7)));
    }

    #[test]
    fn shutdown_is_non_blocking_and_idempotent() {
        let cache = cache();
        cache.shutdown();
        cache.shutdown();
        cache.put(vo_id(1, 1), "still usable".to_string());
        assert!(cache.contains_key(&vo_id(1, 1)));
    }
}
