//! Integration tests for the MVO cache and its background workers.

use proptest::prelude::*;
use shardlog_common::{Address, ObjectId};
use shardlog_runtime::{
    MaterializedSnapshotProxy, MvoCache, RuntimeError, SnapshotProxy, SnapshotReferenceProxy,
    StreamTailSource, VersionedObjectIdentifier,
};
use shardlog_testkit::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

const SETTLE: Duration = Duration::from_secs(5);

proptest! {
    #![proptest_config(PropTestConfig::default().to_proptest_config())]

    /// Applies random operations to a cache large enough never to evict and
    /// to a plain map, and checks that every lookup agrees.
    #[test]
    fn cache_matches_sorted_map_model(ops in cache_operation_sequence_strategy(1, 200)) {
        let (cache, _tails) = test_cache::<u64>(quick_cache_config());
        let mut model: HashMap<ObjectId, BTreeMap<Address, u64>> = HashMap::new();

        for (n, op) in ops.iter().enumerate() {
            let vo_id = VersionedObjectIdentifier::new(op.object_id(), op.version());
            let versions = model.entry(op.object_id()).or_default();

            match op {
                CacheOperation::Put { .. } => {
                    cache.put(vo_id, n as u64);
                    versions.insert(op.version(), n as u64);
                }
                CacheOperation::Get { .. } => {
                    let found = cache
                        .get(&vo_id, SnapshotReferenceProxy::generate)
                        .map(|proxy| *proxy.snapshot());
                    prop_assert_eq!(found, versions.get(&op.version()).copied());
                }
                CacheOperation::Floor { .. } => {
                    let found = cache
                        .floor_entry(&vo_id, SnapshotReferenceProxy::generate)
                        .map(|proxy| (proxy.vo_id().version(), *proxy.snapshot()));
                    let expected = versions
                        .range(..=op.version())
                        .next_back()
                        .map(|(version, value)| (*version, *value));
                    prop_assert_eq!(found, expected);
                }
                CacheOperation::PrefixEvict { .. } => {
                    let evicted = cache.prefix_evict(&vo_id);
                    let remaining = match op.version().checked_add(1) {
                        Some(next) => versions.split_off(&next),
                        None => BTreeMap::new(),
                    };
                    prop_assert_eq!(evicted, versions.len());
                    *versions = remaining;
                }
            }
        }

        for (object_id, versions) in &model {
            let expected: Vec<Address> = versions.keys().copied().collect();
            prop_assert_eq!(cache.versions_of(object_id), expected);
        }
    }
}

#[test]
fn unbounded_expiry_is_rejected_at_construction() {
    let tails: Arc<dyn StreamTailSource> = Arc::new(StaticTailSource::new());
    let config = quick_cache_config().cache_expiry(Duration::MAX);
    let result = MvoCache::<u64>::new(config, tails);
    assert!(matches!(result, Err(RuntimeError::InvalidConfig { .. })));
}

#[test]
fn prefix_evict_removes_every_lower_version() {
    let (cache, _tails) = test_cache::<u64>(quick_cache_config());
    for version in 0..50u64 {
        cache.put(vo_id(1, version), version);
    }

    assert_eq!(cache.prefix_evict(&vo_id(1, 24)), 25);
    for version in 0..25u64 {
        assert!(!cache.contains_key(&vo_id(1, version)));
        assert!(cache
            .floor_entry(&vo_id(1, version), SnapshotReferenceProxy::generate)
            .is_none());
    }
    let floor = cache
        .floor_entry(&vo_id(1, 100), SnapshotReferenceProxy::generate)
        .unwrap();
    assert_eq!(floor.vo_id(), vo_id(1, 49));
}

#[test]
fn size_evictions_are_reconciled_with_version_index() {
    let config = quick_cache_config().max_cache_entries(10);
    let (cache, _tails) = test_cache::<u64>(config);
    let object = ObjectId::from_u128(1);

    for version in 0..200u64 {
        cache.put(vo_id(1, version), version);
    }
    cache.run_pending_tasks();

    // Once the eviction worker catches up, every indexed version is live.
    let reconciled = wait_for(SETTLE, || {
        cache.run_pending_tasks();
        cache
            .versions_of(&object)
            .iter()
            .all(|version| cache.contains_key(&VersionedObjectIdentifier::new(object, *version)))
    });
    assert!(reconciled, "index still lists evicted versions");
    assert!(cache.entry_count() <= 10);
    assert!(cache.versions_of(&object).len() <= 10);
    assert!(cache.stats().eviction_notifications() > 0);
    assert!(cache.stats().versions_evicted() > 0);
}

#[test]
fn saturated_eviction_queue_still_reconciles_index() {
    let config = quick_cache_config()
        .max_cache_entries(4)
        .eviction_queue_capacity(1);
    let (cache, _tails) = test_cache::<u64>(config);
    let objects: Vec<ObjectId> = (0..2_000u128).map(ObjectId::from_u128).collect();

    for (n, object) in objects.iter().enumerate() {
        cache.put(VersionedObjectIdentifier::new(*object, Address::new(1)), n as u64);
    }
    cache.run_pending_tasks();

    let reconciled = wait_for(SETTLE, || {
        cache.run_pending_tasks();
        objects.iter().all(|object| {
            cache
                .versions_of(object)
                .iter()
                .all(|version| cache.contains_key(&VersionedObjectIdentifier::new(*object, *version)))
        })
    });
    assert!(reconciled, "index still lists evicted versions");
    assert!(cache.stats().eviction_notifications_overflowed() > 0);
}

#[test]
fn expired_snapshots_leave_the_index() {
    let config = quick_cache_config().cache_expiry(Duration::from_millis(50));
    let (cache, _tails) = test_cache::<u64>(config);
    let object = ObjectId::from_u128(1);
    cache.put(vo_id(1, 1), 1);
    cache.put(vo_id(1, 2), 2);

    std::thread::sleep(Duration::from_millis(120));
    assert!(cache
        .get(&vo_id(1, 2), SnapshotReferenceProxy::generate)
        .is_none());

    let drained = wait_for(SETTLE, || {
        cache.run_pending_tasks();
        cache.versions_of(&object).is_empty()
    });
    assert!(drained);
}

#[test]
fn materialized_proxy_does_not_leak_writes() {
    let (cache, _tails) = test_cache::<Vec<u32>>(quick_cache_config());
    cache.put(vo_id(1, 4), vec![1, 2]);

    let private = cache
        .floor_entry(&vo_id(1, 9), MaterializedSnapshotProxy::generate)
        .unwrap();
    private.apply(|state| state.push(3));
    assert_eq!(private.access(|state| state.len()), 3);
    assert!(!private.holds_snapshot_reference());

    let shared = cache
        .get(&vo_id(1, 4), SnapshotReferenceProxy::generate)
        .unwrap();
    assert_eq!(shared.snapshot(), &vec![1, 2]);
}

#[test]
fn background_sync_keeps_counters_at_tail() {
    let config = quick_cache_config().background_sync_period(Duration::from_millis(20));
    let harness = CounterHarness::new(config);
    let object = ObjectId::from_u128(1);
    let counter = harness.open(object);

    let first = harness.log.append(object, 5).unwrap();
    assert_eq!(counter.read_at(first).unwrap(), 5);

    harness.log.append(ObjectId::from_u128(2), 100).unwrap();
    harness.log.append(object, 2).unwrap();
    let tail = harness.log.append(object, 3).unwrap();

    let synced = wait_for(SETTLE, || {
        harness
            .cache
            .contains_key(&VersionedObjectIdentifier::new(object, tail))
    });
    assert!(synced, "sync worker did not cache the tail version");

    let proxy = harness
        .cache
        .get(
            &VersionedObjectIdentifier::new(object, tail),
            SnapshotReferenceProxy::generate,
        )
        .unwrap();
    assert_eq!(*proxy.snapshot(), 10);
    assert!(harness.cache.stats().objects_synced() >= 1);
}

#[test]
fn sync_failures_do_not_stop_the_worker() {
    let config = quick_cache_config().background_sync_period(Duration::from_millis(10));
    let (cache, tails) = test_cache::<String>(config);
    tails.set_failing(true);

    let object = ObjectId::from_u128(1);
    let mvo = Arc::new(RecordingMvo::caching(object, &cache));
    cache.register_mvo(object, mvo.clone());
    cache.put(vo_id(1, 1), "v1".to_string());
    tails.set_tail(object, Address::new(3));

    assert!(wait_for(SETTLE, || cache.stats().sync_failures() >= 2));
    assert!(mvo.synced_to().is_empty());

    tails.set_failing(false);
    assert!(wait_for(SETTLE, || !mvo.synced_to().is_empty()));
    assert_eq!(mvo.synced_to()[0], Address::new(3));
    assert!(cache.contains_key(&vo_id(1, 3)));
}

#[test]
fn shutdown_stops_workers_without_blocking() {
    let config = quick_cache_config().background_sync_period(Duration::from_millis(10));
    let (cache, _tails) = test_cache::<u64>(config);
    assert!(cache.eviction().is_running());
    let sync_running = cache.sync().map(|sync| sync.is_running());
    assert_eq!(sync_running, Some(true));

    cache.shutdown();
    assert!(wait_for(SETTLE, || !cache.eviction().is_running()));
    assert!(wait_for(SETTLE, || cache
        .sync()
        .is_some_and(|sync| !sync.is_running())));

    // Lookups still work; only reconciliation has stopped.
    cache.put(vo_id(1, 1), 1);
    assert!(cache.contains_key(&vo_id(1, 1)));
}

#[test]
fn concurrent_workload_is_consistent() {
    let (cache, _tails) = test_cache::<u64>(quick_cache_config().max_cache_entries(256));
    let config = StressConfig {
        operations: 8_000,
        threads: 4,
        objects: 32,
        ..StressConfig::default()
    };

    let result = stress_concurrent_mvo_cache(Arc::clone(&cache), &config);
    assert_eq!(result.failed_ops, 0);
    assert_eq!(result.total_ops, 8_000);
}
