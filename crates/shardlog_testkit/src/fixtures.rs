//! Test fixtures.
//!
//! Stand-ins for the pieces of the runtime that normally talk to the log:
//! a settable stream tail source and a `MultiVersionObject` that records
//! the versions it was asked to sync to.

use parking_lot::Mutex;
use shardlog_common::{Address, ObjectId};
use shardlog_runtime::{
    MultiVersionObject, MvoCache, MvoCacheConfig, RuntimeError, RuntimeResult, StreamTailSource,
    VersionedObjectIdentifier,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

static LOGGING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `warn`.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Shorthand for a versioned identifier of a numbered object.
pub fn vo_id(object: u128, version: u64) -> VersionedObjectIdentifier {
    VersionedObjectIdentifier::new(ObjectId::from_u128(object), Address::new(version))
}

/// A cache configuration for tests: small, no background sync.
pub fn quick_cache_config() -> MvoCacheConfig {
    MvoCacheConfig::new()
        .max_cache_entries(1_000)
        .background_sync_period(Duration::ZERO)
}

/// Creates a cache of `T` backed by a [`StaticTailSource`].
pub fn test_cache<T: Send + Sync + 'static>(
    config: MvoCacheConfig,
) -> (Arc<MvoCache<T>>, Arc<StaticTailSource>) {
    init_test_logging();
    let tails = Arc::new(StaticTailSource::new());
    let cache = MvoCache::new(config, Arc::clone(&tails) as Arc<dyn StreamTailSource>)
        .expect("Failed to create MVO cache");
    (Arc::new(cache), tails)
}

/// Polls `condition` until it holds or `timeout` passes.
///
/// Returns the final value of `condition`.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// A stream tail source whose tails are set by the test.
#[derive(Debug, Default)]
pub struct StaticTailSource {
    tails: Mutex<HashMap<ObjectId, Address>>,
    failing: AtomicBool,
    queries: AtomicUsize,
}

impl StaticTailSource {
    /// Creates a source that knows no tails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tail of `object_id`.
    pub fn set_tail(&self, object_id: ObjectId, tail: Address) {
        self.tails.lock().insert(object_id, tail);
    }

    /// Makes every subsequent query fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns the number of queries answered so far, failed ones included.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl StreamTailSource for StaticTailSource {
    fn stream_tails(&self, object_ids: &[ObjectId]) -> RuntimeResult<HashMap<ObjectId, Address>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RuntimeError::stream_tails("tail source unavailable"));
        }

        let tails = self.tails.lock();
        Ok(object_ids
            .iter()
            .filter_map(|id| tails.get(id).map(|tail| (*id, *tail)))
            .collect())
    }
}

/// A multi-version object that records sync requests.
///
/// When built with [`RecordingMvo::caching`], a sync also caches a snapshot
/// at the requested version, like a real object replaying the log would.
pub struct RecordingMvo {
    object_id: ObjectId,
    cache: Option<std::sync::Weak<MvoCache<String>>>,
    synced_to: Mutex<Vec<Address>>,
    failing: AtomicBool,
}

impl RecordingMvo {
    /// Creates an object that only records.
    pub fn new(object_id: ObjectId) -> Self {
        Self {
            object_id,
            cache: None,
            synced_to: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Creates an object that caches a snapshot on every sync.
    pub fn caching(object_id: ObjectId, cache: &Arc<MvoCache<String>>) -> Self {
        Self {
            cache: Some(Arc::downgrade(cache)),
            ..Self::new(object_id)
        }
    }

    /// Makes every subsequent sync fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Returns the versions synced to so far.
    pub fn synced_to(&self) -> Vec<Address> {
        self.synced_to.lock().clone()
    }
}

impl MultiVersionObject for RecordingMvo {
    fn sync_to(&self, version: Address) -> RuntimeResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RuntimeError::object_sync(self.object_id, "replay failed"));
        }

        if let Some(cache) = self.cache.as_ref().and_then(std::sync::Weak::upgrade) {
            cache.put(
                VersionedObjectIdentifier::new(self.object_id, version),
                format!("{}@{}", self.object_id, version.as_u64()),
            );
        }
        self.synced_to.lock().push(version);
        Ok(())
    }
}
