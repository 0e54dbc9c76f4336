//! Cross-crate integration test helpers.
//!
//! [`SharedLog`] is an in-memory log ordered by a real [`Sequencer`].
//! [`LogCounter`] is the simplest possible object on top of it: the sum of
//! the deltas appended to its stream. Reads go through the MVO cache the way
//! a runtime would: exact hit, then floor plus partial replay, then full
//! replay, caching the result.

use crate::fixtures::init_test_logging;
use parking_lot::{Mutex, RwLock};
use shardlog_common::{Address, ObjectId, StreamId};
use shardlog_runtime::{
    MultiVersionObject, MvoCache, MvoCacheConfig, RuntimeError, RuntimeResult,
    SnapshotProxy, SnapshotReferenceProxy, StreamTailSource, VersionedObjectIdentifier,
};
use shardlog_sequencer::{
    Sequencer, SequencerConfig, SequencerResult, TxOutcome, TxResolutionInfo,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// One entry of the in-memory log.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Streams the entry belongs to.
    pub streams: Vec<StreamId>,
    /// Value added to every stream's counter.
    pub delta: i64,
}

/// An in-memory shared log.
pub struct SharedLog {
    sequencer: Mutex<Sequencer>,
    entries: RwLock<BTreeMap<Address, LogEntry>>,
    replayed: AtomicUsize,
}

impl SharedLog {
    /// Creates an empty log.
    pub fn new(config: SequencerConfig) -> SequencerResult<Self> {
        Ok(Self {
            sequencer: Mutex::new(Sequencer::new(config)?),
            entries: RwLock::new(BTreeMap::new()),
            replayed: AtomicUsize::new(0),
        })
    }

    /// Appends a non-transactional entry to `stream`.
    pub fn append(&self, stream: StreamId, delta: i64) -> SequencerResult<Address> {
        let mut sequencer = self.sequencer.lock();
        let token = sequencer.next_token(&[stream], 1)?;
        self.entries.write().insert(
            token.start,
            LogEntry {
                streams: vec![stream],
                delta,
            },
        );
        Ok(token.start)
    }

    /// Commits a transaction that adds `delta` to the streams of its write
    /// keys.
    pub fn commit(&self, info: &TxResolutionInfo, delta: i64) -> SequencerResult<TxOutcome> {
        let mut sequencer = self.sequencer.lock();
        let outcome = sequencer.commit(info, &[])?;
        if let TxOutcome::Committed { address } = outcome {
            let mut streams: Vec<StreamId> = info
                .write_conflict_keys
                .iter()
                .map(|key| key.stream_id())
                .collect();
            streams.sort();
            streams.dedup();
            self.entries
                .write()
                .insert(address, LogEntry { streams, delta });
        }
        Ok(outcome)
    }

    /// Returns the last assigned address.
    pub fn global_tail(&self) -> Option<Address> {
        self.sequencer.lock().global_tail()
    }

    /// Runs `f` with exclusive access to the sequencer.
    pub fn with_sequencer<R>(&self, f: impl FnOnce(&mut Sequencer) -> R) -> R {
        f(&mut self.sequencer.lock())
    }

    /// Sums the deltas of `stream` in `(after, up_to]`, or `[0, up_to]`
    /// when `after` is `None`.
    pub fn replay(&self, stream: StreamId, after: Option<Address>, up_to: Address) -> i64 {
        let entries = self.entries.read();
        let range = match after.map(|after| after.checked_add(1)) {
            Some(Some(from)) if from <= up_to => entries.range(from..=up_to),
            Some(_) => return 0,
            None => entries.range(..=up_to),
        };

        let mut sum = 0;
        for entry in range.map(|(_, entry)| entry) {
            if entry.streams.contains(&stream) {
                self.replayed.fetch_add(1, Ordering::Relaxed);
                sum += entry.delta;
            }
        }
        sum
    }

    /// Returns the number of stream entries replayed so far.
    pub fn replayed_entries(&self) -> usize {
        self.replayed.load(Ordering::Relaxed)
    }
}

impl StreamTailSource for SharedLog {
    fn stream_tails(&self, object_ids: &[ObjectId]) -> RuntimeResult<HashMap<ObjectId, Address>> {
        Ok(self.sequencer.lock().query(object_ids).stream_tails)
    }
}

/// A counter object materialized from its stream.
pub struct LogCounter {
    object_id: ObjectId,
    log: Arc<SharedLog>,
    cache: Weak<MvoCache<i64>>,
}

impl LogCounter {
    /// Returns the counter's object id.
    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// Returns the counter value as of `snapshot`, caching it.
    pub fn read_at(&self, snapshot: Address) -> RuntimeResult<i64> {
        let cache = self
            .cache
            .upgrade()
            .ok_or_else(|| RuntimeError::object_sync(self.object_id, "cache dropped"))?;
        let vo_id = VersionedObjectIdentifier::new(self.object_id, snapshot);

        if let Some(proxy) = cache.get(&vo_id, SnapshotReferenceProxy::generate) {
            return Ok(*proxy.snapshot());
        }

        let (base, after) = match cache.floor_entry(&vo_id, SnapshotReferenceProxy::generate) {
            Some(proxy) => (*proxy.snapshot(), Some(proxy.vo_id().version())),
            None => (0, None),
        };

        let value = base + self.log.replay(self.object_id, after, snapshot);
        cache.put(vo_id, value);
        Ok(value)
    }
}

impl MultiVersionObject for LogCounter {
    fn sync_to(&self, version: Address) -> RuntimeResult<()> {
        self.read_at(version).map(|_| ())
    }
}

/// A log, a cache of counters, and the glue between them.
pub struct CounterHarness {
    /// The log.
    pub log: Arc<SharedLog>,
    /// The cache of counter snapshots.
    pub cache: Arc<MvoCache<i64>>,
}

impl CounterHarness {
    /// Creates a harness with a default sequencer.
    pub fn new(config: MvoCacheConfig) -> Self {
        init_test_logging();
        let log = Arc::new(
            SharedLog::new(SequencerConfig::default()).expect("Failed to create sequencer"),
        );
        let cache = Arc::new(
            MvoCache::new(config, Arc::clone(&log) as Arc<dyn StreamTailSource>)
                .expect("Failed to create MVO cache"),
        );
        Self { log, cache }
    }

    /// Opens a counter and registers it with the cache.
    pub fn open(&self, object_id: ObjectId) -> Arc<LogCounter> {
        let counter = Arc::new(LogCounter {
            object_id,
            log: Arc::clone(&self.log),
            cache: Arc::downgrade(&self.cache),
        });
        self.cache
            .register_mvo(object_id, Arc::clone(&counter) as Arc<dyn MultiVersionObject>);
        counter
    }
}
