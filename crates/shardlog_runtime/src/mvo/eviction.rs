//! Ordering of cache evictions into prefix evictions.
//!
//! The snapshot cache evicts single versions, in any order, whenever its
//! size or expiry bounds demand it. The version index must follow: once a
//! version is gone, older versions of the same object must become
//! unreachable too, or floor lookups would keep finding a stale floor.
//!
//! The cache's removal listener runs on whichever thread triggered the
//! eviction, so it only enqueues the identifier. A dedicated worker drains
//! the queue in batches, keeps the highest evicted version per object, and
//! issues one prefix eviction per object.
//!
//! When the queue is full the listener merges the version into an overflow
//! map keyed by object instead, so a slow worker delays reconciliation but
//! never loses it.

use crate::error::RuntimeResult;
use crate::object::VersionedObjectIdentifier;
use crate::stats::MvoCacheStats;
use dashmap::DashMap;
use moka::notification::RemovalCause;
use shardlog_common::{Address, ObjectId, ShutdownSignal};
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// How long the worker waits for a notification before re-checking for
/// shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Highest evicted version per object that did not fit in the queue.
type OverflowMap = Arc<DashMap<ObjectId, Address>>;

/// Producer side of the eviction queue, owned by the cache's removal
/// listener.
pub(crate) struct EvictionListener {
    sender: SyncSender<VersionedObjectIdentifier>,
    overflow: OverflowMap,
    stats: Arc<MvoCacheStats>,
}

/// Consumer side of the eviction queue, owned by the worker.
pub(crate) struct EvictionQueue {
    receiver: Receiver<VersionedObjectIdentifier>,
    overflow: OverflowMap,
}

impl EvictionListener {
    /// Creates a listener and the consuming end of its bounded queue.
    pub(crate) fn channel(capacity: usize, stats: Arc<MvoCacheStats>) -> (Self, EvictionQueue) {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        let overflow = Arc::new(DashMap::new());
        let listener = Self {
            sender,
            overflow: Arc::clone(&overflow),
            stats,
        };
        (listener, EvictionQueue { receiver, overflow })
    }

    /// Called for every removal from the snapshot cache.
    ///
    /// Explicit invalidations and replacements are ignored: they come from
    /// `prefix_evict` and `put`, which keep the index consistent
    /// themselves. Never blocks.
    pub(crate) fn on_removal(&self, vo_id: &VersionedObjectIdentifier, cause: RemovalCause) {
        if !cause.was_evicted() {
            return;
        }

        match self.sender.try_send(*vo_id) {
            Ok(()) => self.stats.record_eviction_notification(),
            Err(TrySendError::Full(_)) => {
                let version = vo_id.version();
                self.overflow
                    .entry(vo_id.object_id())
                    .and_modify(|pending| *pending = (*pending).max(version))
                    .or_insert(version);
                warn!(vo_id = %vo_id, "eviction queue full, deferring notification");
                self.stats.record_overflowed_notification();
            }
            // Worker already stopped.
            Err(TrySendError::Disconnected(_)) => {
                trace!(vo_id = %vo_id, "eviction worker stopped, ignoring notification");
            }
        }
    }
}

/// Background worker turning eviction notifications into prefix evictions.
pub struct MvoCacheEviction {
    signal: ShutdownSignal,
    handle: Option<JoinHandle<()>>,
}

impl EvictionQueue {
    /// Moves every deferred notification into `batch`.
    fn drain_overflow(&self, batch: &mut Vec<VersionedObjectIdentifier>) {
        self.overflow.retain(|object_id, version| {
            batch.push(VersionedObjectIdentifier::new(*object_id, *version));
            false
        });
    }
}

impl MvoCacheEviction {
    /// Starts the worker on its own thread.
    ///
    /// `prefix_evict` is called with the highest evicted version of each
    /// object in a batch and returns the number of versions it removed.
    pub(crate) fn start<F>(
        queue: EvictionQueue,
        batch_size: usize,
        prefix_evict: F,
    ) -> RuntimeResult<Self>
    where
        F: Fn(VersionedObjectIdentifier) -> usize + Send + 'static,
    {
        let signal = ShutdownSignal::new();
        let worker_signal = signal.clone();

        let handle = std::thread::Builder::new()
            .name("mvo-cache-eviction".into())
            .spawn(move || {
                info!(batch_size, "MVO cache eviction worker started");
                run(&queue, batch_size, &worker_signal, &prefix_evict);
                info!("MVO cache eviction worker stopped");
            })?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Requests the worker to stop. Returns immediately; a batch already
    /// being processed is completed.
    pub fn shutdown(&self) {
        self.signal.shutdown();
    }

    /// Returns true while the worker thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for MvoCacheEviction {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for MvoCacheEviction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MvoCacheEviction")
            .field("running", &self.is_running())
            .finish()
    }
}

fn run<F>(queue: &EvictionQueue, batch_size: usize, signal: &ShutdownSignal, prefix_evict: &F)
where
    F: Fn(VersionedObjectIdentifier) -> usize,
{
    let mut batch = Vec::with_capacity(batch_size);
    while !signal.is_shutdown() {
        match queue.receiver.recv_timeout(POLL_INTERVAL) {
            Ok(vo_id) => batch.push(vo_id),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        while batch.len() < batch_size {
            match queue.receiver.try_recv() {
                Ok(vo_id) => batch.push(vo_id),
                Err(_) => break,
            }
        }
        queue.drain_overflow(&mut batch);
        if batch.is_empty() {
            continue;
        }

        let evicted = process_batch(&batch, prefix_evict);
        debug!(
            notifications = batch.len(),
            versions = evicted,
            "processed eviction batch"
        );
        batch.clear();
    }
}

/// Keeps the highest evicted version of each object.
pub(crate) fn coalesce(batch: &[VersionedObjectIdentifier]) -> BTreeMap<ObjectId, Address> {
    let mut targets = BTreeMap::new();
    for vo_id in batch {
        targets
            .entry(vo_id.object_id())
            .and_modify(|version: &mut Address| *version = (*version).max(vo_id.version()))
            .or_insert(vo_id.version());
    }
    targets
}

/// Issues one prefix eviction per object in the batch.
///
/// Returns the total number of versions evicted.
pub(crate) fn process_batch<F>(batch: &[VersionedObjectIdentifier], prefix_evict: &F) -> usize
where
    F: Fn(VersionedObjectIdentifier) -> usize,
{
    coalesce(batch)
        .into_iter()
        .map(|(object_id, version)| prefix_evict(VersionedObjectIdentifier::new(object_id, version)))
        .sum()
}
