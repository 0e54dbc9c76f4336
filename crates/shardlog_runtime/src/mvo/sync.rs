//! Background sync of hot objects.
//!
//! Periodically asks the log for the tails of every registered object and
//! moves objects whose newest cached version is behind their tail forward,
//! so that the next transaction reading them hits the cache instead of
//! replaying the log.

use crate::error::RuntimeResult;
use crate::mvo::cache::CacheState;
use crate::object::StreamTailSource;
use shardlog_common::{ObjectId, ShutdownSignal};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Background worker keeping registered objects close to the log tail.
pub struct MvoCacheSync {
    signal: ShutdownSignal,
    handle: Option<JoinHandle<()>>,
}

impl MvoCacheSync {
    /// Starts the worker; the first round runs one `period` after start.
    pub(crate) fn start<T: Send + Sync + 'static>(
        state: Arc<CacheState<T>>,
        tail_source: Arc<dyn StreamTailSource>,
        period: Duration,
    ) -> RuntimeResult<Self> {
        let signal = ShutdownSignal::new();
        let worker_signal = signal.clone();

        let handle = std::thread::Builder::new()
            .name("mvo-cache-sync".into())
            .spawn(move || {
                info!(period_ms = period.as_millis() as u64, "MVO cache sync started");
                while !worker_signal.wait_timeout(period) {
                    sync_once(&state, tail_source.as_ref());
                }
                info!("MVO cache sync stopped");
            })?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Requests the worker to stop. Returns immediately; a round in progress
    /// is completed.
    pub fn shutdown(&self) {
        self.signal.shutdown();
    }

    /// Returns true while the worker thread is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for MvoCacheSync {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for MvoCacheSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MvoCacheSync")
            .field("running", &self.is_running())
            .finish()
    }
}

/// Runs one sync round and returns the number of objects synced.
///
/// Objects without cached versions are skipped: there is nothing to keep
/// warm. Failures are logged and counted; they never stop the worker.
pub(crate) fn sync_once<T: Send + Sync + 'static>(
    state: &CacheState<T>,
    tail_source: &dyn StreamTailSource,
) -> usize {
    let mvos = state.registered_mvos();
    if mvos.is_empty() {
        state.stats().record_sync_run(0);
        return 0;
    }

    let object_ids: Vec<ObjectId> = mvos.iter().map(|(object_id, _)| *object_id).collect();
    let tails = match tail_source.stream_tails(&object_ids) {
        Ok(tails) => tails,
        Err(e) => {
            warn!(error = %e, "failed to query stream tails");
            state.stats().record_sync_failure();
            return 0;
        }
    };

    let mut synced = 0;
    for (object_id, mvo) in mvos {
        let Some(tail) = tails.get(&object_id).copied() else {
            continue;
        };
        let Some(latest) = state.latest_version(&object_id) else {
            continue;
        };
        if latest >= tail {
            continue;
        }

        match mvo.sync_to(tail) {
            Ok(()) => {
                debug!(%object_id, from = %latest, to = %tail, "synced object");
                synced += 1;
            }
            Err(e) => {
                warn!(%object_id, error = %e, "failed to sync object");
                state.stats().record_sync_failure();
            }
        }
    }

    state.stats().record_sync_run(synced);
    if synced > 0 {
        info!("Synced {} objects", synced);
    }
    synced
}
