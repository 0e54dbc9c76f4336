//! Transaction conflict resolution.

use crate::cache::SequencerConflictCache;
use crate::conflict_key::ConflictKey;
use shardlog_common::Address;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// What a committing transaction tells the sequencer.
#[derive(Debug, Clone)]
pub struct TxResolutionInfo {
    /// Transaction identifier, for diagnostics.
    pub tx_id: Uuid,
    /// Log address the transaction's reads were taken at.
    pub snapshot: Address,
    /// Keys the transaction read and depends on.
    pub conflict_set: HashSet<ConflictKey>,
    /// Keys the transaction writes.
    pub write_conflict_keys: HashSet<ConflictKey>,
}

impl TxResolutionInfo {
    /// Creates resolution info for a transaction that read at `snapshot`.
    pub fn new(snapshot: Address) -> Self {
        Self {
            tx_id: Uuid::new_v4(),
            snapshot,
            conflict_set: HashSet::new(),
            write_conflict_keys: HashSet::new(),
        }
    }

    /// Adds keys to the read conflict set.
    #[must_use]
    pub fn with_reads(mut self, keys: impl IntoIterator<Item = ConflictKey>) -> Self {
        self.conflict_set.extend(keys);
        self
    }

    /// Adds keys to the write set.
    #[must_use]
    pub fn with_writes(mut self, keys: impl IntoIterator<Item = ConflictKey>) -> Self {
        self.write_conflict_keys.extend(keys);
        self
    }

    /// Iterates every key whose last write must not be newer than the
    /// snapshot: reads and writes alike.
    fn checked_keys(&self) -> impl Iterator<Item = &ConflictKey> {
        self.conflict_set
            .iter()
            .chain(self.write_conflict_keys.difference(&self.conflict_set))
    }
}

/// Why a transaction was aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortCause {
    /// The snapshot predates the election of this sequencer, so the keys
    /// written before the election are unknown.
    NewSequencer {
        /// The transaction's snapshot.
        snapshot: Address,
        /// Wildcard inherited at election.
        max_conflict_new_sequencer: Address,
    },
    /// A key was written after the snapshot.
    Conflict {
        /// The conflicting key.
        key: ConflictKey,
        /// Address of the newer write.
        address: Address,
    },
    /// The key is no longer cached and the snapshot is older than the
    /// evicted window, so a newer write cannot be ruled out.
    Overflow {
        /// The key that fell out of the cache.
        key: ConflictKey,
        /// Highest evicted address.
        wildcard: Address,
    },
}

impl fmt::Display for AbortCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewSequencer {
                snapshot,
                max_conflict_new_sequencer,
            } => write!(
                f,
                "new sequencer: snapshot {snapshot} < {max_conflict_new_sequencer}"
            ),
            Self::Conflict { key, address } => write!(f, "conflict on {key} at {address}"),
            Self::Overflow { key, wildcard } => {
                write!(f, "cache overflow for {key}: wildcard {wildcard}")
            }
        }
    }
}

/// Outcome of resolving a transaction against the conflict cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxResolution {
    /// No conflict; the transaction may commit.
    Commit,
    /// The transaction must abort.
    Abort(AbortCause),
}

impl TxResolution {
    /// Returns true for a commit decision.
    #[must_use]
    pub fn is_commit(&self) -> bool {
        matches!(self, Self::Commit)
    }
}

impl SequencerConflictCache {
    /// Decides whether a transaction that read at `info.snapshot` may commit.
    ///
    /// Does not modify the cache; recording the writes is up to the caller.
    pub fn resolve(&self, info: &TxResolutionInfo) -> TxResolution {
        let resolution = self.resolve_inner(info);
        match &resolution {
            TxResolution::Commit => self.stats().record_commit(),
            TxResolution::Abort(cause) => {
                debug!(tx_id = %info.tx_id, %cause, "transaction aborted");
                self.stats().record_abort();
            }
        }
        resolution
    }

    fn resolve_inner(&self, info: &TxResolutionInfo) -> TxResolution {
        if info.snapshot < self.max_conflict_new_sequencer() {
            return TxResolution::Abort(AbortCause::NewSequencer {
                snapshot: info.snapshot,
                max_conflict_new_sequencer: self.max_conflict_new_sequencer(),
            });
        }

        for key in info.checked_keys() {
            match self.get(key) {
                Some(address) if address > info.snapshot => {
                    return TxResolution::Abort(AbortCause::Conflict {
                        key: key.clone(),
                        address,
                    });
                }
                Some(_) => {}
                None if info.snapshot < self.max_conflict_wildcard() => {
                    return TxResolution::Abort(AbortCause::Overflow {
                        key: key.clone(),
                        wildcard: self.max_conflict_wildcard(),
                    });
                }
                None => {}
            }
        }

        TxResolution::Commit
    }
}
