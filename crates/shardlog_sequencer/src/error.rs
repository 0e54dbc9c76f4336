//! Error types for the sequencer.

use crate::conflict_key::ConflictKey;
use shardlog_common::Address;
use thiserror::Error;

/// Result type for sequencer operations.
pub type SequencerResult<T> = Result<T, SequencerError>;

/// Errors raised by the sequencer and its conflict cache.
///
/// Every variant signals a bug in the caller's ordering logic. None of them
/// is retryable: the sequencer must treat them as fatal to the current epoch.
/// Operations that return one of these errors leave shared state untouched.
#[derive(Debug, Error)]
pub enum SequencerError {
    /// The conflict cache was configured with a zero capacity.
    #[error("sequencer cache capacity must be positive")]
    InvalidCapacity,

    /// The transaction version is already tracked by the cache.
    #[error("txVersion={tx_version} is already present in the sequencer cache")]
    DuplicateTxVersion {
        /// The offending version.
        tx_version: Address,
    },

    /// The transaction version is not above the start of the window.
    #[error("txVersion={tx_version} should be larger than the smallest address={smallest}")]
    TxVersionBelowWindow {
        /// The offending version.
        tx_version: Address,
        /// The smallest address currently tracked.
        smallest: Address,
    },

    /// A conflict key was already written at or after the new version.
    #[error("sequencer regression: conflictKey={key} prevVersion={prev_version} txVersion={tx_version}")]
    SequencerRegression {
        /// The conflict key that regressed.
        key: ConflictKey,
        /// Version previously recorded for the key.
        prev_version: Address,
        /// The new, non-increasing version.
        tx_version: Address,
    },

    /// A token request asked for zero addresses.
    #[error("token request must ask for at least one address, got {requested}")]
    InvalidTokenCount {
        /// Number of addresses requested.
        requested: u64,
    },

    /// The log address space is exhausted.
    #[error("address space exhausted at {tail}")]
    AddressSpaceExhausted {
        /// Current global tail.
        tail: Address,
    },
}

impl SequencerError {
    /// Creates a sequencer regression error.
    pub fn regression(key: ConflictKey, prev_version: Address, tx_version: Address) -> Self {
        Self::SequencerRegression {
            key,
            prev_version,
            tx_version,
        }
    }
}
