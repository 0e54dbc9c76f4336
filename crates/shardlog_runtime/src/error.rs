//! Error types for the client runtime.

use shardlog_common::ObjectId;
use std::io;
use thiserror::Error;

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that can occur in the client runtime.
///
/// Cache misses are not errors; lookups report them as `None`.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The cache configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// A background worker thread could not be started.
    #[error("failed to spawn worker: {0}")]
    WorkerSpawn(#[from] io::Error),

    /// Bringing an object up to date failed.
    #[error("failed to sync object {object_id}: {message}")]
    ObjectSync {
        /// The object being synced.
        object_id: ObjectId,
        /// Description of the failure.
        message: String,
    },

    /// Stream tails could not be fetched from the sequencer.
    #[error("stream tail query failed: {message}")]
    StreamTails {
        /// Description of the failure.
        message: String,
    },
}

impl RuntimeError {
    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an object sync error.
    pub fn object_sync(object_id: ObjectId, message: impl Into<String>) -> Self {
        Self::ObjectSync {
            object_id,
            message: message.into(),
        }
    }

    /// Creates a stream tail query error.
    pub fn stream_tails(message: impl Into<String>) -> Self {
        Self::StreamTails {
            message: message.into(),
        }
    }
}
