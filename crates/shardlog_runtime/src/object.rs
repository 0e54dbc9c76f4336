//! Versioned object identifiers and the collaborators of the cache.

use crate::error::RuntimeResult;
use shardlog_common::{Address, ObjectId};
use std::collections::HashMap;
use std::fmt;

/// Identifies one materialized version of an object.
///
/// An immutable value: to look up another version, build a new identifier
/// with [`with_version`](Self::with_version).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionedObjectIdentifier {
    object_id: ObjectId,
    version: Address,
}

impl VersionedObjectIdentifier {
    /// Creates an identifier.
    #[must_use]
    pub const fn new(object_id: ObjectId, version: Address) -> Self {
        Self { object_id, version }
    }

    /// Returns the object id.
    #[must_use]
    pub const fn object_id(&self) -> ObjectId {
        self.object_id
    }

    /// Returns the version (the log address the snapshot reflects).
    #[must_use]
    pub const fn version(&self) -> Address {
        self.version
    }

    /// Returns an identifier for another version of the same object.
    #[must_use]
    pub const fn with_version(&self, version: Address) -> Self {
        Self::new(self.object_id, version)
    }
}

impl fmt::Display for VersionedObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.object_id, self.version.as_u64())
    }
}

/// The live wrapper that can materialize fresh versions of one object.
///
/// Implementations replay the object's stream and `put` the result into the
/// cache; the cache only tells them how far to go.
pub trait MultiVersionObject: Send + Sync {
    /// Brings the object up to `version` and caches the result.
    fn sync_to(&self, version: Address) -> RuntimeResult<()>;
}

/// Source of the latest committed address of each stream, normally the
/// sequencer.
pub trait StreamTailSource: Send + Sync {
    /// Returns the tail of each requested stream that has been written.
    fn stream_tails(&self, object_ids: &[ObjectId]) -> RuntimeResult<HashMap<ObjectId, Address>>;
}
