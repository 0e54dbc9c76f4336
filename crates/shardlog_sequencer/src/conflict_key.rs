//! Conflict keys.

use bytes::Bytes;
use shardlog_common::StreamId;
use std::fmt;

/// A stream id paired with an application-level key.
///
/// Two transactions conflict when they write the same conflict key. The
/// parameter bytes are opaque to the sequencer; clients usually hash the
/// key of the map entry they modify.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConflictKey {
    stream_id: StreamId,
    conflict_param: Bytes,
}

impl ConflictKey {
    /// Creates a conflict key.
    pub fn new(stream_id: StreamId, conflict_param: impl Into<Bytes>) -> Self {
        Self {
            stream_id,
            conflict_param: conflict_param.into(),
        }
    }

    /// Returns the stream the key belongs to.
    #[must_use]
    pub const fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Returns the conflict parameter bytes.
    #[must_use]
    pub fn conflict_param(&self) -> &[u8] {
        &self.conflict_param
    }
}

impl fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.stream_id, self.conflict_param.as_ref())
    }
}

impl fmt::Debug for ConflictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConflictKey({self})")
    }
}
