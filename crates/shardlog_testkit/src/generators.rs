//! Property-based test generators using proptest.
//!
//! Identifiers are drawn from small domains on purpose, so generated
//! workloads revisit the same keys and objects often.

use proptest::prelude::*;
use shardlog_common::{Address, ObjectId, StreamId};
use shardlog_sequencer::ConflictKey;
use std::collections::HashSet;

/// Strategy for stream ids drawn from `0..streams`.
pub fn stream_id_strategy(streams: u128) -> impl Strategy<Value = StreamId> {
    (0..streams).prop_map(StreamId::from_u128)
}

/// Strategy for conflict keys over a few streams and parameters.
pub fn conflict_key_strategy() -> impl Strategy<Value = ConflictKey> {
    (stream_id_strategy(4), 0u8..16).prop_map(|(stream, param)| ConflictKey::new(stream, vec![param]))
}

/// Strategy for the write set of one transaction.
pub fn conflict_key_set_strategy(max_keys: usize) -> impl Strategy<Value = HashSet<ConflictKey>> {
    prop::collection::hash_set(conflict_key_strategy(), 0..=max_keys)
}

/// Strategy for a sequence of committed write sets.
///
/// Commits are applied at strictly increasing addresses by the caller.
pub fn commit_sequence_strategy(
    max_commits: usize,
    max_keys: usize,
) -> impl Strategy<Value = Vec<HashSet<ConflictKey>>> {
    prop::collection::vec(conflict_key_set_strategy(max_keys), 1..max_commits)
}

/// An operation against the MVO cache.
#[derive(Debug, Clone)]
pub enum CacheOperation {
    /// Cache a snapshot.
    Put {
        /// Object number.
        object: u128,
        /// Version.
        version: u64,
    },
    /// Exact lookup.
    Get {
        /// Object number.
        object: u128,
        /// Version.
        version: u64,
    },
    /// Floor lookup.
    Floor {
        /// Object number.
        object: u128,
        /// Upper bound.
        version: u64,
    },
    /// Prefix eviction.
    PrefixEvict {
        /// Object number.
        object: u128,
        /// Inclusive upper bound.
        version: u64,
    },
}

impl CacheOperation {
    /// Returns the object the operation targets.
    pub fn object_id(&self) -> ObjectId {
        let object = match self {
            Self::Put { object, .. }
            | Self::Get { object, .. }
            | Self::Floor { object, .. }
            | Self::PrefixEvict { object, .. } => *object,
        };
        ObjectId::from_u128(object)
    }

    /// Returns the version the operation targets.
    pub fn version(&self) -> Address {
        let version = match self {
            Self::Put { version, .. }
            | Self::Get { version, .. }
            | Self::Floor { version, .. }
            | Self::PrefixEvict { version, .. } => *version,
        };
        Address::new(version)
    }
}

/// Strategy for cache operations over a few objects and versions.
pub fn cache_operation_strategy() -> impl Strategy<Value = CacheOperation> {
    let target = (0u128..4, 0u64..64);
    prop_oneof![
        4 => target.clone().prop_map(|(object, version)| CacheOperation::Put { object, version }),
        2 => target.clone().prop_map(|(object, version)| CacheOperation::Get { object, version }),
        2 => target.clone().prop_map(|(object, version)| CacheOperation::Floor { object, version }),
        1 => target.prop_map(|(object, version)| CacheOperation::PrefixEvict { object, version }),
    ]
}

/// Strategy for a sequence of cache operations.
pub fn cache_operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<CacheOperation>> {
    prop::collection::vec(cache_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
