//! # ShardLog Runtime
//!
//! Client-side support for transactional reads over the shared log.
//!
//! This crate provides:
//! - `VersionedObjectIdentifier`, the (object, version) cache key
//! - Snapshot proxies, the caller-facing handles to cached snapshots
//! - `MvoCache`, a concurrent cache of materialized object snapshots with
//!   exact, floor and prefix-eviction operations
//! - Background eviction ordering and hot-object sync workers
//!
//! ## Consistency
//!
//! The cache keeps two structures: the bounded snapshot cache and a per-object
//! index of known versions. The index is reconciled with the cache
//! asynchronously, so a version may be listed after its snapshot is gone.
//! Reads always treat a missing snapshot as a miss; data is never rebuilt
//! from the index.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod mvo;
mod object;
mod proxy;
mod stats;

pub use config::{MvoCacheConfig, MAX_CACHE_EXPIRY};
pub use error::{RuntimeError, RuntimeResult};
pub use mvo::{MvoCache, MvoCacheEviction, MvoCacheSync};
pub use object::{MultiVersionObject, StreamTailSource, VersionedObjectIdentifier};
pub use proxy::{MaterializedSnapshotProxy, SnapshotProxy, SnapshotReferenceProxy};
pub use stats::MvoCacheStats;
