//! Snapshot proxies: caller-facing handles to one cached version.
//!
//! The cache never hands out its snapshots directly. A lookup calls a
//! factory that wraps the immutable base snapshot in a proxy. Two kinds are
//! provided:
//! - [`SnapshotReferenceProxy`] shares the cached snapshot and is read-only;
//! - [`MaterializedSnapshotProxy`] owns a private copy a transaction may
//!   apply its own uncommitted updates to.

use crate::object::VersionedObjectIdentifier;
use parking_lot::RwLock;
use std::sync::Arc;

/// A handle bound to one immutable object state at a specific version.
pub trait SnapshotProxy<T>: Send + Sync {
    /// Returns the version this proxy was created for.
    fn vo_id(&self) -> VersionedObjectIdentifier;

    /// Returns true if the proxy points directly into the cached snapshot.
    ///
    /// Such proxies are registered with their cache entry.
    fn holds_snapshot_reference(&self) -> bool;
}

/// Read-only proxy sharing the cached snapshot.
pub struct SnapshotReferenceProxy<T> {
    vo_id: VersionedObjectIdentifier,
    snapshot: Arc<T>,
}

impl<T> SnapshotReferenceProxy<T> {
    /// Wraps a cached snapshot.
    pub fn new(vo_id: VersionedObjectIdentifier, snapshot: Arc<T>) -> Self {
        Self { vo_id, snapshot }
    }

    /// Factory suitable for `MvoCache::get` and `MvoCache::floor_entry`.
    pub fn generate(vo_id: VersionedObjectIdentifier, snapshot: Arc<T>) -> Arc<Self> {
        Arc::new(Self::new(vo_id, snapshot))
    }

    /// Returns the snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &T {
        &self.snapshot
    }

    /// Returns true if both proxies share the same snapshot allocation.
    #[must_use]
    pub fn shares_snapshot(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.snapshot, &other.snapshot)
    }
}

impl<T: Send + Sync> SnapshotProxy<T> for SnapshotReferenceProxy<T> {
    fn vo_id(&self) -> VersionedObjectIdentifier {
        self.vo_id
    }

    fn holds_snapshot_reference(&self) -> bool {
        true
    }
}

/// Proxy owning a private copy of the snapshot.
///
/// Transactions apply their buffered writes to the copy, so reads within the
/// transaction observe them without touching the shared cache entry.
pub struct MaterializedSnapshotProxy<T> {
    vo_id: VersionedObjectIdentifier,
    state: RwLock<T>,
}

impl<T: Clone> MaterializedSnapshotProxy<T> {
    /// Copies a cached snapshot.
    pub fn new(vo_id: VersionedObjectIdentifier, snapshot: &T) -> Self {
        Self {
            vo_id,
            state: RwLock::new(snapshot.clone()),
        }
    }

    /// Factory suitable for `MvoCache::get` and `MvoCache::floor_entry`.
    pub fn generate(vo_id: VersionedObjectIdentifier, snapshot: Arc<T>) -> Arc<Self> {
        Arc::new(Self::new(vo_id, &snapshot))
    }
}

impl<T> MaterializedSnapshotProxy<T> {
    /// Reads the private copy.
    pub fn access<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.state.read())
    }

    /// Applies a transaction-local update to the private copy.
    pub fn apply<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut *self.state.write())
    }
}

impl<T: Send + Sync> SnapshotProxy<T> for MaterializedSnapshotProxy<T> {
    fn vo_id(&self) -> VersionedObjectIdentifier {
        self.vo_id
    }

    fn holds_snapshot_reference(&self) -> bool {
        false
    }
}
