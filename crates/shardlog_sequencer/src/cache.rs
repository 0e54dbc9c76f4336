//! Sequencer conflict cache.
//!
//! The cache maps conflict keys to the address of their latest write:
//!
//! ```text
//! conflict key | ck1 | ck2 | ck3 | ck4
//! address      | v1  | v1  | v2  | v3
//! ```
//!
//! When the cache is full the oldest keys are evicted, but eviction works on
//! whole addresses: evicting `ck1` alone is not allowed, `ck1` and `ck2` go
//! together. Likewise `ck3` cannot go before the keys at `v1`. Either would
//! leave a hole in the resolution window and transactions could be resolved
//! against the wrong boundary. The eviction policy is therefore FIFO on the
//! address.
//!
//! A sorted map of address to keys acts as the sliding window, and
//! `max_conflict_wildcard` remembers where the window starts.

use crate::conflict_key::ConflictKey;
use crate::error::{SequencerError, SequencerResult};
use crate::stats::SequencerStats;
use shardlog_common::Address;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Bounded, FIFO-on-version window of conflict keys.
///
/// Not thread-safe: the sequencer serializes every call. Mutating methods
/// take `&mut self` so the compiler enforces a single writer.
pub struct SequencerConflictCache {
    /// Latest global-log address of every tracked conflict key.
    conflict_key_map: HashMap<ConflictKey, Address>,
    /// Conflict keys last written at each address, used to evict every key
    /// of a commit together.
    version_map: BTreeMap<Address, HashSet<ConflictKey>>,
    /// Maximum number of conflict keys.
    capacity: usize,
    /// Highest address whose keys have been evicted from the cache.
    max_conflict_wildcard: Address,
    /// Highest evicted address at the time this sequencer was elected.
    /// Snapshots below it abort with a new-sequencer cause.
    max_conflict_new_sequencer: Address,
    stats: Arc<SequencerStats>,
}

impl SequencerConflictCache {
    /// Creates a conflict cache.
    ///
    /// `max_conflict_new_sequencer` is carried over from the previous
    /// sequencer and seeds the wildcard.
    pub fn new(capacity: usize, max_conflict_new_sequencer: Address) -> SequencerResult<Self> {
        if capacity == 0 {
            return Err(SequencerError::InvalidCapacity);
        }

        Ok(Self {
            conflict_key_map: HashMap::new(),
            version_map: BTreeMap::new(),
            capacity,
            max_conflict_wildcard: max_conflict_new_sequencer,
            max_conflict_new_sequencer,
            stats: Arc::new(SequencerStats::new()),
        })
    }

    /// Returns the address of the latest write of `key`, if it is cached.
    #[must_use]
    pub fn get(&self, key: &ConflictKey) -> Option<Address> {
        self.conflict_key_map.get(key).copied()
    }

    /// Returns the smallest address in the cache.
    #[must_use]
    pub fn first_address(&self) -> Option<Address> {
        self.version_map.keys().next().copied()
    }

    /// Returns the number of tracked conflict keys.
    #[must_use]
    pub fn size(&self) -> usize {
        self.conflict_key_map.len()
    }

    /// Returns true if no conflict keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conflict_key_map.is_empty()
    }

    /// Returns the number of distinct addresses in the window.
    #[must_use]
    pub fn window_size(&self) -> usize {
        self.version_map.len()
    }

    /// Returns the maximum number of conflict keys.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the highest address evicted so far.
    #[must_use]
    pub const fn max_conflict_wildcard(&self) -> Address {
        self.max_conflict_wildcard
    }

    /// Returns the wildcard this cache was created with.
    #[must_use]
    pub const fn max_conflict_new_sequencer(&self) -> Address {
        self.max_conflict_new_sequencer
    }

    /// Returns a handle to the cache statistics.
    #[must_use]
    pub fn stats(&self) -> Arc<SequencerStats> {
        Arc::clone(&self.stats)
    }

    /// Returns the conflict keys last written at `address`.
    #[must_use]
    pub fn keys_at(&self, address: Address) -> Option<&HashSet<ConflictKey>> {
        self.version_map.get(&address)
    }

    /// Records that `conflict_keys` were written at `tx_version`, evicting
    /// older addresses as needed to stay within capacity.
    ///
    /// Every precondition is checked before anything is modified, so on
    /// error the cache is unchanged:
    /// - `tx_version` must not already be in the cache;
    /// - `tx_version` must be greater than the smallest cached address;
    /// - every key's previous address must be lower than `tx_version`.
    pub fn put(
        &mut self,
        conflict_keys: HashSet<ConflictKey>,
        tx_version: Address,
    ) -> SequencerResult<()> {
        if self.version_map.contains_key(&tx_version) {
            return Err(SequencerError::DuplicateTxVersion { tx_version });
        }

        if let Some(smallest) = self.first_address() {
            if tx_version <= smallest {
                return Err(SequencerError::TxVersionBelowWindow {
                    tx_version,
                    smallest,
                });
            }
        }

        for key in &conflict_keys {
            if let Some(prev_version) = self.get(key) {
                if prev_version >= tx_version {
                    return Err(SequencerError::regression(
                        key.clone(),
                        prev_version,
                        tx_version,
                    ));
                }
            }
        }

        if conflict_keys.is_empty() {
            return Ok(());
        }

        for key in &conflict_keys {
            if let Some(prev_version) = self.conflict_key_map.insert(key.clone(), tx_version) {
                self.unlink(prev_version, key);
            }
        }

        self.version_map.insert(tx_version, conflict_keys);

        // May evict several addresses when a large commit lands on a full cache.
        self.evict();
        self.update_gauges();
        Ok(())
    }

    /// Evicts every address strictly below `trim_mark`.
    ///
    /// Returns the number of conflict keys evicted.
    pub fn evict_up_to(&mut self, trim_mark: Address) -> usize {
        let mut num_addresses = 0usize;
        let mut num_keys = 0usize;

        if self.first_address().is_some_and(|first| first < trim_mark) {
            debug!(%trim_mark, "evictUpTo");
        }

        while let Some(first) = self.first_address() {
            if first >= trim_mark {
                break;
            }
            num_keys += self.evict_smallest_tx_version();
            num_addresses += 1;
        }

        self.update_gauges();
        info!(
            entries = num_keys,
            addresses = num_addresses,
            "evictUpTo"
        );
        num_keys
    }

    /// Removes `key` from the bucket at `address`, dropping the bucket once
    /// it is empty.
    fn unlink(&mut self, address: Address, key: &ConflictKey) {
        if let Some(entries) = self.version_map.get_mut(&address) {
            entries.remove(key);
            if entries.is_empty() {
                self.version_map.remove(&address);
            }
        }
    }

    /// Evicts every key at the smallest address and raises the wildcard.
    ///
    /// Returns the number of keys evicted.
    fn evict_smallest_tx_version(&mut self) -> usize {
        let Some((first_address, entries)) = self.version_map.pop_first() else {
            return 0;
        };

        let num_deleted = entries.len();
        trace!(
            items = num_deleted,
            min_address = %first_address,
            "evictSmallestTxVersion"
        );
        for key in &entries {
            self.conflict_key_map.remove(key);
        }

        self.max_conflict_wildcard = self.max_conflict_wildcard.max(first_address);
        self.stats.record_eviction(num_deleted);
        num_deleted
    }

    /// Evicts whole addresses until the cache is within capacity.
    fn evict(&mut self) {
        while self.conflict_key_map.len() > self.capacity {
            self.evict_smallest_tx_version();
        }
    }

    fn update_gauges(&self) {
        self.stats
            .set_sizes(self.conflict_key_map.len(), self.version_map.len());
    }
}

impl std::fmt::Debug for SequencerConflictCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequencerConflictCache")
            .field("size", &self.size())
            .field("window_size", &self.window_size())
            .field("capacity", &self.capacity)
            .field("max_conflict_wildcard", &self.max_conflict_wildcard)
            .field("max_conflict_new_sequencer", &self.max_conflict_new_sequencer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardlog_common::StreamId;

    fn key(stream: u128, param: u8) -> ConflictKey {
        ConflictKey::new(StreamId::from_u128(stream), vec![param])
    }

    fn keys(items: &[ConflictKey]) -> HashSet<ConflictKey> {
        items.iter().cloned().collect()
    }

    fn addr(v: u64) -> Address {
        Address::new(v)
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(matches!(
            SequencerConflictCache::new(0, Address::ZERO),
            Err(SequencerError::InvalidCapacity)
        ));
    }

    #[test]
    fn new_cache_is_empty() {
        let cache = SequencerConflictCache::new(4, addr(7)).unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.first_address(), None);
        assert_eq!(cache.max_conflict_wildcard(), addr(7));
        assert_eq!(cache.max_conflict_new_sequencer(), addr(7));
        assert_eq!(cache.get(&key(1, 1)), None);
    }

    #[test]
    fn put_and_get() {
        let mut cache = SequencerConflictCache::new(10, Address::ZERO).unwrap();
        cache.put(keys(&[key(1, 1), key(1, 2)]), addr(5)).unwrap();

        assert_eq!(cache.get(&key(1, 1)), Some(addr(5)));
        assert_eq!(cache.get(&key(1, 2)), Some(addr(5)));
        assert_eq!(cache.size(), 2);
        assert_eq!(cache.window_size(), 1);
        assert_eq!(cache.first_address(), Some(addr(5)));
    }

    #[test]
    fn overwrite_moves_key_and_drops_empty_bucket() {
        let mut cache = SequencerConflictCache::new(10, Address::ZERO).unwrap();
        cache.put(keys(&[key(1, 1)]), addr(1)).unwrap();
        cache.put(keys(&[key(1, 1)]), addr(2)).unwrap();

        assert_eq!(cache.get(&key(1, 1)), Some(addr(2)));
        assert_eq!(cache.size(), 1);
        assert!(cache.keys_at(addr(1)).is_none());
        assert_eq!(cache.first_address(), Some(addr(2)));
    }

    #[test]
    fn overwrite_keeps_bucket_with_remaining_keys() {
        let mut cache = SequencerConflictCache::new(10, Address::ZERO).unwrap();
        cache.put(keys(&[key(1, 1), key(1, 2)]), addr(1)).unwrap();
        cache.put(keys(&[key(1, 1)]), addr(2)).unwrap();

        let remaining = cache.keys_at(addr(1)).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains(&key(1, 2)));
    }

    #[test]
    fn capacity_eviction_scenario() {
        let mut cache = SequencerConflictCache::new(2, Address::ZERO).unwrap();
        cache.put(keys(&[key(1, 1)]), addr(10)).unwrap();
        cache.put(keys(&[key(1, 2)]), addr(20)).unwrap();
        assert_eq!(cache.size(), 2);

        cache.put(keys(&[key(1, 3)]), addr(30)).unwrap();
        assert!(cache.size() <= 2);
        assert_eq!(cache.get(&key(1, 1)), None);
        assert_eq!(cache.get(&key(1, 2)), Some(addr(20)));
        assert_eq!(cache.get(&key(1, 3)), Some(addr(30)));
        assert!(cache.max_conflict_wildcard() >= addr(10));
    }

    #[test]
    fn eviction_is_whole_bucket() {
        let mut cache = SequencerConflictCache::new(3, Address::ZERO).unwrap();
        cache.put(keys(&[key(1, 1), key(1, 2)]), addr(1)).unwrap();
        cache.put(keys(&[key(1, 3)]), addr(2)).unwrap();
        cache.put(keys(&[key(1, 4)]), addr(3)).unwrap();

        // Over capacity by one, but both keys at address 1 must leave.
        assert_eq!(cache.size(), 2);
        assert_eq!(cache.get(&key(1, 1)), None);
        assert_eq!(cache.get(&key(1, 2)), None);
        assert_eq!(cache.max_conflict_wildcard(), addr(1));
    }

    #[test]
    fn large_put_evicts_multiple_addresses() {
        let mut cache = SequencerConflictCache::new(3, Address::ZERO).unwrap();
        cache.put(keys(&[key(1, 1)]), addr(1)).unwrap();
        cache.put(keys(&[key(1, 2)]), addr(2)).unwrap();
        cache
            .put(keys(&[key(2, 1), key(2, 2), key(2, 3)]), addr(3))
            .unwrap();

        assert_eq!(cache.size(), 3);
        assert_eq!(cache.first_address(), Some(addr(3)));
        assert_eq!(cache.max_conflict_wildcard(), addr(2));
    }

    #[test]
    fn put_larger_than_capacity_evicts_itself() {
        let mut cache = SequencerConflictCache::new(1, Address::ZERO).unwrap();
        cache.put(keys(&[key(1, 1), key(1, 2)]), addr(4)).unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.max_conflict_wildcard(), addr(4));
    }

    #[test]
    fn duplicate_tx_version_rejected() {
        let mut cache = SequencerConflictCache::new(10, Address::ZERO).unwrap();
        cache.put(keys(&[key(1, 1)]), addr(5)).unwrap();
        let err = cache.put(keys(&[key(1, 2)]), addr(5)).unwrap_err();
        assert!(matches!(err, SequencerError::DuplicateTxVersion { .. }));
        assert_eq!(cache.get(&key(1, 2)), None);
    }

    #[test]
    fn tx_version_below_window_rejected() {
        let mut cache = SequencerConflictCache::new(10, Address::ZERO).unwrap();
        cache.put(keys(&[key(1, 1)]), addr(5)).unwrap();
        let err = cache.put(keys(&[key(1, 2)]), addr(3)).unwrap_err();
        assert!(matches!(
            err,
            SequencerError::TxVersionBelowWindow { smallest, .. } if smallest == addr(5)
        ));
    }

    #[test]
    fn regression_rejected_without_partial_update() {
        let mut cache = SequencerConflictCache::new(10, Address::ZERO).unwrap();
        cache.put(keys(&[key(1, 1)]), addr(2)).unwrap();
        cache.put(keys(&[key(1, 2)]), addr(8)).unwrap();

        // key(1, 2) was written at 8, so writing it at 6 is a regression.
        let err = cache
            .put(keys(&[key(1, 1), key(1, 2), key(1, 3)]), addr(6))
            .unwrap_err();
        assert!(matches!(
            err,
            SequencerError::SequencerRegression { prev_version, tx_version, .. }
                if prev_version == addr(8) && tx_version == addr(6)
        ));

        assert_eq!(cache.get(&key(1, 1)), Some(addr(2)));
        assert_eq!(cache.get(&key(1, 3)), None);
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn empty_key_set_is_not_recorded() {
        let mut cache = SequencerConflictCache::new(10, Address::ZERO).unwrap();
        cache.put(HashSet::new(), addr(3)).unwrap();
        assert_eq!(cache.first_address(), None);
        assert_eq!(cache.window_size(), 0);
    }

    #[test]
    fn evict_up_to_excludes_trim_mark() {
        let mut cache = SequencerConflictCache::new(10, Address::ZERO).unwrap();
        cache.put(keys(&[key(1, 1), key(1, 2)]), addr(1)).unwrap();
        cache.put(keys(&[key(1, 3)]), addr(2)).unwrap();
        cache.put(keys(&[key(1, 4)]), addr(3)).unwrap();

        let evicted = cache.evict_up_to(addr(3));
        assert_eq!(evicted, 3);
        assert_eq!(cache.first_address(), Some(addr(3)));
        assert_eq!(cache.get(&key(1, 4)), Some(addr(3)));
        assert_eq!(cache.max_conflict_wildcard(), addr(2));
    }

    #[test]
    fn evict_up_to_below_window_is_noop() {
        let mut cache = SequencerConflictCache::new(10, addr(1)).unwrap();
        cache.put(keys(&[key(1, 1)]), addr(5)).unwrap();
        assert_eq!(cache.evict_up_to(addr(5)), 0);
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.max_conflict_wildcard(), addr(1));
    }

    #[test]
    fn wildcard_never_decreases() {
        let mut cache = SequencerConflictCache::new(1, addr(100)).unwrap();
        cache.put(keys(&[key(1, 1)]), addr(101)).unwrap();
        cache.put(keys(&[key(1, 2)]), addr(102)).unwrap();
        assert_eq!(cache.max_conflict_wildcard(), addr(101));

        let mut cache = SequencerConflictCache::new(1, addr(100)).unwrap();
        cache.put(keys(&[key(1, 1)]), addr(3)).unwrap();
        cache.put(keys(&[key(1, 2)]), addr(4)).unwrap();
        // Evicting address 3 must not pull the wildcard below its seed.
        assert_eq!(cache.max_conflict_wildcard(), addr(100));
    }

    #[test]
    fn stats_track_sizes_and_evictions() {
        let mut cache = SequencerConflictCache::new(2, Address::ZERO).unwrap();
        let stats = cache.stats();
        cache.put(keys(&[key(1, 1)]), addr(1)).unwrap();
        cache.put(keys(&[key(1, 2)]), addr(2)).unwrap();
        cache.put(keys(&[key(1, 3)]), addr(3)).unwrap();

        assert_eq!(stats.conflict_keys(), 2);
        assert_eq!(stats.window_size(), 2);
        assert_eq!(stats.evicted_keys(), 1);
        assert_eq!(stats.evicted_addresses(), 1);
    }
}
