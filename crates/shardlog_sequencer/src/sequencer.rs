//! Address assignment.

use crate::cache::SequencerConflictCache;
use crate::config::SequencerConfig;
use crate::error::{SequencerError, SequencerResult};
use crate::resolution::{AbortCause, TxResolution, TxResolutionInfo};
use shardlog_common::{Address, StreamId};
use std::collections::{BTreeSet, HashMap};
use tracing::info;

/// A range of addresses handed out by the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    /// First assigned address.
    pub start: Address,
    /// Number of consecutive addresses assigned.
    pub count: u64,
}

impl Token {
    /// Returns the last assigned address.
    #[must_use]
    pub const fn last(&self) -> Address {
        Address::new(self.start.as_u64() + self.count - 1)
    }
}

/// Result of a transactional commit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    /// The transaction committed at `address`.
    Committed {
        /// Address assigned to the transaction's log entry.
        address: Address,
    },
    /// The transaction was rejected and no address was consumed.
    Aborted(AbortCause),
}

/// Tails reported by a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamTails {
    /// Last address assigned in the whole log, if any.
    pub global_tail: Option<Address>,
    /// Last address written to each queried stream that has been written.
    pub stream_tails: HashMap<StreamId, Address>,
}

impl StreamTails {
    /// Returns the tail of `stream`, if it has been written.
    #[must_use]
    pub fn stream_tail(&self, stream: &StreamId) -> Option<Address> {
        self.stream_tails.get(stream).copied()
    }
}

/// The single point of total order for the shared log.
///
/// Hands out strictly increasing addresses, tracks the last address of
/// every stream and resolves transactions with its conflict cache. Like the
/// cache, it expects a single caller.
pub struct Sequencer {
    config: SequencerConfig,
    cache: SequencerConflictCache,
    /// Next address to hand out.
    next_address: Address,
    stream_tails: HashMap<StreamId, Address>,
}

impl Sequencer {
    /// Creates a sequencer for a fresh log.
    pub fn new(config: SequencerConfig) -> SequencerResult<Self> {
        let cache = SequencerConflictCache::new(config.cache_capacity, Address::ZERO)?;
        Ok(Self {
            config,
            cache,
            next_address: Address::ZERO,
            stream_tails: HashMap::new(),
        })
    }

    /// Starts a new epoch from recovered tails.
    ///
    /// `global_tail` is the last address the previous sequencer assigned, as
    /// reported by [`Sequencer::query`]; the first address handed out is the
    /// one after it. Conflict information of the previous sequencer is not
    /// carried over: the cache is rebuilt with `global_tail` as its wildcard,
    /// so every transaction that read before it aborts.
    pub fn bootstrap(
        &mut self,
        global_tail: Option<Address>,
        stream_tails: HashMap<StreamId, Address>,
    ) -> SequencerResult<()> {
        let (wildcard, next_address) = match global_tail {
            Some(tail) => (
                tail,
                tail.checked_add(1)
                    .ok_or(SequencerError::AddressSpaceExhausted { tail })?,
            ),
            None => (Address::ZERO, Address::ZERO),
        };

        self.cache = SequencerConflictCache::new(self.config.cache_capacity, wildcard)?;
        self.next_address = next_address;
        self.stream_tails = stream_tails;
        info!(
            global_tail = ?global_tail,
            %next_address,
            streams = self.stream_tails.len(),
            "sequencer bootstrapped"
        );
        Ok(())
    }

    /// Assigns `count` consecutive addresses for a non-transactional append
    /// to `streams`.
    pub fn next_token(&mut self, streams: &[StreamId], count: u64) -> SequencerResult<Token> {
        if count == 0 {
            return Err(SequencerError::InvalidTokenCount { requested: count });
        }

        let start = self.next_address;
        let next = start
            .checked_add(count)
            .ok_or(SequencerError::AddressSpaceExhausted { tail: start })?;
        let token = Token { start, count };

        self.next_address = next;
        self.advance_tails(streams.iter().copied(), token.last());
        Ok(token)
    }

    /// Resolves a transaction and, if it may commit, assigns its address and
    /// records its write keys.
    ///
    /// `streams` lists the streams the transaction appends to in addition to
    /// those named by its write keys.
    pub fn commit(
        &mut self,
        info: &TxResolutionInfo,
        streams: &[StreamId],
    ) -> SequencerResult<TxOutcome> {
        if let TxResolution::Abort(cause) = self.cache.resolve(info) {
            return Ok(TxOutcome::Aborted(cause));
        }

        let address = self.next_address;
        let next = address
            .checked_add(1)
            .ok_or(SequencerError::AddressSpaceExhausted { tail: address })?;

        // Fails before mutating anything, so the address stays unassigned.
        self.cache.put(info.write_conflict_keys.clone(), address)?;
        self.next_address = next;

        let written: BTreeSet<StreamId> = info
            .write_conflict_keys
            .iter()
            .map(|key| key.stream_id())
            .chain(streams.iter().copied())
            .collect();
        self.advance_tails(written, address);

        Ok(TxOutcome::Committed { address })
    }

    /// Returns the global tail and the tails of `streams`.
    #[must_use]
    pub fn query(&self, streams: &[StreamId]) -> StreamTails {
        let stream_tails = streams
            .iter()
            .filter_map(|stream| {
                self.stream_tails
                    .get(stream)
                    .map(|tail| (*stream, *tail))
            })
            .collect();

        StreamTails {
            global_tail: self.global_tail(),
            stream_tails,
        }
    }

    /// Returns the last assigned address, if any.
    #[must_use]
    pub fn global_tail(&self) -> Option<Address> {
        self.next_address
            .as_u64()
            .checked_sub(1)
            .map(Address::new)
    }

    /// Drops conflict information below `trim_mark` after a log trim.
    ///
    /// Returns the number of conflict keys evicted.
    pub fn trim(&mut self, trim_mark: Address) -> usize {
        self.cache.evict_up_to(trim_mark)
    }

    /// Returns the conflict cache.
    #[must_use]
    pub fn cache(&self) -> &SequencerConflictCache {
        &self.cache
    }

    fn advance_tails(&mut self, streams: impl IntoIterator<Item = StreamId>, address: Address) {
        for stream in streams {
            let tail = self.stream_tails.entry(stream).or_insert(address);
            *tail = (*tail).max(address);
        }
    }
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("next_address", &self.next_address)
            .field("streams", &self.stream_tails.len())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
