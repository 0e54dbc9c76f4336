//! # ShardLog Sequencer
//!
//! Transaction conflict resolution and address assignment for the shared log.
//!
//! This crate provides:
//! - `ConflictKey`, the unit of write-write conflict tracking
//! - `SequencerConflictCache`, a bounded FIFO-on-version window of the last
//!   writer address of each conflict key
//! - Transaction resolution against that window
//! - `Sequencer`, which assigns strictly increasing global addresses and
//!   tracks per-stream tails
//!
//! ## Threading
//!
//! Nothing in this crate is internally synchronized. The sequencer is the
//! single point of total order for the log, so every call is expected to
//! come from one logical thread; mutating methods take `&mut self`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod config;
mod conflict_key;
mod error;
mod resolution;
mod sequencer;
mod stats;

pub use cache::SequencerConflictCache;
pub use config::SequencerConfig;
pub use conflict_key::ConflictKey;
pub use error::{SequencerError, SequencerResult};
pub use resolution::{AbortCause, TxResolution, TxResolutionInfo};
pub use sequencer::{Sequencer, StreamTails, Token, TxOutcome};
pub use stats::SequencerStats;
