//! # ShardLog Testkit
//!
//! Test utilities for ShardLog.
//!
//! This crate provides:
//! - Fixtures: stream tail sources, recording objects, logging setup
//! - Property-based test generators using proptest
//! - An in-memory shared log backed by a real `Sequencer`, with a counter
//!   object that reads through the MVO cache
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shardlog_testkit::prelude::*;
//!
//! #[test]
//! fn counter_reads_through_cache() {
//!     let harness = CounterHarness::new(quick_cache_config());
//!     let counter = harness.open(ObjectId::from_u128(1));
//!     harness.log.append(counter.object_id(), 5).unwrap();
//!     // ...
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::stress::*;
    pub use shardlog_common::{Address, ObjectId, StreamId};
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
