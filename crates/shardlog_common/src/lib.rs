//! # ShardLog Common
//!
//! Types shared by the sequencer and the client runtime.
//!
//! This crate provides:
//! - `Address`, a position in the global shared log
//! - `StreamId` / `ObjectId`, the 128-bit identifiers of streams and the
//!   objects materialized from them
//! - `ShutdownSignal`, an interruptible stop flag for background workers

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod address;
mod id;
mod shutdown;

pub use address::Address;
pub use id::{ObjectId, StreamId};
pub use shutdown::ShutdownSignal;
