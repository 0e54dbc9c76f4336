//! Global log addresses.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A position in the global shared log.
///
/// Addresses are assigned by the sequencer in strictly increasing order and
/// double as logical timestamps: an object's version is the address of the
/// last log entry applied to it. Absent addresses are modelled as
/// `Option<Address>` rather than with sentinel values.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Address(pub u64);

impl Address {
    /// The first address of a fresh log.
    pub const ZERO: Address = Address(0);

    /// The largest representable address.
    pub const MAX: Address = Address(u64::MAX);

    /// Creates a new address.
    #[must_use]
    pub const fn new(address: u64) -> Self {
        Self(address)
    }

    /// Returns the raw address value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the address `n` positions after this one, or `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, n: u64) -> Option<Self> {
        match self.0.checked_add(n) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl From<u64> for Address {
    fn from(address: u64) -> Self {
        Self(address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "addr:{}", self.0)
    }
}
