//! Sequencer configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the sequencer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Maximum number of conflict keys held by the conflict cache.
    pub cache_capacity: usize,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 250_000,
        }
    }
}

impl SequencerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the conflict cache capacity.
    #[must_use]
    pub const fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }
}
