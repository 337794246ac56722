//! Simulation configuration.
//!
//! [`SimConfig`] is plain data: it can be built in code, or parsed from JSON
//! where every field is optional and falls back to its default.

use serde::{Deserialize, Serialize};

/// Settings fixed for the lifetime of a world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed of the world's random number generator. Two worlds created with
    /// the same seed draw the same numbers.
    pub seed: u64,
    /// Ticks between state-hash checkpoints in a replay recording. 0 disables
    /// checkpoints.
    pub sync_interval: u32,
}

impl Default for SimConfig {
    /// Seed `0x5EED`, a sync checkpoint every 100 ticks.
    fn default() -> Self {
        Self {
            seed: 0x5EED,
            sync_interval: 100,
        }
    }
}

impl SimConfig {
    /// Parse a JSON object. Missing fields take their default.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Builder-style seed override.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Builder-style sync interval override.
    pub fn with_sync_interval(mut self, sync_interval: u32) -> Self {
        self.sync_interval = sync_interval;
        self
    }
}
