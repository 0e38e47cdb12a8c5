//! Engine configuration.
//!
//! Plain data supplied at construction, embeddable in a host application's
//! configuration file. No environment variables or CLI flags belong here.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use crate::refresh::RefreshTiers;

// Default values for coherence configuration
const DEFAULT_HISTORY_CAPACITY: usize = 50;
const DEFAULT_REFRESH_INTERVAL_MS: u64 = 30_000;

/// Configuration for a coherence runtime.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoherenceConfig {
    /// Maximum domain events retained in the history buffer.
    pub history_capacity: usize,
    /// High-tier background refresh period in milliseconds.
    pub refresh_interval_ms: u64,
    /// Whether the background refresh loop starts with the runtime.
    pub enable_background_refresh: bool,
    /// Partition of base keys into refresh tiers.
    pub refresh_tiers: RefreshTiers,
}

impl Default for CoherenceConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            enable_background_refresh: true,
            refresh_tiers: RefreshTiers::default(),
        }
    }
}

impl CoherenceConfig {
    /// High-tier refresh period as a `Duration`.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    /// History capacity as `NonZeroUsize`, clamping to 1 if zero.
    pub fn history_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.history_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
