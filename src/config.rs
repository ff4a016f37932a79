//! Portal configuration.

use crate::error::Result;
use crate::search::{DEFAULT_OVERFETCH_FACTOR, DEFAULT_SEARCH_LIMIT};
use crate::stats::{DEFAULT_SAMPLE_CAP, DEFAULT_STATS_TTL};
use crate::store::StoreConfig;
use crate::subscriptions::DEFAULT_FEED_LIMIT;
use crate::validation::{TransitionPolicy, TransitionPreset};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Everything needed to stand up a [`RegistrationPortal`](crate::RegistrationPortal).
///
/// Missing keys fall back to their defaults when deserializing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub store: StoreConfig,

    /// Records per live feed when the caller does not ask for a size.
    pub default_feed_limit: usize,

    /// Largest feed a caller may request.
    pub max_feed_limit: usize,

    /// Undelivered snapshots kept per subscriber before older ones are discarded.
    pub subscription_buffer: usize,

    pub stats_ttl_secs: u64,

    /// Most recent records statistics look at.
    pub stats_sample_cap: usize,

    pub search_default_limit: usize,

    pub search_overfetch_factor: usize,

    /// Reject disputes without notes.
    pub require_dispute_notes: bool,

    pub transition_policy: TransitionPreset,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            default_feed_limit: DEFAULT_FEED_LIMIT,
            max_feed_limit: 1000,
            subscription_buffer: 256,
            stats_ttl_secs: DEFAULT_STATS_TTL.as_secs(),
            stats_sample_cap: DEFAULT_SAMPLE_CAP,
            search_default_limit: DEFAULT_SEARCH_LIMIT,
            search_overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
            require_dispute_notes: false,
            transition_policy: TransitionPreset::Permissive,
        }
    }
}

impl PortalConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn stats_ttl(&self) -> Duration {
        Duration::from_secs(self.stats_ttl_secs)
    }

    pub fn transition_policy(&self) -> TransitionPolicy {
        TransitionPolicy::from_preset(self.transition_policy)
            .requiring_dispute_notes(self.require_dispute_notes)
    }

    /// Clamp a requested feed size to `1..=max_feed_limit`, defaulting when absent.
    pub fn feed_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_feed_limit)
            .clamp(1, self.max_feed_limit.max(1))
    }
}
