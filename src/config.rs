//! Broker configuration.
//!
//! Loading this from a file or environment is a host concern; the crate
//! only defines the shape and its defaults.

use chrono::Duration;
use serde::Deserialize;

fn default_proposal_ttl_seconds() -> i64 {
    3600
}

fn default_subject_cache_ttl_seconds() -> i64 {
    60
}

fn default_replay_window_seconds() -> i64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    #[serde(rename = "proposalTtlSeconds")]
    proposal_ttl_seconds: i64,
    #[serde(rename = "subjectCacheTtlSeconds")]
    subject_cache_ttl_seconds: i64,
    #[serde(rename = "replayWindowSeconds")]
    replay_window_seconds: i64,

    #[serde(skip)]
    pub proposal_ttl: Duration,
    #[serde(skip)]
    pub subject_cache_ttl: Duration,
    #[serde(skip)]
    pub replay_window: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            proposal_ttl_seconds: default_proposal_ttl_seconds(),
            subject_cache_ttl_seconds: default_subject_cache_ttl_seconds(),
            replay_window_seconds: default_replay_window_seconds(),
            proposal_ttl: Duration::seconds(default_proposal_ttl_seconds()),
            subject_cache_ttl: Duration::seconds(default_subject_cache_ttl_seconds()),
            replay_window: Duration::seconds(default_replay_window_seconds()),
        }
    }
}

impl BrokerConfig {
    /// Derives the `chrono::Duration` fields from the seconds deserialized
    /// off the wire. Call this once after `serde_yaml`/`toml` deserializes
    /// a `BrokerConfig` (the `Duration` fields themselves are `#[serde(skip)]`
    /// since `chrono::Duration` has no stable textual wire format here).
    pub fn finalize(mut self) -> Self {
        self.proposal_ttl = Duration::seconds(self.proposal_ttl_seconds);
        self.subject_cache_ttl = Duration::seconds(self.subject_cache_ttl_seconds);
        self.replay_window = Duration::seconds(self.replay_window_seconds);
        self
    }
}
