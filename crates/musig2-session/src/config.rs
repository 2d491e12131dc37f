//! Every tunable the coordination layer recognizes, with defaults matching
//! the documented values exactly. Host applications may deserialize this
//! from TOML/JSON/env the way `nostring-server`'s daemon config did; that
//! crate is gone from this workspace, but a plain `Default`-backed
//! deserializable struct is the pattern worth keeping.

use serde::{Deserialize, Serialize};

use crate::election::ElectionMethod;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub session_timeout_ms: u64,
    pub stuck_timeout_ms: u64,
    pub cleanup_interval_ms: u64,
    pub max_sequence_gap: u64,
    pub max_timestamp_skew_ms: u64,
    pub max_invalid_messages_per_peer: u32,
    pub max_signers: usize,
    pub min_signers: usize,
    pub election_method: ElectionMethod,
    pub enable_failover: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            session_timeout_ms: 7_200_000,
            stuck_timeout_ms: 600_000,
            cleanup_interval_ms: 60_000,
            max_sequence_gap: 100,
            max_timestamp_skew_ms: 300_000,
            max_invalid_messages_per_peer: 10,
            max_signers: 15,
            min_signers: 2,
            election_method: ElectionMethod::Lexicographic,
            enable_failover: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.session_timeout_ms, 7_200_000);
        assert_eq!(config.stuck_timeout_ms, 600_000);
        assert_eq!(config.cleanup_interval_ms, 60_000);
        assert_eq!(config.max_sequence_gap, 100);
        assert_eq!(config.max_timestamp_skew_ms, 300_000);
        assert_eq!(config.max_invalid_messages_per_peer, 10);
        assert_eq!(config.max_signers, 15);
        assert_eq!(config.min_signers, 2);
        assert!(config.enable_failover);
    }

    #[test]
    fn deserializes_from_partial_json_using_defaults_for_the_rest() {
        let config: CoordinatorConfig = serde_json::from_str(r#"{"max_signers": 5}"#).unwrap();
        assert_eq!(config.max_signers, 5);
        assert_eq!(config.min_signers, 2);
    }
}
