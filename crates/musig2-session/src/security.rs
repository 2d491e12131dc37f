//! Reputation tracking and message-shape validation, shared process-wide
//! and mutated only from validation paths (per the shared-resource policy:
//! readers take a brief lock rather than a snapshot, since the tables are
//! small and contention is low).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::p2p::PeerId;

#[derive(Debug, Default)]
struct PeerRecord {
    invalid_count: u32,
    banned: bool,
}

/// Process-wide reputation table. One instance is shared by a
/// [`crate::coordinator::SessionCoordinator`] across all of its sessions.
#[derive(Clone, Default)]
pub struct ReputationTable {
    peers: Arc<RwLock<HashMap<PeerId, PeerRecord>>>,
}

impl ReputationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a validation failure for `peer`. Returns `true` if this call
    /// caused the peer to cross `max_invalid` and become banned.
    pub async fn record_invalid(&self, peer: &PeerId, max_invalid: u32) -> bool {
        let mut peers = self.peers.write().await;
        let record = peers.entry(peer.clone()).or_default();
        record.invalid_count += 1;
        if record.invalid_count >= max_invalid && !record.banned {
            record.banned = true;
            return true;
        }
        record.banned
    }

    pub async fn is_banned(&self, peer: &PeerId) -> bool {
        self.peers.read().await.get(peer).is_some_and(|r| r.banned)
    }
}

/// Minimal shape checks that apply before any cryptographic verification —
/// empty keys, truncated signatures, and the like get rejected cheaply.
pub fn validate_pubkey_bytes(bytes: &[u8]) -> bool {
    bytes.len() == 33
}

pub fn validate_signature_bytes(bytes: &[u8]) -> bool {
    bytes.len() == 64
}

pub fn validate_commitment_bytes(bytes: &[u8]) -> bool {
    bytes.len() == 32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn peer_is_banned_after_reaching_threshold() {
        let table = ReputationTable::new();
        let peer: PeerId = "peer-a".into();
        assert!(!table.record_invalid(&peer, 3).await);
        assert!(!table.record_invalid(&peer, 3).await);
        assert!(table.record_invalid(&peer, 3).await);
        assert!(table.is_banned(&peer).await);
    }

    #[tokio::test]
    async fn peers_are_tracked_independently() {
        let table = ReputationTable::new();
        table.record_invalid(&"peer-a".to_string(), 10).await;
        assert!(!table.is_banned(&"peer-b".to_string()).await);
    }

    #[test]
    fn shape_validators_check_fixed_lengths() {
        assert!(validate_pubkey_bytes(&[0u8; 33]));
        assert!(!validate_pubkey_bytes(&[0u8; 32]));
        assert!(validate_signature_bytes(&[0u8; 64]));
        assert!(validate_commitment_bytes(&[0u8; 32]));
    }
}
