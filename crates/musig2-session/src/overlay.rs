//! The two external contracts this crate consumes instead of implementing
//! networking itself: a peer-to-peer overlay and an optional identity
//! policy hook. Concrete adapters (e.g. [`crate::overlay_nostr`]) implement
//! `Overlay`; the core never depends on a specific transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use musig2::secp256k1::PublicKey;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::p2p::PeerId;

#[derive(Debug, Error, Clone)]
pub enum OverlayError {
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("dht operation failed: {0}")]
    DhtFailed(String),
}

/// A subscription handle: polling `recv` yields `(topic, bytes)` pairs as
/// they arrive. Dropping it unsubscribes.
pub struct OverlaySubscription {
    pub receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
pub trait Overlay: Send + Sync {
    async fn send_to_peer(&self, peer: &PeerId, bytes: Vec<u8>) -> Result<(), OverlayError>;
    async fn subscribe(&self, topic: &str) -> Result<OverlaySubscription, OverlayError>;
    async fn publish(&self, topic: &str, bytes: Vec<u8>) -> Result<(), OverlayError>;
    async fn put(&self, key: &str, bytes: Vec<u8>, ttl: Duration) -> Result<(), OverlayError>;
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, OverlayError>;
}

/// Optional policy hook: "is this public key permitted to advertise /
/// participate?" Absent (`None` wherever an `Arc<dyn IdentityRegistry>` is
/// expected) means allow every well-formed key.
pub trait IdentityRegistry: Send + Sync {
    fn is_allowed(&self, pubkey: &PublicKey) -> bool;
}

struct DhtRecord {
    bytes: Vec<u8>,
    expires_at_ms: Option<u64>,
}

/// In-memory `Overlay` used by this crate's own tests (and available to
/// downstream integration tests) in place of a real relay or DHT. Direct
/// sends and topic publishes are delivered via `tokio::sync::mpsc`
/// channels shared across clones of the same overlay; `put`/`get` share a
/// `Mutex<HashMap>` standing in for a DHT.
#[derive(Clone, Default)]
pub struct InProcessOverlay {
    inboxes: Arc<Mutex<HashMap<PeerId, mpsc::UnboundedSender<Vec<u8>>>>>,
    topics: Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>>>,
    dht: Arc<Mutex<HashMap<String, DhtRecord>>>,
    now_ms: Arc<Mutex<u64>>,
}

impl InProcessOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `peer` so other participants' `send_to_peer` calls reach
    /// it; returns the receiving half the peer should poll.
    pub async fn register_peer(&self, peer: PeerId) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.lock().await.insert(peer, tx);
        rx
    }

    /// Advances the overlay's notion of "now" for TTL expiry in `get`.
    /// Tests drive this instead of depending on wall-clock time.
    pub async fn advance_clock(&self, now_ms: u64) {
        *self.now_ms.lock().await = now_ms;
    }
}

#[async_trait]
impl Overlay for InProcessOverlay {
    async fn send_to_peer(&self, peer: &PeerId, bytes: Vec<u8>) -> Result<(), OverlayError> {
        let inboxes = self.inboxes.lock().await;
        match inboxes.get(peer) {
            Some(tx) => tx
                .send(bytes)
                .map_err(|_| OverlayError::PeerUnreachable(peer.clone())),
            None => Err(OverlayError::PeerUnreachable(peer.clone())),
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<OverlaySubscription, OverlayError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(OverlaySubscription { receiver: rx })
    }

    async fn publish(&self, topic: &str, bytes: Vec<u8>) -> Result<(), OverlayError> {
        let topics = self.topics.lock().await;
        if let Some(subscribers) = topics.get(topic) {
            for tx in subscribers {
                let _ = tx.send(bytes.clone());
            }
        }
        Ok(())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, ttl: Duration) -> Result<(), OverlayError> {
        let now = *self.now_ms.lock().await;
        let expires_at_ms = if ttl.is_zero() { None } else { Some(now + ttl.as_millis() as u64) };
        self.dht
            .lock()
            .await
            .insert(key.to_string(), DhtRecord { bytes, expires_at_ms });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, OverlayError> {
        let now = *self.now_ms.lock().await;
        let mut dht = self.dht.lock().await;
        match dht.get(key) {
            Some(record) => {
                if record.expires_at_ms.is_some_and(|exp| exp < now) {
                    dht.remove(key);
                    Ok(None)
                } else {
                    Ok(Some(record.bytes.clone()))
                }
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn direct_send_reaches_registered_peer() {
        let overlay = InProcessOverlay::new();
        let mut rx = overlay.register_peer("peer-b".into()).await;
        overlay.send_to_peer(&"peer-b".to_string(), b"hello".to_vec()).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received, b"hello");
    }

    #[tokio::test]
    async fn send_to_unknown_peer_fails() {
        let overlay = InProcessOverlay::new();
        let result = overlay.send_to_peer(&"ghost".to_string(), b"hi".to_vec()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn publish_fans_out_to_all_subscribers() {
        let overlay = InProcessOverlay::new();
        let mut sub_a = overlay.subscribe("topic").await.unwrap();
        let mut sub_b = overlay.subscribe("topic").await.unwrap();
        overlay.publish("topic", b"event".to_vec()).await.unwrap();
        assert_eq!(sub_a.receiver.recv().await.unwrap(), b"event");
        assert_eq!(sub_b.receiver.recv().await.unwrap(), b"event");
    }

    #[tokio::test]
    async fn dht_put_get_roundtrips_and_respects_ttl() {
        let overlay = InProcessOverlay::new();
        overlay.advance_clock(1_000).await;
        overlay.put("key", b"value".to_vec(), Duration::from_millis(500)).await.unwrap();
        assert_eq!(overlay.get("key").await.unwrap(), Some(b"value".to_vec()));
        overlay.advance_clock(2_000).await;
        assert_eq!(overlay.get("key").await.unwrap(), None);
    }
}
