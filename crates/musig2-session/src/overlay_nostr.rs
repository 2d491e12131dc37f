//! Concrete [`Overlay`] adapter over Nostr relays.
//!
//! Direct sends are NIP-44 encrypted DMs; pub/sub topics and DHT-style
//! put/get are addressable (parameterized-replaceable) events keyed by a
//! `d` tag, following the same `Client`/`EventBuilder`/`Filter` shapes used
//! for encrypted DM delivery elsewhere in this workspace's Nostr code.
//! Gated behind the `nostr-overlay` feature so the core never links
//! `nostr-sdk` directly.

use std::sync::Arc;
use std::time::Duration;

use musig2::secp256k1::PublicKey as Secp256k1PublicKey;
use nostr_sdk::prelude::*;
use tokio::sync::{mpsc, Mutex};

use crate::overlay::{Overlay, OverlayError, OverlaySubscription};
use crate::p2p::PeerId;

/// Addressable event kind used for pub/sub topics and DHT-style records.
/// Parameterized-replaceable range per NIP-33; the `d` tag carries the
/// topic name or DHT key.
const COORDINATION_KIND: Kind = Kind::Custom(30_091);

fn parse_peer(peer: &PeerId) -> Result<PublicKey, OverlayError> {
    PublicKey::from_hex(peer).map_err(|e| OverlayError::PeerUnreachable(format!("bad peer id {peer}: {e}")))
}

/// One Nostr identity's view of the overlay: a connected `Client` plus the
/// subscriptions this process has registered, so `subscribe` can fan
/// incoming events out to more than one caller per topic.
pub struct NostrOverlay {
    client: Client,
    keys: Keys,
    subscribers: Arc<Mutex<Vec<(String, mpsc::UnboundedSender<Vec<u8>>)>>>,
}

impl NostrOverlay {
    /// Connects to `relays` under `keys` and starts the background task
    /// that fans out relay notifications to registered topic subscribers.
    pub async fn connect(keys: Keys, relays: &[String]) -> Result<Self, OverlayError> {
        let client = Client::new(keys.clone());
        for relay in relays {
            client
                .add_relay(relay.as_str())
                .await
                .map_err(|e| OverlayError::PublishFailed(format!("add_relay {relay}: {e}")))?;
        }
        client.connect().await;

        let overlay = NostrOverlay {
            client,
            keys,
            subscribers: Arc::new(Mutex::new(Vec::new())),
        };
        overlay.spawn_notification_pump();
        Ok(overlay)
    }

    fn spawn_notification_pump(&self) {
        let mut notifications = self.client.notifications();
        let subscribers = Arc::clone(&self.subscribers);
        tokio::spawn(async move {
            while let Ok(notification) = notifications.recv().await {
                let RelayPoolNotification::Event { event, .. } = notification else {
                    continue;
                };
                let Some(topic) = event.tags.iter().find_map(|tag| {
                    let values = tag.as_vec();
                    (values.first().map(String::as_str) == Some("d")).then(|| values.get(1).cloned())?
                }) else {
                    continue;
                };
                let bytes = match hex::decode(&event.content) {
                    Ok(b) => b,
                    Err(_) => continue,
                };
                let mut subs = subscribers.lock().await;
                subs.retain(|(t, tx)| t != &topic || tx.send(bytes.clone()).is_ok());
            }
        });
    }

    async fn publish_addressable(&self, key: &str, bytes: &[u8], ttl: Duration) -> Result<(), OverlayError> {
        let mut builder = EventBuilder::new(COORDINATION_KIND, hex::encode(bytes))
            .tag(Tag::custom(TagKind::d(), vec![key.to_string()]));
        if !ttl.is_zero() {
            let expires_at = Timestamp::now() + ttl.as_secs();
            builder = builder.tag(Tag::expiration(expires_at));
        }
        let event = builder
            .sign_with_keys(&self.keys)
            .map_err(|e| OverlayError::PublishFailed(format!("sign failed: {e}")))?;
        self.client
            .send_event(event)
            .await
            .map_err(|e| OverlayError::PublishFailed(format!("send_event failed: {e}")))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Overlay for NostrOverlay {
    async fn send_to_peer(&self, peer: &PeerId, bytes: Vec<u8>) -> Result<(), OverlayError> {
        let recipient = parse_peer(peer)?;
        let content = hex::encode(&bytes);
        let encrypted = nip44::encrypt(self.keys.secret_key(), &recipient, &content, nip44::Version::V2)
            .map_err(|e| OverlayError::PublishFailed(format!("nip44 encrypt failed: {e}")))?;
        let event = EventBuilder::new(Kind::EncryptedDirectMessage, encrypted)
            .tag(Tag::public_key(recipient))
            .sign_with_keys(&self.keys)
            .map_err(|e| OverlayError::PublishFailed(format!("sign failed: {e}")))?;
        self.client
            .send_event(event)
            .await
            .map_err(|e| OverlayError::PeerUnreachable(format!("send_event failed: {e}")))?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<OverlaySubscription, OverlayError> {
        let filter = Filter::new().kind(COORDINATION_KIND).custom_tag(SingleLetterTag::lowercase(Alphabet::D), topic);
        self.client
            .subscribe(filter, None)
            .await
            .map_err(|e| OverlayError::PublishFailed(format!("subscribe failed: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().await.push((topic.to_string(), tx));
        Ok(OverlaySubscription { receiver: rx })
    }

    async fn publish(&self, topic: &str, bytes: Vec<u8>) -> Result<(), OverlayError> {
        self.publish_addressable(topic, &bytes, Duration::ZERO).await
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, ttl: Duration) -> Result<(), OverlayError> {
        self.publish_addressable(key, &bytes, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, OverlayError> {
        let filter = Filter::new()
            .kind(COORDINATION_KIND)
            .custom_tag(SingleLetterTag::lowercase(Alphabet::D), key)
            .limit(1);
        let events = self
            .client
            .fetch_events(filter, Duration::from_secs(10))
            .await
            .map_err(|e| OverlayError::DhtFailed(format!("fetch_events failed: {e}")))?;
        match events.iter().max_by_key(|event| event.created_at) {
            Some(event) => {
                let bytes = hex::decode(&event.content)
                    .map_err(|e| OverlayError::DhtFailed(format!("malformed record content: {e}")))?;
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }
}

/// Maps a MuSig2 signer public key to the Nostr peer id used to reach it —
/// identity and transport share the same secp256k1 key in this adapter.
pub fn peer_id_for_signer(pubkey: &Secp256k1PublicKey) -> PeerId {
    hex::encode(pubkey.serialize())
}
