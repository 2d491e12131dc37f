//! The closed set of lifecycle events a [`crate::coordinator::SessionCoordinator`]
//! emits. Replaces the untyped string-keyed emitter pattern with a tagged
//! enum subscribers match on exhaustively.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum CoordinatorEvent {
    SignerAdvertised { public_key_hex: String },
    SignerDiscovered { public_key_hex: String, peer_id: String },
    SigningRequestReceived { session_id: Option<String>, request_id: String },
    ParticipantJoined { session_id: Option<String>, request_id: String, participant_index: usize },
    SessionReady { session_id: String },
    SessionNoncesComplete { session_id: String },
    SessionComplete { session_id: String, signature: Vec<u8> },
    SessionAborted { session_id: String, reason: String },
    ShouldBroadcast { session_id: String, coordinator_index: usize },
    FailoverExhausted { session_id: String },
    SessionError { session_id: Option<String>, message: String },
}

impl CoordinatorEvent {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            CoordinatorEvent::SignerAdvertised { .. } | CoordinatorEvent::SignerDiscovered { .. } => None,
            CoordinatorEvent::SigningRequestReceived { session_id, .. } => session_id.as_deref(),
            CoordinatorEvent::ParticipantJoined { session_id, .. } => session_id.as_deref(),
            CoordinatorEvent::SessionReady { session_id }
            | CoordinatorEvent::SessionNoncesComplete { session_id }
            | CoordinatorEvent::SessionComplete { session_id, .. }
            | CoordinatorEvent::SessionAborted { session_id, .. }
            | CoordinatorEvent::ShouldBroadcast { session_id, .. }
            | CoordinatorEvent::FailoverExhausted { session_id } => Some(session_id),
            CoordinatorEvent::SessionError { session_id, .. } => session_id.as_deref(),
        }
    }

    /// Stable discriminant used for the per-session emitted-once dedup set.
    /// Does not vary with payload, only with variant.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            CoordinatorEvent::SignerAdvertised { .. } => "SIGNER_ADVERTISED",
            CoordinatorEvent::SignerDiscovered { .. } => "SIGNER_DISCOVERED",
            CoordinatorEvent::SigningRequestReceived { .. } => "SIGNING_REQUEST_RECEIVED",
            CoordinatorEvent::ParticipantJoined { .. } => "PARTICIPANT_JOINED",
            CoordinatorEvent::SessionReady { .. } => "SESSION_READY",
            CoordinatorEvent::SessionNoncesComplete { .. } => "SESSION_NONCES_COMPLETE",
            CoordinatorEvent::SessionComplete { .. } => "SESSION_COMPLETE",
            CoordinatorEvent::SessionAborted { .. } => "SESSION_ABORTED",
            CoordinatorEvent::ShouldBroadcast { .. } => "SHOULD_BROADCAST",
            CoordinatorEvent::FailoverExhausted { .. } => "FAILOVER_EXHAUSTED",
            CoordinatorEvent::SessionError { .. } => "SESSION_ERROR",
        }
    }
}

/// Distributes events to subscribers and enforces event-uniqueness: at
/// most one emission per (sessionId, event kind).
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoordinatorEvent>,
    emitted: Arc<Mutex<HashSet<(String, &'static str)>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBus {
            sender,
            emitted: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.sender.subscribe()
    }

    /// Emits `event` unless this (session, kind) pair was already emitted.
    /// Events with no session scope (advertisement/discovery events) are
    /// never deduplicated. Returns whether the event was actually sent.
    pub async fn emit(&self, event: CoordinatorEvent) -> bool {
        if let Some(session_id) = event.session_id() {
            let key = (session_id.to_string(), event.kind_tag());
            let mut emitted = self.emitted.lock().await;
            if !emitted.insert(key) {
                return false;
            }
        }
        let _ = self.sender.send(event);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_event_kind_for_the_same_session_is_suppressed() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let sent1 = bus
            .emit(CoordinatorEvent::SessionReady { session_id: "s1".into() })
            .await;
        let sent2 = bus
            .emit(CoordinatorEvent::SessionReady { session_id: "s1".into() })
            .await;

        assert!(sent1);
        assert!(!sent2);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn same_event_kind_in_different_sessions_both_emit() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.emit(CoordinatorEvent::SessionReady { session_id: "s1".into() }).await;
        bus.emit(CoordinatorEvent::SessionReady { session_id: "s2".into() }).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }
}
