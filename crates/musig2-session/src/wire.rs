//! The wire envelope and the eight message payloads that travel over the
//! overlay's direct-send and pub/sub channels.
//!
//! Generalizes `nostring-ccd`'s `CcdMessage` envelope
//! (`#[serde(tag = "ccd_type")]`) from its six transport-specific variants
//! to the eight coordination messages this protocol needs, encoded the
//! same way: canonical JSON via `serde_json` with an internally tagged
//! enum.

use musig2::secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::p2p::{PeerId, SignerAdvertisement, SigningRequest};

/// Fields common to every wire message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub session_id: Option<String>,
    pub from: PeerId,
    pub timestamp: u64,
    pub message_id: Uuid,
}

impl Envelope {
    pub fn new(session_id: Option<String>, from: PeerId, timestamp: u64) -> Self {
        Envelope {
            session_id,
            from,
            timestamp,
            message_id: Uuid::new_v4(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantJoinedPayload {
    pub request_id: String,
    pub participant_index: usize,
    pub participant_peer_id: PeerId,
    pub participant_public_key: PublicKey,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReadyPayload {
    pub request_id: String,
    pub participant_index: usize,
}

// `session_id` for the four payloads below is carried once, on `Envelope`,
// rather than repeated per-payload — the common envelope already commits
// to `Option<String>` with `#[serde(flatten)]`, and a second `session_id`
// field here would collide with it on the wire.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceCommitmentPayload {
    pub signer_index: usize,
    pub sequence_number: u64,
    pub commitment: [u8; 32],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceSharePayload {
    pub signer_index: usize,
    pub sequence_number: u64,
    pub public_nonce: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialSigSharePayload {
    pub signer_index: usize,
    pub sequence_number: u64,
    pub partial_sig: [u8; 32],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionAbortPayload {
    pub reason: String,
}

/// Every message this protocol exchanges, internally tagged by `type` so a
/// single `serde_json::from_slice::<WireMessage>` dispatches on the wire
/// name directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    #[serde(rename = "SIGNER_ADVERTISEMENT")]
    SignerAdvertisement {
        #[serde(flatten)]
        envelope: Envelope,
        #[serde(flatten)]
        payload: SignerAdvertisement,
    },
    #[serde(rename = "SIGNING_REQUEST")]
    SigningRequest {
        #[serde(flatten)]
        envelope: Envelope,
        #[serde(flatten)]
        payload: SigningRequest,
    },
    #[serde(rename = "PARTICIPANT_JOINED")]
    ParticipantJoined {
        #[serde(flatten)]
        envelope: Envelope,
        #[serde(flatten)]
        payload: ParticipantJoinedPayload,
    },
    #[serde(rename = "SESSION_READY")]
    SessionReady {
        #[serde(flatten)]
        envelope: Envelope,
        #[serde(flatten)]
        payload: SessionReadyPayload,
    },
    #[serde(rename = "NONCE_COMMITMENT")]
    NonceCommitment {
        #[serde(flatten)]
        envelope: Envelope,
        #[serde(flatten)]
        payload: NonceCommitmentPayload,
    },
    #[serde(rename = "NONCE_SHARE")]
    NonceShare {
        #[serde(flatten)]
        envelope: Envelope,
        #[serde(flatten)]
        payload: NonceSharePayload,
    },
    #[serde(rename = "PARTIAL_SIG_SHARE")]
    PartialSigShare {
        #[serde(flatten)]
        envelope: Envelope,
        #[serde(flatten)]
        payload: PartialSigSharePayload,
    },
    #[serde(rename = "SESSION_ABORT")]
    SessionAbort {
        #[serde(flatten)]
        envelope: Envelope,
        #[serde(flatten)]
        payload: SessionAbortPayload,
    },
}

impl WireMessage {
    pub fn envelope(&self) -> &Envelope {
        match self {
            WireMessage::SignerAdvertisement { envelope, .. }
            | WireMessage::SigningRequest { envelope, .. }
            | WireMessage::ParticipantJoined { envelope, .. }
            | WireMessage::SessionReady { envelope, .. }
            | WireMessage::NonceCommitment { envelope, .. }
            | WireMessage::NonceShare { envelope, .. }
            | WireMessage::PartialSigShare { envelope, .. }
            | WireMessage::SessionAbort { envelope, .. } => envelope,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, crate::error::Musig2Error> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, crate::error::Musig2Error> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let envelope = Envelope::new(Some("session-1".into()), "peer-a".into(), 1234);
        let msg = WireMessage::NonceCommitment {
            envelope,
            payload: NonceCommitmentPayload {
                signer_index: 0,
                sequence_number: 1,
                commitment: [0x42u8; 32],
            },
        };
        let bytes = msg.to_bytes().unwrap();
        let decoded = WireMessage::from_bytes(&bytes).unwrap();
        match decoded {
            WireMessage::NonceCommitment { payload, .. } => {
                assert_eq!(payload.commitment, [0x42u8; 32]);
                assert_eq!(payload.signer_index, 0);
            }
            _ => panic!("wrong variant decoded"),
        }
    }

    #[test]
    fn tag_selects_the_right_variant() {
        let json = serde_json::json!({
            "type": "SESSION_ABORT",
            "session_id": "session-1",
            "from": "peer-a",
            "timestamp": 1,
            "message_id": Uuid::new_v4(),
            "reason": "Timeout"
        });
        let decoded: WireMessage = serde_json::from_value(json).unwrap();
        assert!(matches!(decoded, WireMessage::SessionAbort { .. }));
    }
}
