//! Coordination-layer state: everything about a session that is about
//! routing and liveness rather than MuSig2 math. Kept as its own struct so
//! [`crate::session::Session`] stays pure cryptographic state — see the
//! split called for in the design notes this crate follows.

use std::collections::HashMap;

use musig2::secp256k1::{schnorr, Keypair, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::election::ElectionMethod;
use crate::error::Musig2Error;
use crate::failover::FailoverState;
use crate::security::validate_signature_bytes;

/// Opaque overlay-level peer identifier (a relay pubkey, a libp2p PeerId
/// string, whatever the concrete [`crate::overlay::Overlay`] implementation
/// uses). The core never parses it.
pub type PeerId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionRecord {
    pub coordinator_index: usize,
    pub election_proof: Vec<u8>,
    pub method: ElectionMethod,
}

/// The pre-session announcement that invites a fixed set of public keys to
/// a signing session. Doubles as the `musig2:request:*` DHT record and the
/// `SIGNING_REQUEST` wire payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningRequest {
    pub request_id: String,
    pub required_public_keys: Vec<PublicKey>,
    pub message: [u8; 32],
    pub creator_peer_id: PeerId,
    pub creator_public_key: PublicKey,
    pub created_at: u64,
    pub expires_at: u64,
    pub metadata: HashMap<String, String>,
    pub creator_signature: Vec<u8>,
}

fn signing_request_digest(
    request_id: &str,
    message: &[u8; 32],
    required_public_keys: &[PublicKey],
) -> [u8; 32] {
    let mut engine = Sha256::new();
    engine.update(request_id.as_bytes());
    engine.update(message);
    for pk in required_public_keys {
        engine.update(pk.serialize());
    }
    engine.update((required_public_keys.len() as u32).to_be_bytes());
    engine.finalize().into()
}

pub fn sign_signing_request(
    creator_secret_key: &SecretKey,
    request_id: &str,
    message: &[u8; 32],
    required_public_keys: &[PublicKey],
) -> Vec<u8> {
    let secp = Secp256k1::signing_only();
    let digest = signing_request_digest(request_id, message, required_public_keys);
    let keypair = Keypair::from_secret_key(&secp, creator_secret_key);
    let sig = secp.sign_schnorr(&Message::from_digest(digest), &keypair);
    sig.as_ref().to_vec()
}

pub fn verify_signing_request(request: &SigningRequest) -> Result<(), Musig2Error> {
    if !validate_signature_bytes(&request.creator_signature) {
        return Err(Musig2Error::ValidationError("malformed signing-request signature".into()));
    }
    let digest = signing_request_digest(
        &request.request_id,
        &request.message,
        &request.required_public_keys,
    );
    let sig = schnorr::Signature::from_slice(&request.creator_signature)
        .map_err(|e| Musig2Error::ValidationError(format!("bad signing-request signature: {e}")))?;
    let secp = Secp256k1::verification_only();
    let (xonly, _) = request.creator_public_key.x_only_public_key();
    secp.verify_schnorr(&sig, &Message::from_digest(digest), &xonly)
        .map_err(|_| Musig2Error::ValidationError("signing-request signature invalid".into()))
}

/// Discoverability record: "I am public key X, reachable at these
/// addresses, available for criteria C until expiresAt". Doubles as the
/// `musig2:ad:*` DHT record and the `SIGNER_ADVERTISEMENT` wire payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerAdvertisement {
    pub peer_id: PeerId,
    pub addrs: Vec<String>,
    pub public_key: PublicKey,
    pub criteria: Vec<String>,
    pub created_at: u64,
    pub expires_at: u64,
    pub signature: Vec<u8>,
}

fn advertisement_digest(
    peer_id: &str,
    addrs: &[String],
    public_key: &PublicKey,
    criteria: &[String],
    created_at: u64,
    expires_at: u64,
) -> [u8; 32] {
    let mut engine = Sha256::new();
    engine.update(peer_id.as_bytes());
    for addr in addrs {
        engine.update(addr.as_bytes());
    }
    engine.update(public_key.serialize());
    for c in criteria {
        engine.update(c.as_bytes());
    }
    engine.update(created_at.to_be_bytes());
    engine.update(expires_at.to_be_bytes());
    engine.finalize().into()
}

pub fn sign_advertisement(
    secret_key: &SecretKey,
    peer_id: &str,
    addrs: &[String],
    public_key: &PublicKey,
    criteria: &[String],
    created_at: u64,
    expires_at: u64,
) -> Vec<u8> {
    let secp = Secp256k1::signing_only();
    let digest = advertisement_digest(peer_id, addrs, public_key, criteria, created_at, expires_at);
    let keypair = Keypair::from_secret_key(&secp, secret_key);
    let sig = secp.sign_schnorr(&Message::from_digest(digest), &keypair);
    sig.as_ref().to_vec()
}

pub fn verify_advertisement(ad: &SignerAdvertisement) -> Result<(), Musig2Error> {
    if !validate_signature_bytes(&ad.signature) {
        return Err(Musig2Error::ValidationError("malformed advertisement signature".into()));
    }
    let digest = advertisement_digest(
        &ad.peer_id,
        &ad.addrs,
        &ad.public_key,
        &ad.criteria,
        ad.created_at,
        ad.expires_at,
    );
    let sig = schnorr::Signature::from_slice(&ad.signature)
        .map_err(|e| Musig2Error::ValidationError(format!("bad advertisement signature: {e}")))?;
    let secp = Secp256k1::verification_only();
    let (xonly, _) = ad.public_key.x_only_public_key();
    secp.verify_schnorr(&sig, &Message::from_digest(digest), &xonly)
        .map_err(|_| Musig2Error::ValidationError("advertisement signature invalid".into()))
}

/// One entry in a criterion's append-only directory index: "this public
/// key, at this peer, has been advertising since this time" — signed by
/// that public key so the index can be merged from multiple untrusted
/// sources without forging entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryIndexEntry {
    pub public_key: PublicKey,
    pub peer_id: PeerId,
    pub created_at: u64,
    pub signature: Vec<u8>,
}

fn directory_entry_digest(public_key: &PublicKey, peer_id: &str, created_at: u64) -> [u8; 32] {
    let mut engine = Sha256::new();
    engine.update(public_key.serialize());
    engine.update(peer_id.as_bytes());
    engine.update(created_at.to_be_bytes());
    engine.finalize().into()
}

pub fn sign_directory_entry(secret_key: &SecretKey, public_key: &PublicKey, peer_id: &str, created_at: u64) -> Vec<u8> {
    let secp = Secp256k1::signing_only();
    let digest = directory_entry_digest(public_key, peer_id, created_at);
    let keypair = Keypair::from_secret_key(&secp, secret_key);
    secp.sign_schnorr(&Message::from_digest(digest), &keypair).as_ref().to_vec()
}

pub fn verify_directory_entry(entry: &DirectoryIndexEntry) -> Result<(), Musig2Error> {
    if !validate_signature_bytes(&entry.signature) {
        return Err(Musig2Error::ValidationError("malformed directory-index entry signature".into()));
    }
    let digest = directory_entry_digest(&entry.public_key, &entry.peer_id, entry.created_at);
    let sig = schnorr::Signature::from_slice(&entry.signature)
        .map_err(|e| Musig2Error::ValidationError(format!("bad directory-index signature: {e}")))?;
    let secp = Secp256k1::verification_only();
    let (xonly, _) = entry.public_key.x_only_public_key();
    secp.verify_schnorr(&sig, &Message::from_digest(digest), &xonly)
        .map_err(|_| Musig2Error::ValidationError("directory-index entry signature invalid".into()))
}

/// The versioned, append-only list stored at `musig2:directory-index:<criterion>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryIndex {
    pub version: u64,
    pub entries: Vec<DirectoryIndexEntry>,
}

/// Coordination-layer state for one session: who's reachable, what sequence
/// numbers we've admitted, who's the elected coordinator, and the failover
/// trail if the original coordinator goes dark.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct P2PMetadata {
    pub participants: HashMap<usize, PeerId>,
    pub last_sequence_numbers: HashMap<usize, u64>,
    pub election: Option<ElectionRecord>,
    pub failover: Option<FailoverState>,
    pub request: Option<SigningRequest>,
}

impl P2PMetadata {
    pub fn new(request: SigningRequest) -> Self {
        P2PMetadata {
            participants: HashMap::new(),
            last_sequence_numbers: HashMap::new(),
            election: None,
            failover: None,
            request: Some(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use musig2::secp256k1::Secp256k1 as Secp;

    fn test_keypair(seed: u8) -> (SecretKey, PublicKey) {
        let secp = Secp::new();
        let mut bytes = [0u8; 32];
        bytes[0] = 0x01;
        bytes[31] = seed;
        let sk = SecretKey::from_slice(&bytes).unwrap();
        let pk = PublicKey::from_secret_key(&secp, &sk);
        (sk, pk)
    }

    #[test]
    fn signing_request_signature_roundtrips() {
        let (sk, pk) = test_keypair(1);
        let (_other_sk, other_pk) = test_keypair(2);
        let keys = vec![pk, other_pk];
        let sig = sign_signing_request(&sk, "req-1", &[0x01u8; 32], &keys);
        let request = SigningRequest {
            request_id: "req-1".into(),
            required_public_keys: keys,
            message: [0x01u8; 32],
            creator_peer_id: "peer-a".into(),
            creator_public_key: pk,
            created_at: 0,
            expires_at: 1,
            metadata: HashMap::new(),
            creator_signature: sig,
        };
        assert!(verify_signing_request(&request).is_ok());
    }

    #[test]
    fn tampered_signing_request_fails_verification() {
        let (sk, pk) = test_keypair(1);
        let (_o_sk, other_pk) = test_keypair(2);
        let keys = vec![pk, other_pk];
        let sig = sign_signing_request(&sk, "req-1", &[0x01u8; 32], &keys);
        let mut request = SigningRequest {
            request_id: "req-1".into(),
            required_public_keys: keys,
            message: [0x01u8; 32],
            creator_peer_id: "peer-a".into(),
            creator_public_key: pk,
            created_at: 0,
            expires_at: 1,
            metadata: HashMap::new(),
            creator_signature: sig,
        };
        request.message = [0x02u8; 32];
        assert!(verify_signing_request(&request).is_err());
    }

    #[test]
    fn advertisement_signature_roundtrips() {
        let (sk, pk) = test_keypair(7);
        let sig = sign_advertisement(&sk, "peer-x", &["addr1".into()], &pk, &["fast".into()], 0, 100);
        let ad = SignerAdvertisement {
            peer_id: "peer-x".into(),
            addrs: vec!["addr1".into()],
            public_key: pk,
            criteria: vec!["fast".into()],
            created_at: 0,
            expires_at: 100,
            signature: sig,
        };
        assert!(verify_advertisement(&ad).is_ok());
    }
}
