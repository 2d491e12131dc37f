//! [`SessionCoordinator`] — the outward-facing façade and the only component
//! that talks to the overlay. It owns the session table, drives both
//! signing rounds, dispatches inbound wire messages through the sequence
//! guard and the state machine, and runs the periodic stale-session sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use musig2::secp256k1::{PublicKey, SecretKey};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::CoordinatorConfig;
use crate::crypto::canonical_sort;
use crate::election::elect_coordinator;
use crate::error::Musig2Error;
use crate::events::{CoordinatorEvent, EventBus};
use crate::failover::trigger_failover;
use crate::musig::{pubnonce_from_bytes, pubnonce_to_bytes};
use crate::overlay::{IdentityRegistry, Overlay};
use crate::p2p::{
    sign_advertisement, sign_signing_request, verify_advertisement, verify_signing_request,
    ElectionRecord, P2PMetadata, PeerId, SignerAdvertisement, SigningRequest,
};
use crate::security::{validate_commitment_bytes, validate_pubkey_bytes, ReputationTable};
use crate::sequence;
use crate::session::{Session, SessionPhase};
use crate::state_machine::transition;
use crate::wire::{
    Envelope, NonceCommitmentPayload, NonceSharePayload, ParticipantJoinedPayload,
    PartialSigSharePayload, SessionAbortPayload, SessionReadyPayload, WireMessage,
};

fn advertisement_dht_key(criterion: &str, pubkey: &PublicKey) -> String {
    format!("musig2:directory:{criterion}:{}", hex::encode(pubkey.serialize()))
}

fn own_advertisement_dht_key(pubkey: &PublicKey) -> String {
    format!("musig2:ad:{}", hex::encode(pubkey.serialize()))
}

fn request_dht_key(request_id: &str, pubkey: &PublicKey) -> String {
    format!("musig2:request:{request_id}:{}", hex::encode(pubkey.serialize()))
}

fn session_dht_key(session_id: &str) -> String {
    format!("musig2:session:{session_id}")
}

struct PendingRequest {
    request: SigningRequest,
    participants: HashMap<usize, (PeerId, PublicKey)>,
}

/// One session's MuSig2 state plus its coordination metadata, held behind a
/// single per-session lock so state mutation is serialized within a
/// session while different sessions proceed independently.
struct SessionHandle {
    session: Session,
    p2p: P2PMetadata,
}

/// Advertises and discovers signers, announces and joins signing requests,
/// and drives sessions through both MuSig2 rounds over an [`Overlay`].
pub struct SessionCoordinator {
    identity_secret_key: SecretKey,
    identity_public_key: PublicKey,
    identity_peer_id: PeerId,
    overlay: Arc<dyn Overlay>,
    identity_registry: Option<Arc<dyn IdentityRegistry>>,
    config: CoordinatorConfig,
    sessions: Arc<RwLock<HashMap<String, Arc<Mutex<SessionHandle>>>>>,
    requests: Arc<RwLock<HashMap<String, PendingRequest>>>,
    reputation: ReputationTable,
    events: EventBus,
}

impl SessionCoordinator {
    pub fn new(
        identity_secret_key: SecretKey,
        identity_public_key: PublicKey,
        identity_peer_id: PeerId,
        overlay: Arc<dyn Overlay>,
        identity_registry: Option<Arc<dyn IdentityRegistry>>,
        config: CoordinatorConfig,
    ) -> Self {
        SessionCoordinator {
            identity_secret_key,
            identity_public_key,
            identity_peer_id,
            overlay,
            identity_registry,
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            requests: Arc::new(RwLock::new(HashMap::new())),
            reputation: ReputationTable::new(),
            events: EventBus::new(256),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn identity_public_key(&self) -> PublicKey {
        self.identity_public_key
    }

    fn is_allowed(&self, pubkey: &PublicKey) -> bool {
        match &self.identity_registry {
            Some(registry) => registry.is_allowed(pubkey),
            None => true,
        }
    }

    /// Signs and publishes a `SignerAdvertisement` on `signers:<criteria>`
    /// and stores it under the per-criterion directory DHT key.
    pub async fn advertise_signer(
        &self,
        criteria: Vec<String>,
        addrs: Vec<String>,
        now_ms: u64,
        ttl: Duration,
    ) -> Result<(), Musig2Error> {
        let expires_at = now_ms + ttl.as_millis() as u64;
        let signature = sign_advertisement(
            &self.identity_secret_key,
            &self.identity_peer_id,
            &addrs,
            &self.identity_public_key,
            &criteria,
            now_ms,
            expires_at,
        );
        let ad = SignerAdvertisement {
            peer_id: self.identity_peer_id.clone(),
            addrs,
            public_key: self.identity_public_key,
            criteria: criteria.clone(),
            created_at: now_ms,
            expires_at,
            signature,
        };
        let bytes = serde_json::to_vec(&ad)?;

        self.overlay
            .put(&own_advertisement_dht_key(&self.identity_public_key), bytes.clone(), ttl)
            .await
            .map_err(|e| Musig2Error::Internal(format!("dht put failed: {e}")))?;

        for criterion in &criteria {
            self.overlay
                .publish(&format!("signers:{criterion}"), bytes.clone())
                .await
                .map_err(|e| Musig2Error::Internal(format!("publish failed: {e}")))?;
            self.overlay
                .put(&advertisement_dht_key(criterion, &self.identity_public_key), bytes.clone(), ttl)
                .await
                .map_err(|e| Musig2Error::Internal(format!("dht put failed: {e}")))?;
        }

        self.events
            .emit(CoordinatorEvent::SignerAdvertised {
                public_key_hex: hex::encode(self.identity_public_key.serialize()),
            })
            .await;
        Ok(())
    }

    /// Removes this key's own advertisement record. The criterion-indexed
    /// directory-index entries expire on their own TTL; a clean withdrawal
    /// only retracts the primary `musig2:ad:*` record and announces it.
    pub async fn withdraw_advertisement(&self) -> Result<(), Musig2Error> {
        self.overlay
            .put(&own_advertisement_dht_key(&self.identity_public_key), Vec::new(), Duration::ZERO)
            .await
            .map_err(|e| Musig2Error::Internal(format!("dht put failed: {e}")))
    }

    /// Looks up advertisements for `criterion`, verifying every signature
    /// freshly and dropping expired entries, up to `max_results`.
    pub async fn find_available_signers(
        &self,
        criterion: &str,
        now_ms: u64,
        max_results: usize,
    ) -> Result<Vec<SignerAdvertisement>, Musig2Error> {
        let mut found = Vec::new();
        if let Some(bytes) = self
            .overlay
            .get(&format!("musig2:directory-index:{criterion}"))
            .await
            .map_err(|e| Musig2Error::Internal(format!("dht get failed: {e}")))?
        {
            let index: crate::p2p::DirectoryIndex = serde_json::from_slice(&bytes)?;
            for entry in index.entries {
                if crate::p2p::verify_directory_entry(&entry).is_err() {
                    continue;
                }
                let key = advertisement_dht_key(criterion, &entry.public_key);
                if let Some(ad_bytes) = self
                    .overlay
                    .get(&key)
                    .await
                    .map_err(|e| Musig2Error::Internal(format!("dht get failed: {e}")))?
                {
                    if ad_bytes.is_empty() {
                        continue;
                    }
                    let ad: SignerAdvertisement = serde_json::from_slice(&ad_bytes)?;
                    if verify_advertisement(&ad).is_ok() && ad.expires_at > now_ms {
                        found.push(ad);
                        self.events
                            .emit(CoordinatorEvent::SignerDiscovered {
                                public_key_hex: hex::encode(entry.public_key.serialize()),
                                peer_id: entry.peer_id.clone(),
                            })
                            .await;
                    }
                }
                if found.len() >= max_results {
                    break;
                }
            }
        }
        Ok(found)
    }

    /// Creates and publishes a `SigningRequest` for `required_public_keys`,
    /// storing it in the DHT under each required key. Returns the request id.
    pub async fn announce_signing_request(
        &self,
        required_public_keys: Vec<PublicKey>,
        message: [u8; 32],
        metadata: HashMap<String, String>,
        now_ms: u64,
        ttl: Duration,
    ) -> Result<String, Musig2Error> {
        if required_public_keys.len() < self.config.min_signers
            || required_public_keys.len() > self.config.max_signers
        {
            return Err(Musig2Error::ValidationError(format!(
                "signer count {} outside [{}, {}]",
                required_public_keys.len(),
                self.config.min_signers,
                self.config.max_signers
            )));
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let expires_at = now_ms + ttl.as_millis() as u64;
        let creator_signature = sign_signing_request(
            &self.identity_secret_key,
            &request_id,
            &message,
            &required_public_keys,
        );
        let request = SigningRequest {
            request_id: request_id.clone(),
            required_public_keys: required_public_keys.clone(),
            message,
            creator_peer_id: self.identity_peer_id.clone(),
            creator_public_key: self.identity_public_key,
            created_at: now_ms,
            expires_at,
            metadata,
            creator_signature,
        };
        let bytes = serde_json::to_vec(&request)?;

        for pk in &required_public_keys {
            self.overlay
                .put(&request_dht_key(&request_id, pk), bytes.clone(), ttl)
                .await
                .map_err(|e| Musig2Error::Internal(format!("dht put failed: {e}")))?;
        }
        self.overlay
            .publish("requests", bytes)
            .await
            .map_err(|e| Musig2Error::Internal(format!("publish failed: {e}")))?;

        self.requests.write().await.insert(
            request_id.clone(),
            PendingRequest { request, participants: HashMap::new() },
        );

        self.events
            .emit(CoordinatorEvent::SigningRequestReceived { session_id: None, request_id: request_id.clone() })
            .await;
        Ok(request_id)
    }

    /// Verifies and joins an announced signing request, broadcasting a
    /// signed `PARTICIPANT_JOINED`. When the n-th participant joins, creates
    /// the session locally and broadcasts `SESSION_READY`.
    pub async fn join_signing_request(&self, request: SigningRequest, now_ms: u64) -> Result<(), Musig2Error> {
        verify_signing_request(&request)?;
        if !self.is_allowed(&request.creator_public_key) {
            return Err(Musig2Error::PeerBlocked { peer_id: request.creator_peer_id.clone() });
        }
        if !request.required_public_keys.contains(&self.identity_public_key) {
            return Err(Musig2Error::ValidationError("own key not among required signers".into()));
        }

        let sorted = canonical_sort(request.required_public_keys.clone())
            .map_err(Musig2Error::ValidationError)?;
        let my_index = sorted
            .iter()
            .position(|pk| pk == &self.identity_public_key)
            .expect("checked above");

        let signature = crate::p2p::sign_directory_entry(
            &self.identity_secret_key,
            &self.identity_public_key,
            &self.identity_peer_id,
            now_ms,
        );
        let envelope = Envelope::new(None, self.identity_peer_id.clone(), now_ms);
        let msg = WireMessage::ParticipantJoined {
            envelope,
            payload: ParticipantJoinedPayload {
                request_id: request.request_id.clone(),
                participant_index: my_index,
                participant_peer_id: self.identity_peer_id.clone(),
                participant_public_key: self.identity_public_key,
                signature,
            },
        };
        self.overlay
            .publish(&format!("request:{}", request.request_id), msg.to_bytes()?)
            .await
            .map_err(|e| Musig2Error::Internal(format!("publish failed: {e}")))?;

        let mut requests = self.requests.write().await;
        let pending = requests
            .entry(request.request_id.clone())
            .or_insert_with(|| PendingRequest { request: request.clone(), participants: HashMap::new() });
        pending
            .participants
            .insert(my_index, (self.identity_peer_id.clone(), self.identity_public_key));
        let n = pending.request.required_public_keys.len();
        let complete = pending.participants.len() == n;
        let participants = pending.participants.clone();
        drop(requests);

        if complete {
            self.create_session_from_request(&request, &participants, now_ms).await?;
        }
        Ok(())
    }

    /// Records an incoming `PARTICIPANT_JOINED`; first-write-wins per index.
    /// When completeness is reached, creates the session and broadcasts
    /// `SESSION_READY`.
    pub async fn handle_participant_joined(
        &self,
        payload: ParticipantJoinedPayload,
        now_ms: u64,
    ) -> Result<(), Musig2Error> {
        let mut requests = self.requests.write().await;
        let pending = requests
            .get_mut(&payload.request_id)
            .ok_or_else(|| Musig2Error::UnknownSession(payload.request_id.clone()))?;

        if pending.participants.contains_key(&payload.participant_index) {
            return Ok(());
        }
        pending
            .participants
            .insert(payload.participant_index, (payload.participant_peer_id.clone(), payload.participant_public_key));
        let request = pending.request.clone();
        let complete = pending.participants.len() == request.required_public_keys.len();
        let participants = pending.participants.clone();
        drop(requests);

        self.events
            .emit(CoordinatorEvent::ParticipantJoined {
                session_id: None,
                request_id: payload.request_id.clone(),
                participant_index: payload.participant_index,
            })
            .await;

        if complete && request.required_public_keys.contains(&self.identity_public_key) {
            self.create_session_from_request(&request, &participants, now_ms).await?;
        }
        Ok(())
    }

    async fn create_session_from_request(
        &self,
        request: &SigningRequest,
        participants: &HashMap<usize, (PeerId, PublicKey)>,
        now_ms: u64,
    ) -> Result<(), Musig2Error> {
        let mut session = Session::create(
            request.required_public_keys.clone(),
            &self.identity_public_key,
            request.message,
            request.request_id.as_bytes(),
            now_ms,
        )?;
        transition(&mut session, SessionPhase::NonceCommit, "participants joined", now_ms)?;

        let session_id = session.session_id.clone();
        let my_index = session.my_index;
        let election_method = self.config.election_method;
        let coordinator_index = elect_coordinator(&session.signers, &session_id, election_method, &[])
            .ok_or_else(|| Musig2Error::Internal("election produced no coordinator".into()))?;

        let mut p2p = P2PMetadata::new(request.clone());
        p2p.election = Some(ElectionRecord { coordinator_index, election_proof: Vec::new(), method: election_method });
        for (index, (peer_id, _pubkey)) in participants {
            p2p.participants.insert(*index, peer_id.clone());
        }

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), Arc::new(Mutex::new(SessionHandle { session, p2p })));

        let envelope = Envelope::new(Some(session_id.clone()), self.identity_peer_id.clone(), now_ms);
        let msg = WireMessage::SessionReady {
            envelope,
            payload: SessionReadyPayload { request_id: request.request_id.clone(), participant_index: my_index },
        };
        self.overlay
            .publish(&format!("request:{}", request.request_id), msg.to_bytes()?)
            .await
            .map_err(|e| Musig2Error::Internal(format!("publish failed: {e}")))?;
        self.overlay
            .put(&session_dht_key(&session_id), msg.to_bytes()?, Duration::from_millis(self.config.session_timeout_ms))
            .await
            .map_err(|e| Musig2Error::Internal(format!("dht put failed: {e}")))?;

        self.events.emit(CoordinatorEvent::SessionReady { session_id }).await;
        Ok(())
    }

    async fn session_handle(&self, session_id: &str) -> Result<Arc<Mutex<SessionHandle>>, Musig2Error> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| Musig2Error::UnknownSession(session_id.to_string()))
    }

    /// Generates this participant's nonce pair and broadcasts its commitment.
    pub async fn start_round1(&self, session_id: &str, now_ms: u64) -> Result<(), Musig2Error> {
        let handle = self.session_handle(session_id).await?;
        let mut guard = handle.lock().await;

        guard.session.generate_nonces(&self.identity_secret_key)?;
        let my_index = guard.session.my_index;
        let commitment = guard.session.nonce_commitments[&my_index];
        let sequence_number = guard.p2p.last_sequence_numbers.get(&my_index).copied().unwrap_or(0) + 1;
        guard.p2p.last_sequence_numbers.insert(my_index, sequence_number);

        let envelope = Envelope::new(Some(session_id.to_string()), self.identity_peer_id.clone(), now_ms);
        let msg = WireMessage::NonceCommitment {
            envelope,
            payload: NonceCommitmentPayload { signer_index: my_index, sequence_number, commitment },
        };
        self.broadcast(&guard.p2p, &msg).await?;

        if guard.session.all_commitments_collected() {
            self.reveal_nonce(&mut guard, session_id, now_ms).await?;
        }
        Ok(())
    }

    async fn reveal_nonce(&self, guard: &mut SessionHandle, session_id: &str, now_ms: u64) -> Result<(), Musig2Error> {
        transition(&mut guard.session, SessionPhase::NonceReveal, "commitments complete", now_ms)?;
        let my_index = guard.session.my_index;
        let pubnonce = guard.session.public_nonces[&my_index].clone();
        let sequence_number = guard.p2p.last_sequence_numbers.get(&my_index).copied().unwrap_or(0) + 1;
        guard.p2p.last_sequence_numbers.insert(my_index, sequence_number);

        let envelope = Envelope::new(Some(session_id.to_string()), self.identity_peer_id.clone(), now_ms);
        let msg = WireMessage::NonceShare {
            envelope,
            payload: NonceSharePayload { signer_index: my_index, sequence_number, public_nonce: pubnonce_to_bytes(&pubnonce) },
        };
        self.broadcast(&guard.p2p, &msg).await
    }

    /// Creates and broadcasts this participant's partial signature.
    pub async fn start_round2(&self, session_id: &str, now_ms: u64) -> Result<(), Musig2Error> {
        let handle = self.session_handle(session_id).await?;
        let mut guard = handle.lock().await;

        guard.session.aggregate_nonces()?;
        transition(&mut guard.session, SessionPhase::PartialSig, "nonces complete", now_ms)?;
        self.events
            .emit(CoordinatorEvent::SessionNoncesComplete { session_id: session_id.to_string() })
            .await;

        guard.session.create_partial_signature(&self.identity_secret_key)?;
        let my_index = guard.session.my_index;
        let sig = guard.session.partial_sigs[&my_index];
        let sequence_number = guard.p2p.last_sequence_numbers.get(&my_index).copied().unwrap_or(0) + 1;
        guard.p2p.last_sequence_numbers.insert(my_index, sequence_number);

        let envelope = Envelope::new(Some(session_id.to_string()), self.identity_peer_id.clone(), now_ms);
        let msg = WireMessage::PartialSigShare {
            envelope,
            payload: PartialSigSharePayload {
                signer_index: my_index,
                sequence_number,
                partial_sig: crate::musig::partial_sig_to_bytes(&sig),
            },
        };
        self.broadcast(&guard.p2p, &msg).await?;

        if guard.session.all_partials_collected() {
            self.finalize(&mut guard, session_id, now_ms).await?;
        }
        Ok(())
    }

    async fn finalize(&self, guard: &mut SessionHandle, session_id: &str, now_ms: u64) -> Result<(), Musig2Error> {
        let signature = guard.session.get_final_signature()?;
        transition(&mut guard.session, SessionPhase::Complete, "all partials collected", now_ms)?;
        crate::nonce_guard::NonceGuard::global().release_session(session_id);
        self.events
            .emit(CoordinatorEvent::SessionComplete {
                session_id: session_id.to_string(),
                signature: signature.to_vec(),
            })
            .await;

        if let Some(election) = &guard.p2p.election {
            if election.coordinator_index == guard.session.my_index {
                self.events
                    .emit(CoordinatorEvent::ShouldBroadcast {
                        session_id: session_id.to_string(),
                        coordinator_index: election.coordinator_index,
                    })
                    .await;
            }
        }
        Ok(())
    }

    pub async fn get_final_signature(&self, session_id: &str) -> Result<[u8; 64], Musig2Error> {
        let handle = self.session_handle(session_id).await?;
        let mut guard = handle.lock().await;
        guard.session.get_final_signature()
    }

    /// Manually advances failover by one step, per the application's own
    /// broadcast-confirmation timeout. Emits `SHOULD_BROADCAST` for the new
    /// coordinator, or `FAILOVER_EXHAUSTED` once the priority list is spent.
    pub async fn trigger_failover(&self, session_id: &str) -> Result<(), Musig2Error> {
        if !self.config.enable_failover {
            return Err(Musig2Error::ProtocolViolation("failover disabled by configuration".into()));
        }
        let handle = self.session_handle(session_id).await?;
        let mut guard = handle.lock().await;
        let signers = guard.session.signers.clone();
        let method = self.config.election_method;

        match trigger_failover(&mut guard.p2p, &signers, session_id, method) {
            Ok(next) => {
                self.events
                    .emit(CoordinatorEvent::ShouldBroadcast { session_id: session_id.to_string(), coordinator_index: next })
                    .await;
                Ok(())
            }
            Err(_) => {
                self.events
                    .emit(CoordinatorEvent::FailoverExhausted { session_id: session_id.to_string() })
                    .await;
                Ok(())
            }
        }
    }

    /// Broadcasts `SESSION_ABORT`, moves the session to `Aborted`, and
    /// drops it from the table. Idempotent: a second call on a session no
    /// longer present is a no-op.
    pub async fn close_session(&self, session_id: &str, reason: &str, now_ms: u64) -> Result<(), Musig2Error> {
        let handle = match self.sessions.write().await.remove(session_id) {
            Some(h) => h,
            None => return Ok(()),
        };
        let mut guard = handle.lock().await;
        let _ = transition(&mut guard.session, SessionPhase::Aborted, reason, now_ms);
        crate::nonce_guard::NonceGuard::global().release_session(session_id);

        let envelope = Envelope::new(Some(session_id.to_string()), self.identity_peer_id.clone(), now_ms);
        let msg = WireMessage::SessionAbort { envelope, payload: SessionAbortPayload { reason: reason.to_string() } };
        let _ = self.broadcast(&guard.p2p, &msg).await;

        self.events
            .emit(CoordinatorEvent::SessionAborted { session_id: session_id.to_string(), reason: reason.to_string() })
            .await;
        Ok(())
    }

    async fn broadcast(&self, p2p: &P2PMetadata, msg: &WireMessage) -> Result<(), Musig2Error> {
        let bytes = msg.to_bytes()?;
        for peer in p2p.participants.values() {
            if *peer == self.identity_peer_id {
                continue;
            }
            if let Err(e) = self.overlay.send_to_peer(peer, bytes.clone()).await {
                warn!(%peer, %e, "send_to_peer failed during broadcast");
            }
        }
        if p2p.participants.is_empty() {
            if let Some(session_id) = &msg.envelope().session_id {
                self.overlay
                    .publish(&format!("session:{session_id}"), bytes)
                    .await
                    .map_err(|e| Musig2Error::Internal(format!("publish failed: {e}")))?;
            }
        }
        Ok(())
    }

    /// Admits one inbound wire message: runs the sequence guard where the
    /// message carries a `(signerIndex, sequenceNumber)` pair, then the
    /// relevant phase/session handler. Recoverable errors dock reputation
    /// and drop the message without aborting the session.
    pub async fn handle_message(&self, from: PeerId, msg: WireMessage, now_ms: u64) -> Result<(), Musig2Error> {
        let result = self.dispatch(&from, msg, now_ms).await;
        if let Err(err) = &result {
            if err.is_recoverable() {
                let max = self.config.max_invalid_messages_per_peer;
                if self.reputation.record_invalid(&from, max).await {
                    warn!(peer = %from, "peer banned after exceeding invalid-message budget");
                }
                return Ok(());
            }
        }
        result
    }

    async fn dispatch(&self, from: &PeerId, msg: WireMessage, now_ms: u64) -> Result<(), Musig2Error> {
        if self.reputation.is_banned(from).await {
            return Err(Musig2Error::PeerBlocked { peer_id: from.clone() });
        }

        match msg {
            WireMessage::SigningRequest { payload, .. } => {
                self.events
                    .emit(CoordinatorEvent::SigningRequestReceived { session_id: None, request_id: payload.request_id.clone() })
                    .await;
                self.join_signing_request(payload, now_ms).await
            }
            WireMessage::ParticipantJoined { payload, .. } => {
                self.handle_participant_joined(payload, now_ms).await
            }
            WireMessage::NonceCommitment { envelope, payload } => {
                let session_id = envelope.session_id.ok_or_else(|| Musig2Error::ValidationError("missing sessionId".into()))?;
                if !validate_commitment_bytes(&payload.commitment) {
                    return Err(Musig2Error::ValidationError("malformed commitment".into()));
                }
                let handle = self.session_handle(&session_id).await?;
                let mut guard = handle.lock().await;
                sequence::admit(
                    &mut guard.p2p.last_sequence_numbers,
                    payload.signer_index,
                    payload.sequence_number,
                    envelope.timestamp,
                    now_ms,
                    self.config.max_sequence_gap,
                    self.config.max_timestamp_skew_ms,
                )?;
                guard.session.receive_commitment(payload.signer_index, payload.commitment)?;
                if guard.session.all_commitments_collected() {
                    self.reveal_nonce(&mut guard, &session_id, now_ms).await?;
                }
                Ok(())
            }
            WireMessage::NonceShare { envelope, payload } => {
                let session_id = envelope.session_id.ok_or_else(|| Musig2Error::ValidationError("missing sessionId".into()))?;
                let pubnonce = pubnonce_from_bytes(&payload.public_nonce)?;
                let handle = self.session_handle(&session_id).await?;
                let mut guard = handle.lock().await;
                sequence::admit(
                    &mut guard.p2p.last_sequence_numbers,
                    payload.signer_index,
                    payload.sequence_number,
                    envelope.timestamp,
                    now_ms,
                    self.config.max_sequence_gap,
                    self.config.max_timestamp_skew_ms,
                )?;
                if let Err(err) = guard.session.receive_nonce(payload.signer_index, pubnonce) {
                    if matches!(err, Musig2Error::CommitMismatch { .. }) {
                        let reason = err.code().to_string();
                        self.abort_locked(&mut guard, &session_id, &reason, now_ms).await?;
                    }
                    return Err(err);
                }
                if guard.session.all_nonces_collected() {
                    self.start_round2_locked(&mut guard, &session_id, now_ms).await?;
                }
                Ok(())
            }
            WireMessage::PartialSigShare { envelope, payload } => {
                let session_id = envelope.session_id.ok_or_else(|| Musig2Error::ValidationError("missing sessionId".into()))?;
                let sig = crate::musig::partial_sig_from_bytes(&payload.partial_sig)?;
                let handle = self.session_handle(&session_id).await?;
                let mut guard = handle.lock().await;
                sequence::admit(
                    &mut guard.p2p.last_sequence_numbers,
                    payload.signer_index,
                    payload.sequence_number,
                    envelope.timestamp,
                    now_ms,
                    self.config.max_sequence_gap,
                    self.config.max_timestamp_skew_ms,
                )?;
                if let Err(err) = guard.session.receive_partial_signature(payload.signer_index, sig) {
                    let reason = err.code().to_string();
                    self.abort_locked(&mut guard, &session_id, &reason, now_ms).await?;
                    return Err(err);
                }
                if guard.session.all_partials_collected() {
                    self.finalize(&mut guard, &session_id, now_ms).await?;
                }
                Ok(())
            }
            WireMessage::SessionAbort { envelope, payload } => {
                let session_id = envelope.session_id.ok_or_else(|| Musig2Error::ValidationError("missing sessionId".into()))?;
                self.close_session(&session_id, &payload.reason, now_ms).await
            }
            WireMessage::SessionReady { payload, .. } => {
                info!(request_id = %payload.request_id, "observed SESSION_READY from peer");
                Ok(())
            }
            WireMessage::SignerAdvertisement { payload, .. } => {
                if !validate_pubkey_bytes(&payload.public_key.serialize()) {
                    return Err(Musig2Error::ValidationError("malformed advertiser public key".into()));
                }
                verify_advertisement(&payload)?;
                Ok(())
            }
        }
    }

    async fn start_round2_locked(&self, guard: &mut SessionHandle, session_id: &str, now_ms: u64) -> Result<(), Musig2Error> {
        guard.session.aggregate_nonces()?;
        transition(&mut guard.session, SessionPhase::PartialSig, "nonces complete", now_ms)?;
        self.events
            .emit(CoordinatorEvent::SessionNoncesComplete { session_id: session_id.to_string() })
            .await;
        guard.session.create_partial_signature(&self.identity_secret_key)?;
        let my_index = guard.session.my_index;
        let sig = guard.session.partial_sigs[&my_index];
        let sequence_number = guard.p2p.last_sequence_numbers.get(&my_index).copied().unwrap_or(0) + 1;
        guard.p2p.last_sequence_numbers.insert(my_index, sequence_number);
        let envelope = Envelope::new(Some(session_id.to_string()), self.identity_peer_id.clone(), now_ms);
        let msg = WireMessage::PartialSigShare {
            envelope,
            payload: PartialSigSharePayload {
                signer_index: my_index,
                sequence_number,
                partial_sig: crate::musig::partial_sig_to_bytes(&sig),
            },
        };
        self.broadcast(&guard.p2p, &msg).await
    }

    async fn abort_locked(&self, guard: &mut SessionHandle, session_id: &str, reason: &str, now_ms: u64) -> Result<(), Musig2Error> {
        let _ = transition(&mut guard.session, SessionPhase::Aborted, reason, now_ms);
        crate::nonce_guard::NonceGuard::global().release_session(session_id);
        self.sessions.write().await.remove(session_id);

        let envelope = Envelope::new(Some(session_id.to_string()), self.identity_peer_id.clone(), now_ms);
        let msg = WireMessage::SessionAbort { envelope, payload: SessionAbortPayload { reason: reason.to_string() } };
        let _ = self.broadcast(&guard.p2p, &msg).await;

        self.events
            .emit(CoordinatorEvent::SessionAborted { session_id: session_id.to_string(), reason: reason.to_string() })
            .await;
        Ok(())
    }

    /// Force-aborts sessions whose age exceeds `session_timeout_ms`, or
    /// whose `updated_at` is stale by `stuck_timeout_ms` while in a
    /// non-terminal, non-`Init` phase. Intended to run on a
    /// `tokio::time::interval` tick every `cleanup_interval_ms`.
    pub async fn run_cleanup(&self, now_ms: u64) {
        let stale: Vec<String> = {
            let sessions = self.sessions.read().await;
            let mut ids = Vec::new();
            for (id, handle) in sessions.iter() {
                let guard = handle.lock().await;
                let too_old = now_ms.saturating_sub(guard.session.created_at) > self.config.session_timeout_ms;
                let stuck = guard.session.phase != SessionPhase::Init
                    && !matches!(guard.session.phase, SessionPhase::Complete | SessionPhase::Aborted)
                    && now_ms.saturating_sub(guard.session.updated_at) > self.config.stuck_timeout_ms;
                if too_old || stuck {
                    ids.push(id.clone());
                }
            }
            ids
        };

        for session_id in stale {
            info!(session_id = %session_id, "forcing abort on stale session");
            let _ = self.close_session(&session_id, Musig2Error::Timeout { phase: "cleanup".into() }.code(), now_ms).await;
        }
    }

    /// Spawns the periodic cleanup task on the current tokio runtime. The
    /// returned handle may be aborted to stop the sweep.
    pub fn spawn_cleanup_task(self: &Arc<Self>, mut now_ms_source: impl FnMut() -> u64 + Send + 'static) -> tokio::task::JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let interval_ms = coordinator.config.cleanup_interval_ms;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                coordinator.run_cleanup(now_ms_source()).await;
            }
        })
    }
}
