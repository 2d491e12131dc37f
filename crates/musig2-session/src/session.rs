//! The MuSig2 state of one (signers, message) signing attempt.
//!
//! Deliberately free of anything about peers, sequence numbers or election —
//! that lives in [`crate::p2p::P2PMetadata`], kept alongside a `Session` in
//! the coordinator's session table but never inside this struct. `phase` is
//! only ever written by [`crate::state_machine::transition`].

use std::collections::HashMap;
use std::fmt;

use musig2::secp256k1::PublicKey;
use musig2::{AggNonce, KeyAggContext, PartialSignature, PubNonce, SecNonce};
use serde::{Deserialize, Serialize};

use crate::crypto::{canonical_sort, session_id};
use crate::error::Musig2Error;
use crate::musig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    Init,
    NonceCommit,
    NonceReveal,
    PartialSig,
    Complete,
    Aborted,
}

/// One (ordered signer list, message) signing attempt.
///
/// `b`, the effective nonce `R`, and the challenge `e` from the data model
/// are intentionally not stored as separate fields: the `musig2` crate
/// recomputes them internally inside `partial_sign`/`partial_verify`/
/// `aggregate_partial_signatures`, and duplicating them here would be a
/// second source of truth for values the engine already owns.
pub struct Session {
    pub session_id: String,
    pub signers: Vec<PublicKey>,
    pub my_index: usize,
    pub key_agg_ctx: KeyAggContext,
    pub message: [u8; 32],
    pub my_secret_nonces: Option<SecNonce>,
    pub my_public_nonce: Option<PubNonce>,
    pub nonce_commitments: HashMap<usize, [u8; 32]>,
    pub public_nonces: HashMap<usize, PubNonce>,
    pub aggregated_nonce: Option<AggNonce>,
    pub partial_sigs: HashMap<usize, PartialSignature>,
    pub my_partial_sig: Option<PartialSignature>,
    pub final_signature: Option<[u8; 64]>,
    pub phase: SessionPhase,
    pub created_at: u64,
    pub updated_at: u64,
    pub abort_reason: Option<String>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("signers", &self.signers.len())
            .field("my_index", &self.my_index)
            .field("message", &hex::encode(self.message))
            .field("my_secret_nonces", &self.my_secret_nonces.as_ref().map(|_| "<redacted>"))
            .field("phase", &self.phase)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .field("abort_reason", &self.abort_reason)
            .finish()
    }
}

impl Session {
    /// Builds a session for this participant. `signers` need not already be
    /// sorted — this sorts canonically and locates `my_public_key` in the
    /// result, failing with `ValidationError` if it is not present or a
    /// duplicate key slipped through.
    pub fn create(
        signers: Vec<PublicKey>,
        my_public_key: &PublicKey,
        message: [u8; 32],
        creator_nonce: &[u8],
        now_ms: u64,
    ) -> Result<Self, Musig2Error> {
        let sorted = canonical_sort(signers).map_err(Musig2Error::ValidationError)?;
        let my_index = sorted
            .iter()
            .position(|pk| pk == my_public_key)
            .ok_or_else(|| Musig2Error::ValidationError("own public key not among signers".into()))?;

        let key_agg_ctx = musig::key_agg(&sorted)?;
        let sid = session_id(&sorted, &message, creator_nonce);

        Ok(Session {
            session_id: sid,
            signers: sorted,
            my_index,
            key_agg_ctx,
            message,
            my_secret_nonces: None,
            my_public_nonce: None,
            nonce_commitments: HashMap::new(),
            public_nonces: HashMap::new(),
            aggregated_nonce: None,
            partial_sigs: HashMap::new(),
            my_partial_sig: None,
            final_signature: None,
            phase: SessionPhase::Init,
            created_at: now_ms,
            updated_at: now_ms,
            abort_reason: None,
        })
    }

    pub fn aggregated_pub_key(&self) -> PublicKey {
        musig::aggregated_pubkey(&self.key_agg_ctx)
    }

    pub fn n(&self) -> usize {
        self.signers.len()
    }

    /// Generates this participant's nonce pair. May be called at most once
    /// per session — a second call is `NonceReuse`, per the invariant that
    /// `mySecretNonces` is generated at most once. The pair is also checked
    /// against every other session live in this process
    /// ([`crate::nonce_guard::NonceGuard`]) and rejected as `NonceReuse` if
    /// it has been emitted before.
    pub fn generate_nonces(
        &mut self,
        my_secret_key: &musig2::secp256k1::SecretKey,
    ) -> Result<(), Musig2Error> {
        if self.my_secret_nonces.is_some() {
            return Err(Musig2Error::NonceReuse(
                "generate_nonces called twice in the same session".into(),
            ));
        }
        let (secnonce, pubnonce) = musig::gen_nonce_pair(my_secret_key, &self.key_agg_ctx, &self.message)?;
        crate::nonce_guard::NonceGuard::global().check_and_record(&self.session_id, &pubnonce)?;
        self.my_public_nonce = Some(pubnonce.clone());
        self.nonce_commitments
            .insert(self.my_index, crate::crypto::commit_nonces_from_pubnonce(&pubnonce));
        self.public_nonces.insert(self.my_index, pubnonce);
        self.my_secret_nonces = Some(secnonce);
        Ok(())
    }

    pub fn receive_commitment(&mut self, signer_index: usize, commitment: [u8; 32]) -> Result<(), Musig2Error> {
        if self.nonce_commitments.contains_key(&signer_index) {
            return Err(Musig2Error::ProtocolViolation(format!(
                "commitment for signer {signer_index} already recorded"
            )));
        }
        self.nonce_commitments.insert(signer_index, commitment);
        Ok(())
    }

    pub fn receive_nonce(&mut self, signer_index: usize, pubnonce: PubNonce) -> Result<(), Musig2Error> {
        let expected = self
            .nonce_commitments
            .get(&signer_index)
            .ok_or_else(|| Musig2Error::ProtocolViolation(format!("no commitment on file for signer {signer_index}")))?;
        let actual = crate::crypto::commit_nonces_from_pubnonce(&pubnonce);
        if actual != *expected {
            return Err(Musig2Error::CommitMismatch { signer_index });
        }
        self.public_nonces.insert(signer_index, pubnonce);
        Ok(())
    }

    pub fn all_commitments_collected(&self) -> bool {
        self.nonce_commitments.len() == self.n()
    }

    pub fn all_nonces_collected(&self) -> bool {
        self.public_nonces.len() == self.n()
    }

    /// Aggregates all collected public nonces. Requires every nonce to have
    /// been received; does not itself advance `phase`.
    pub fn aggregate_nonces(&mut self) -> Result<(), Musig2Error> {
        if !self.all_nonces_collected() {
            return Err(Musig2Error::ProtocolViolation("not all nonces collected".into()));
        }
        let ordered: Vec<PubNonce> = (0..self.n())
            .map(|i| self.public_nonces.get(&i).cloned().expect("checked above"))
            .collect();
        self.aggregated_nonce = Some(musig::nonce_agg(&ordered));
        Ok(())
    }

    pub fn create_partial_signature(
        &mut self,
        my_secret_key: &musig2::secp256k1::SecretKey,
    ) -> Result<(), Musig2Error> {
        let agg_nonce = self
            .aggregated_nonce
            .clone()
            .ok_or_else(|| Musig2Error::ProtocolViolation("aggregated nonce not yet computed".into()))?;
        let secnonce = self
            .my_secret_nonces
            .take()
            .ok_or_else(|| Musig2Error::ProtocolViolation("no secret nonce to sign with".into()))?;
        let sig = musig::partial_sign(&self.key_agg_ctx, *my_secret_key, secnonce, &agg_nonce, &self.message)?;
        self.my_partial_sig = Some(sig);
        self.partial_sigs.insert(self.my_index, sig);
        Ok(())
    }

    pub fn receive_partial_signature(&mut self, signer_index: usize, sig: PartialSignature) -> Result<(), Musig2Error> {
        let agg_nonce = self
            .aggregated_nonce
            .as_ref()
            .ok_or_else(|| Musig2Error::ProtocolViolation("aggregated nonce not yet computed".into()))?;
        let pubnonce = self
            .public_nonces
            .get(&signer_index)
            .ok_or_else(|| Musig2Error::ProtocolViolation(format!("no public nonce on file for signer {signer_index}")))?;
        let pubkey = self.signers[signer_index];
        if !musig::partial_verify(&self.key_agg_ctx, sig, agg_nonce, pubkey, pubnonce, &self.message) {
            return Err(Musig2Error::PartialInvalid { signer_index });
        }
        self.partial_sigs.insert(signer_index, sig);
        Ok(())
    }

    pub fn all_partials_collected(&self) -> bool {
        self.partial_sigs.len() == self.n()
    }

    pub fn get_final_signature(&mut self) -> Result<[u8; 64], Musig2Error> {
        if let Some(sig) = self.final_signature {
            return Ok(sig);
        }
        if !self.all_partials_collected() {
            return Err(Musig2Error::ProtocolViolation("not all partial signatures collected".into()));
        }
        let agg_nonce = self
            .aggregated_nonce
            .as_ref()
            .ok_or_else(|| Musig2Error::ProtocolViolation("aggregated nonce not yet computed".into()))?;
        let ordered: Vec<PartialSignature> = (0..self.n())
            .map(|i| self.partial_sigs.get(&i).copied().expect("checked above"))
            .collect();
        let sig = musig::final_agg(&self.key_agg_ctx, agg_nonce, &ordered, &self.message)?;
        self.final_signature = Some(sig);
        Ok(sig)
    }

    /// Zeroes transient secret material and records the abort reason. Safe
    /// to call from any phase, including terminal ones (idempotent).
    pub fn zeroize_secrets(&mut self) {
        self.my_secret_nonces = None;
    }
}
