//! Process-wide guard against nonce-pair reuse across session boundaries.
//!
//! [`crate::session::Session::generate_nonces`] already rejects a second
//! call within the same session; that alone doesn't stop the same `(R1,
//! R2)` pair from being emitted again in some unrelated, later session —
//! the failure mode BIP-327 nonce generation exists to prevent. This guard
//! tracks every pair seen by hash in a single process-wide set, evicting a
//! session's entries once that session reaches a terminal phase so the set
//! stays bounded over a long-running process rather than growing forever.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use musig2::PubNonce;

use crate::crypto::tagged_hash;
use crate::error::Musig2Error;

fn nonce_key(pubnonce: &PubNonce) -> [u8; 64] {
    let bytes = pubnonce.serialize();
    let mut key = [0u8; 64];
    key[..32].copy_from_slice(&tagged_hash("MuSig2/NonceGuard/Lo", &[&bytes]));
    key[32..].copy_from_slice(&tagged_hash("MuSig2/NonceGuard/Hi", &[&bytes]));
    key
}

/// A single mutex-guarded, session-lifetime-bounded set of nonce-pair
/// hashes. Reached process-wide through [`NonceGuard::global`].
pub struct NonceGuard {
    seen: Mutex<HashMap<[u8; 64], String>>,
}

impl NonceGuard {
    fn new() -> Self {
        NonceGuard { seen: Mutex::new(HashMap::new()) }
    }

    /// The single process-wide instance.
    pub fn global() -> &'static NonceGuard {
        static GUARD: OnceLock<NonceGuard> = OnceLock::new();
        GUARD.get_or_init(NonceGuard::new)
    }

    /// Records `pubnonce` as belonging to `session_id`, rejecting it with
    /// `NonceReuse` if this exact pair has already been recorded by any
    /// session still live.
    pub fn check_and_record(&self, session_id: &str, pubnonce: &PubNonce) -> Result<(), Musig2Error> {
        let key = nonce_key(pubnonce);
        let mut seen = self.seen.lock().expect("nonce guard mutex poisoned");
        if seen.contains_key(&key) {
            return Err(Musig2Error::NonceReuse(format!(
                "nonce pair already emitted in session {}",
                seen.get(&key).expect("checked above")
            )));
        }
        seen.insert(key, session_id.to_string());
        Ok(())
    }

    /// Evicts every entry recorded for `session_id`. Called once a session
    /// reaches `Complete` or `Aborted`, so the set only needs to hold
    /// entries for sessions still in flight.
    pub fn release_session(&self, session_id: &str) {
        let mut seen = self.seen.lock().expect("nonce guard mutex poisoned");
        seen.retain(|_, owner| owner != session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::canonical_sort;
    use crate::musig::{gen_nonce_pair, key_agg};
    use musig2::secp256k1::{PublicKey, Secp256k1, SecretKey};

    fn test_keypair(seed: u8) -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let mut bytes = [0u8; 32];
        bytes[0] = 0x01;
        bytes[31] = seed;
        let sk = SecretKey::from_slice(&bytes).unwrap();
        let pk = PublicKey::from_secret_key(&secp, &sk);
        (sk, pk)
    }

    fn any_pubnonce(seed: u8) -> PubNonce {
        let (sk, pk) = test_keypair(seed);
        let sorted = canonical_sort(vec![pk]).unwrap();
        let ctx = key_agg(&sorted).unwrap();
        let message = [0xEEu8; 32];
        gen_nonce_pair(&sk, &ctx, &message).unwrap().1
    }

    #[test]
    fn same_pair_rejected_across_different_sessions() {
        let guard = NonceGuard::new();
        let pubnonce = any_pubnonce(1);

        assert!(guard.check_and_record("session-a", &pubnonce).is_ok());
        assert!(matches!(
            guard.check_and_record("session-b", &pubnonce),
            Err(Musig2Error::NonceReuse(_))
        ));
    }

    #[test]
    fn distinct_pairs_are_both_accepted() {
        let guard = NonceGuard::new();
        assert!(guard.check_and_record("session-a", &any_pubnonce(1)).is_ok());
        assert!(guard.check_and_record("session-a", &any_pubnonce(2)).is_ok());
    }

    #[test]
    fn releasing_a_session_forgets_its_entries() {
        let guard = NonceGuard::new();
        let pubnonce = any_pubnonce(3);
        guard.check_and_record("session-a", &pubnonce).unwrap();
        guard.release_session("session-a");
        assert!(guard.check_and_record("session-b", &pubnonce).is_ok());
    }
}
