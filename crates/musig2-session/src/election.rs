//! Deterministic coordinator election.
//!
//! No voting round: every participant re-runs the same computation over the
//! same (sorted) signer list and agrees on the result locally. The creator
//! signs the result once in the session announcement; everyone else just
//! checks it matches.

use musig2::secp256k1::PublicKey;
use serde::{Deserialize, Serialize};

use crate::crypto::election_hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElectionMethod {
    Lexicographic,
    HashBased,
    FirstSigner,
    LastSigner,
}

impl Default for ElectionMethod {
    fn default() -> Self {
        ElectionMethod::Lexicographic
    }
}

/// Runs the election over the given (already canonically sorted) signer
/// list, skipping any index present in `excluded` — used by
/// [`crate::failover::trigger_failover`] to walk the priority list.
pub fn elect_coordinator(
    sorted_signers: &[PublicKey],
    session_id: &str,
    method: ElectionMethod,
    excluded: &[usize],
) -> Option<usize> {
    let candidates: Vec<usize> = (0..sorted_signers.len())
        .filter(|i| !excluded.contains(i))
        .collect();
    if candidates.is_empty() {
        return None;
    }

    match method {
        ElectionMethod::Lexicographic => candidates.into_iter().min_by_key(|&i| sorted_signers[i].serialize()),
        ElectionMethod::HashBased => candidates
            .into_iter()
            .min_by_key(|&i| election_hash(session_id, &sorted_signers[i])),
        ElectionMethod::FirstSigner => candidates.into_iter().min(),
        ElectionMethod::LastSigner => candidates.into_iter().max(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use musig2::secp256k1::{Secp256k1, SecretKey};

    fn test_pubkey(seed: u8) -> PublicKey {
        let secp = Secp256k1::new();
        let mut bytes = [0u8; 32];
        bytes[0] = 0x01;
        bytes[31] = seed;
        let sk = SecretKey::from_slice(&bytes).unwrap();
        PublicKey::from_secret_key(&secp, &sk)
    }

    #[test]
    fn lexicographic_picks_the_smallest_compressed_key() {
        let pk1 = test_pubkey(1);
        let pk2 = test_pubkey(2);
        let signers = vec![pk1, pk2];
        let idx = elect_coordinator(&signers, "session", ElectionMethod::Lexicographic, &[]).unwrap();
        let expected = if pk1.serialize() < pk2.serialize() { 0 } else { 1 };
        assert_eq!(idx, expected);
    }

    #[test]
    fn first_and_last_signer_are_endpoints() {
        let signers: Vec<PublicKey> = (1..=4).map(test_pubkey).collect();
        assert_eq!(elect_coordinator(&signers, "s", ElectionMethod::FirstSigner, &[]), Some(0));
        assert_eq!(elect_coordinator(&signers, "s", ElectionMethod::LastSigner, &[]), Some(3));
    }

    #[test]
    fn excluded_indices_are_skipped() {
        let signers: Vec<PublicKey> = (1..=3).map(test_pubkey).collect();
        assert_eq!(
            elect_coordinator(&signers, "s", ElectionMethod::FirstSigner, &[0]),
            Some(1)
        );
        assert_eq!(
            elect_coordinator(&signers, "s", ElectionMethod::FirstSigner, &[0, 1, 2]),
            None
        );
    }

    #[test]
    fn hash_based_is_deterministic_across_calls() {
        let signers: Vec<PublicKey> = (1..=3).map(test_pubkey).collect();
        let a = elect_coordinator(&signers, "session-x", ElectionMethod::HashBased, &[]);
        let b = elect_coordinator(&signers, "session-x", ElectionMethod::HashBased, &[]);
        assert_eq!(a, b);
    }
}
