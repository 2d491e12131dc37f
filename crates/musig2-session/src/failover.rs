//! Explicit, application-driven coordinator failover.
//!
//! The layer never runs its own broadcast-deadline timer: after a session
//! completes, the application owns the external confirmation signal (did
//! the final signature actually get broadcast?) and calls
//! [`trigger_failover`] on its own timeout. This keeps the liveness
//! decision out of the core and avoids a second, internal timer racing the
//! caller's.

use musig2::secp256k1::PublicKey;
use serde::{Deserialize, Serialize};

use crate::election::{elect_coordinator, ElectionMethod};
use crate::error::Musig2Error;
use crate::p2p::P2PMetadata;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailoverState {
    pub current_coordinator_index: usize,
    pub failover_attempts: u32,
    pub broadcast_deadline: Option<u64>,
    failed_indices: Vec<usize>,
}

impl FailoverState {
    pub fn new(initial_coordinator_index: usize) -> Self {
        FailoverState {
            current_coordinator_index: initial_coordinator_index,
            failover_attempts: 0,
            broadcast_deadline: None,
            failed_indices: vec![initial_coordinator_index],
        }
    }
}

/// Advance the failover state by exactly one step: exclude the current
/// coordinator, elect the next backup excluding everyone already tried.
/// Returns the new coordinator index, or `Musig2Error::Internal` carrying
/// the `FAILOVER_EXHAUSTED` condition when no backup remains — the caller
/// (`SessionCoordinator`) turns that into the `FAILOVER_EXHAUSTED` event.
pub fn trigger_failover(
    p2p: &mut P2PMetadata,
    sorted_signers: &[PublicKey],
    session_id: &str,
    method: ElectionMethod,
) -> Result<usize, Musig2Error> {
    let state = p2p.failover.get_or_insert_with(|| {
        let initial = p2p
            .election
            .as_ref()
            .map(|e| e.coordinator_index)
            .unwrap_or(0);
        FailoverState::new(initial)
    });

    match elect_coordinator(sorted_signers, session_id, method, &state.failed_indices) {
        Some(next) => {
            state.current_coordinator_index = next;
            state.failover_attempts += 1;
            state.failed_indices.push(next);
            Ok(next)
        }
        None => {
            state.failover_attempts += 1;
            Err(Musig2Error::Internal("failover exhausted: no backup coordinator remains".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::ElectionMethod;
    use musig2::secp256k1::{Secp256k1, SecretKey};

    fn test_signers(n: u8) -> Vec<PublicKey> {
        let secp = Secp256k1::new();
        (1..=n)
            .map(|i| {
                let mut bytes = [0u8; 32];
                bytes[0] = 0x01;
                bytes[31] = i;
                let sk = SecretKey::from_slice(&bytes).unwrap();
                PublicKey::from_secret_key(&secp, &sk)
            })
            .collect()
    }

    #[test]
    fn failover_advances_one_step_at_a_time() {
        let signers = test_signers(3);
        let mut p2p = P2PMetadata::default();
        p2p.election = Some(crate::p2p::ElectionRecord {
            coordinator_index: 0,
            election_proof: vec![],
            method: ElectionMethod::FirstSigner,
        });

        let next1 = trigger_failover(&mut p2p, &signers, "s", ElectionMethod::FirstSigner).unwrap();
        assert_eq!(next1, 1);
        let next2 = trigger_failover(&mut p2p, &signers, "s", ElectionMethod::FirstSigner).unwrap();
        assert_eq!(next2, 2);
        let exhausted = trigger_failover(&mut p2p, &signers, "s", ElectionMethod::FirstSigner);
        assert!(exhausted.is_err());
    }
}
