//! The sole writer of [`Session::phase`](crate::session::Session). Every
//! other module that wants to move a session forward calls
//! [`transition`] and handles its failure; nothing else assigns to
//! `session.phase` directly.

use tracing::{debug, warn};

use crate::error::Musig2Error;
use crate::session::{Session, SessionPhase};

/// Recorded on every successful transition; callers forward it to
/// [`crate::events::EventBus`] and to their own tracing span.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub from: SessionPhase,
    pub to: SessionPhase,
    pub reason: String,
    pub timestamp: u64,
}

fn allowed(from: SessionPhase, to: SessionPhase) -> bool {
    use SessionPhase::*;
    matches!(
        (from, to),
        (Init, NonceCommit)
            | (Init, Aborted)
            | (NonceCommit, NonceReveal)
            | (NonceCommit, Aborted)
            | (NonceReveal, PartialSig)
            | (NonceReveal, Aborted)
            | (PartialSig, Complete)
            | (PartialSig, Aborted)
    )
}

/// Attempts a phase transition, recording `reason` and `now_ms` on success.
/// `Complete` and `Aborted` are terminal: any transition attempted from
/// either fails with `ProtocolViolation`, matching the table in full.
pub fn transition(
    session: &mut Session,
    to: SessionPhase,
    reason: &str,
    now_ms: u64,
) -> Result<StateChange, Musig2Error> {
    let from = session.phase;
    if !allowed(from, to) {
        warn!(?from, ?to, session_id = %session.session_id, "rejected state transition");
        return Err(Musig2Error::ProtocolViolation(format!(
            "cannot transition from {from:?} to {to:?}"
        )));
    }

    session.phase = to;
    session.updated_at = now_ms;
    if to == SessionPhase::Aborted {
        session.abort_reason = Some(reason.to_string());
        session.zeroize_secrets();
    }

    debug!(?from, ?to, reason, session_id = %session.session_id, "session transition");

    Ok(StateChange {
        from,
        to,
        reason: reason.to_string(),
        timestamp: now_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use musig2::secp256k1::{PublicKey, Secp256k1, SecretKey};

    fn test_session() -> Session {
        let secp = Secp256k1::new();
        let mut b1 = [0u8; 32];
        b1[0] = 1;
        b1[31] = 1;
        let sk1 = SecretKey::from_slice(&b1).unwrap();
        let pk1 = PublicKey::from_secret_key(&secp, &sk1);
        let mut b2 = [0u8; 32];
        b2[0] = 1;
        b2[31] = 2;
        let sk2 = SecretKey::from_slice(&b2).unwrap();
        let pk2 = PublicKey::from_secret_key(&secp, &sk2);
        Session::create(vec![pk1, pk2], &pk1, [0xAAu8; 32], b"nonce", 0).unwrap()
    }

    #[test]
    fn linear_path_to_complete_succeeds() {
        let mut session = test_session();
        transition(&mut session, SessionPhase::NonceCommit, "start", 1).unwrap();
        transition(&mut session, SessionPhase::NonceReveal, "commitments done", 2).unwrap();
        transition(&mut session, SessionPhase::PartialSig, "nonces done", 3).unwrap();
        transition(&mut session, SessionPhase::Complete, "partials done", 4).unwrap();
        assert_eq!(session.phase, SessionPhase::Complete);
    }

    #[test]
    fn skipping_a_phase_is_rejected() {
        let mut session = test_session();
        let err = transition(&mut session, SessionPhase::PartialSig, "skip ahead", 1);
        assert!(matches!(err, Err(Musig2Error::ProtocolViolation(_))));
        assert_eq!(session.phase, SessionPhase::Init);
    }

    #[test]
    fn terminal_phases_reject_further_transitions() {
        let mut session = test_session();
        transition(&mut session, SessionPhase::Aborted, "abort", 1).unwrap();
        let err = transition(&mut session, SessionPhase::NonceCommit, "too late", 2);
        assert!(err.is_err());
    }

    #[test]
    fn abort_records_reason_and_clears_nonces() {
        let mut session = test_session();
        session.my_secret_nonces = None;
        transition(&mut session, SessionPhase::Aborted, "Timeout", 5).unwrap();
        assert_eq!(session.abort_reason.as_deref(), Some("Timeout"));
    }
}
