//! Error taxonomy for MuSig2 session coordination.
//!
//! Every failure path in this crate resolves to one of the kinds below.
//! Recoverable kinds (`ReplayOrReorder`, `ValidationError`, `PeerBlocked`)
//! only ever cause a message to be dropped; the rest abort the session they
//! occurred in, with `code()` becoming the session's `abortReason`.

use thiserror::Error;

/// Stable error taxonomy, one variant per code named in the error handling
/// design. `code()` returns the exact string used as `abortReason` and in
/// `SESSION_ABORTED` events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Musig2Error {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("replay or reorder: {0}")]
    ReplayOrReorder(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("commitment mismatch for signer {signer_index}")]
    CommitMismatch { signer_index: usize },

    #[error("partial signature invalid for signer {signer_index}")]
    PartialInvalid { signer_index: usize },

    #[error("aggregate signature failed BIP-340 verification")]
    AggregateInvalid,

    #[error("nonce reuse detected: {0}")]
    NonceReuse(String),

    #[error("timeout in phase {phase}")]
    Timeout { phase: String },

    #[error("peer {peer_id} blocked after too many invalid messages")]
    PeerBlocked { peer_id: String },

    #[error("internal invariant broken: {0}")]
    Internal(String),

    #[error("key aggregation failed: {0}")]
    KeyAgg(String),

    #[error("nonce pair generation failed: {0}")]
    NoncePairGen(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),
}

impl Musig2Error {
    /// Stable code string, suitable as an `abortReason` or wire-level error code.
    pub fn code(&self) -> &'static str {
        match self {
            Musig2Error::ProtocolViolation(_) => "ProtocolViolation",
            Musig2Error::ReplayOrReorder(_) => "ReplayOrReorder",
            Musig2Error::ValidationError(_) => "ValidationError",
            Musig2Error::CommitMismatch { .. } => "CommitMismatch",
            Musig2Error::PartialInvalid { .. } => "PartialInvalid",
            Musig2Error::AggregateInvalid => "AggregateInvalid",
            Musig2Error::NonceReuse(_) => "NonceReuse",
            Musig2Error::Timeout { .. } => "Timeout",
            Musig2Error::PeerBlocked { .. } => "PeerBlocked",
            Musig2Error::Internal(_) => "Internal",
            Musig2Error::KeyAgg(_) => "KeyAgg",
            Musig2Error::NoncePairGen(_) => "NoncePairGen",
            Musig2Error::UnknownSession(_) => "UnknownSession",
        }
    }

    /// Whether this error is recoverable at the message-admission boundary
    /// (drop message, dock reputation) rather than fatal to the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Musig2Error::ReplayOrReorder(_)
                | Musig2Error::ValidationError(_)
                | Musig2Error::PeerBlocked { .. }
        )
    }
}

impl From<serde_json::Error> for Musig2Error {
    fn from(e: serde_json::Error) -> Self {
        Musig2Error::ValidationError(format!("malformed message: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_kinds_are_exactly_three() {
        assert!(Musig2Error::ReplayOrReorder("x".into()).is_recoverable());
        assert!(Musig2Error::ValidationError("x".into()).is_recoverable());
        assert!(Musig2Error::PeerBlocked { peer_id: "p".into() }.is_recoverable());
        assert!(!Musig2Error::ProtocolViolation("x".into()).is_recoverable());
        assert!(!Musig2Error::CommitMismatch { signer_index: 0 }.is_recoverable());
        assert!(!Musig2Error::Internal("x".into()).is_recoverable());
    }

    #[test]
    fn codes_are_stable_strings() {
        assert_eq!(Musig2Error::AggregateInvalid.code(), "AggregateInvalid");
        assert_eq!(
            Musig2Error::Timeout { phase: "NONCE_COMMIT".into() }.code(),
            "Timeout"
        );
    }
}
