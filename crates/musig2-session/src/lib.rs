//! # musig2-session
//!
//! Two-round MuSig2 (BIP-327) Schnorr multi-signature sessions, coordinated
//! over a peer-to-peer overlay rather than a direct channel between
//! co-signers.
//!
//! A session walks through key aggregation, a commit-then-reveal nonce
//! exchange (this crate's own addition over stock BIP-327 — see
//! [`crypto::commit_nonces`]), partial signing and final aggregation, with
//! every transition recorded in a single state machine
//! ([`state_machine`]) and every inbound message admitted through a
//! replay/sequence guard ([`sequence`]) before it touches session state.
//!
//! [`SessionCoordinator`] is the façade: advertise as an available signer,
//! discover other signers, announce or join a signing request, and drive a
//! session to a final signature or an abort. It depends on nothing for
//! networking beyond the [`overlay::Overlay`] trait; [`overlay_nostr`]
//! provides a concrete adapter over Nostr relays behind the
//! `nostr-overlay` feature.

pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod election;
pub mod error;
pub mod events;
pub mod failover;
pub mod musig;
pub mod nonce_guard;
pub mod overlay;
#[cfg(feature = "nostr-overlay")]
pub mod overlay_nostr;
pub mod p2p;
pub mod security;
pub mod sequence;
pub mod session;
pub mod state_machine;
pub mod wire;

pub use config::CoordinatorConfig;
pub use coordinator::SessionCoordinator;
pub use error::Musig2Error;
pub use events::CoordinatorEvent;
pub use session::{Session, SessionPhase};
