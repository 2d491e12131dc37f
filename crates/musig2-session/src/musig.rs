//! MuSig2 (BIP-327) key aggregation, nonce handling and signing.
//!
//! All types come straight from the `musig2` crate's own `secp256k1` — no
//! bridging to a second secp256k1 version is needed here, since this crate
//! never touches Bitcoin script or PSBT types.
//!
//! The protocol runs in two rounds:
//!   Round 1: nonce exchange (every signer generates and shares a PubNonce,
//!            gated by the commit-then-reveal step in [`crate::crypto`])
//!   Round 2: partial signing + aggregation into a single Schnorr signature

use musig2::secp256k1::{PublicKey, SecretKey};
use musig2::{AggNonce, KeyAggContext, LiftedSignature, PartialSignature, PubNonce, SecNonce};

use crate::error::Musig2Error;

/// Aggregate a canonically-sorted list of signer public keys into a
/// `KeyAggContext`. Callers MUST pass keys already through
/// [`crate::crypto::canonical_sort`] — reordering changes the aggregate.
pub fn key_agg(sorted_pubkeys: &[PublicKey]) -> Result<KeyAggContext, Musig2Error> {
    KeyAggContext::new(sorted_pubkeys.to_vec()).map_err(|e| Musig2Error::KeyAgg(e.to_string()))
}

/// The 33-byte compressed aggregate public key for a `KeyAggContext`.
pub fn aggregated_pubkey(ctx: &KeyAggContext) -> PublicKey {
    ctx.aggregated_pubkey()
}

/// Generate a fresh nonce pair for one signer in one session.
///
/// Mixes a fresh CSPRNG seed with the signer's secret key, the aggregate
/// public key and the message. The returned `SecNonce` MUST be consumed by
/// [`partial_sign`] exactly once; the `musig2` crate's `SecNonce` already
/// zeroizes on drop.
pub fn gen_nonce_pair(
    my_secret_key: &SecretKey,
    key_agg_ctx: &KeyAggContext,
    message: &[u8; 32],
) -> Result<(SecNonce, PubNonce), Musig2Error> {
    let mut seed = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut seed);

    let agg_pk: PublicKey = key_agg_ctx.aggregated_pubkey();
    let secnonce = SecNonce::build(seed)
        .with_seckey(*my_secret_key)
        .with_aggregated_pubkey(agg_pk)
        .with_message(&message.to_vec())
        .build();
    let pubnonce = secnonce.public_nonce();
    Ok((secnonce, pubnonce))
}

/// Componentwise sum of all participants' public nonces.
pub fn nonce_agg(public_nonces: &[PubNonce]) -> AggNonce {
    AggNonce::sum(public_nonces)
}

/// Produce a partial signature. The `SecNonce` is consumed to prevent reuse.
pub fn partial_sign(
    key_agg_ctx: &KeyAggContext,
    my_secret_key: SecretKey,
    secnonce: SecNonce,
    agg_nonce: &AggNonce,
    message: &[u8; 32],
) -> Result<PartialSignature, Musig2Error> {
    musig2::sign_partial(key_agg_ctx, my_secret_key, secnonce, agg_nonce, message)
        .map_err(|e| Musig2Error::Internal(format!("partial sign: {e}")))
}

/// Verify a signer's partial signature against their public key and nonce.
pub fn partial_verify(
    key_agg_ctx: &KeyAggContext,
    partial_sig: PartialSignature,
    agg_nonce: &AggNonce,
    signer_pubkey: PublicKey,
    signer_pubnonce: &PubNonce,
    message: &[u8; 32],
) -> bool {
    musig2::verify_partial(
        key_agg_ctx,
        partial_sig,
        agg_nonce,
        signer_pubkey,
        signer_pubnonce,
        message,
    )
    .is_ok()
}

/// Aggregate all partial signatures into a final 64-byte BIP-340 Schnorr
/// signature. `musig2::aggregate_partial_signatures` verifies the result
/// against the aggregate key before returning it.
pub fn final_agg(
    key_agg_ctx: &KeyAggContext,
    agg_nonce: &AggNonce,
    partial_sigs: &[PartialSignature],
    message: &[u8; 32],
) -> Result<[u8; 64], Musig2Error> {
    let sig: LiftedSignature = musig2::aggregate_partial_signatures(
        key_agg_ctx,
        agg_nonce,
        partial_sigs.iter().copied(),
        message,
    )
    .map_err(|_| Musig2Error::AggregateInvalid)?;
    Ok(sig.serialize())
}

/// Verify a standalone final signature against an aggregate key — for
/// callers who persist `(R, s)` separately from a live session.
pub fn verify_final(agg_pubkey: &PublicKey, signature: &[u8; 64], message: &[u8; 32]) -> bool {
    use musig2::secp256k1::{schnorr, Message, Secp256k1};

    let secp = Secp256k1::verification_only();
    let (xonly, _) = agg_pubkey.x_only_public_key();
    let sig = match schnorr::Signature::from_slice(signature) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let msg = Message::from_digest(*message);
    secp.verify_schnorr(&sig, &msg, &xonly).is_ok()
}

pub fn pubnonce_to_bytes(pubnonce: &PubNonce) -> Vec<u8> {
    pubnonce.serialize().to_vec()
}

pub fn pubnonce_from_bytes(bytes: &[u8]) -> Result<PubNonce, Musig2Error> {
    PubNonce::from_bytes(bytes)
        .map_err(|e| Musig2Error::ValidationError(format!("invalid pubnonce: {e}")))
}

pub fn partial_sig_to_bytes(sig: &PartialSignature) -> [u8; 32] {
    sig.serialize()
}

pub fn partial_sig_from_bytes(bytes: &[u8; 32]) -> Result<PartialSignature, Musig2Error> {
    PartialSignature::from_slice(bytes)
        .map_err(|e| Musig2Error::ValidationError(format!("invalid partial sig: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::canonical_sort;
    use musig2::secp256k1::Secp256k1;

    fn test_keypair(seed_byte: u8) -> (SecretKey, PublicKey) {
        let secp = Secp256k1::new();
        let mut bytes = [0u8; 32];
        bytes[31] = seed_byte;
        bytes[0] = 0x01;
        let sk = SecretKey::from_slice(&bytes).unwrap();
        let pk = PublicKey::from_secret_key(&secp, &sk);
        (sk, pk)
    }

    #[test]
    fn key_agg_is_order_independent_after_canonical_sort() {
        let (_sk1, pk1) = test_keypair(1);
        let (_sk2, pk2) = test_keypair(42);

        let sorted_a = canonical_sort(vec![pk1, pk2]).unwrap();
        let sorted_b = canonical_sort(vec![pk2, pk1]).unwrap();
        assert_eq!(sorted_a, sorted_b);

        let agg_a = aggregated_pubkey(&key_agg(&sorted_a).unwrap());
        let agg_b = aggregated_pubkey(&key_agg(&sorted_b).unwrap());
        assert_eq!(agg_a, agg_b);
    }

    #[test]
    fn full_two_party_signing_roundtrip() {
        let (sk1, pk1) = test_keypair(1);
        let (sk2, pk2) = test_keypair(42);
        let sorted = canonical_sort(vec![pk1, pk2]).unwrap();
        let ctx = key_agg(&sorted).unwrap();
        let agg_pk = aggregated_pubkey(&ctx);
        let message = [0xABu8; 32];

        let (sec1, pub1) = gen_nonce_pair(&sk1, &ctx, &message).unwrap();
        let (sec2, pub2) = gen_nonce_pair(&sk2, &ctx, &message).unwrap();
        let agg_nonce = nonce_agg(&[pub1.clone(), pub2.clone()]);

        let s1 = partial_sign(&ctx, sk1, sec1, &agg_nonce, &message).unwrap();
        let s2 = partial_sign(&ctx, sk2, sec2, &agg_nonce, &message).unwrap();

        assert!(partial_verify(&ctx, s1, &agg_nonce, pk1, &pub1, &message));
        assert!(partial_verify(&ctx, s2, &agg_nonce, pk2, &pub2, &message));

        let sig = final_agg(&ctx, &agg_nonce, &[s1, s2], &message).unwrap();
        assert!(verify_final(&agg_pk, &sig, &message));
    }

    #[test]
    fn partial_verify_rejects_wrong_signer() {
        let (sk1, pk1) = test_keypair(1);
        let (_sk2, pk2) = test_keypair(42);
        let sorted = canonical_sort(vec![pk1, pk2]).unwrap();
        let ctx = key_agg(&sorted).unwrap();
        let message = [0xABu8; 32];

        let (sec1, pub1) = gen_nonce_pair(&sk1, &ctx, &message).unwrap();
        let (_sec2, pub2) = gen_nonce_pair(&sk1, &ctx, &message).unwrap();
        let agg_nonce = nonce_agg(&[pub1.clone(), pub2.clone()]);

        let s1 = partial_sign(&ctx, sk1, sec1, &agg_nonce, &message).unwrap();
        // s1 was produced by signer 1 but we check it against signer 2's identity.
        assert!(!partial_verify(&ctx, s1, &agg_nonce, pk2, &pub2, &message));
    }

    #[test]
    fn aggregation_fails_on_mismatched_messages() {
        let (sk1, pk1) = test_keypair(1);
        let (sk2, pk2) = test_keypair(42);
        let sorted = canonical_sort(vec![pk1, pk2]).unwrap();
        let ctx = key_agg(&sorted).unwrap();
        let message = [0xABu8; 32];
        let other_message = [0xFFu8; 32];

        let (sec1, pub1) = gen_nonce_pair(&sk1, &ctx, &message).unwrap();
        let (sec2, pub2) = gen_nonce_pair(&sk2, &ctx, &message).unwrap();
        let agg_nonce = nonce_agg(&[pub1.clone(), pub2.clone()]);

        let s1 = partial_sign(&ctx, sk1, sec1, &agg_nonce, &message).unwrap();
        let s2 = partial_sign(&ctx, sk2, sec2, &agg_nonce, &other_message).unwrap();

        assert!(final_agg(&ctx, &agg_nonce, &[s1, s2], &message).is_err());
    }

    #[test]
    fn pubnonce_and_partial_sig_roundtrip_through_bytes() {
        let (sk1, pk1) = test_keypair(1);
        let (_sk2, pk2) = test_keypair(42);
        let sorted = canonical_sort(vec![pk1, pk2]).unwrap();
        let ctx = key_agg(&sorted).unwrap();
        let message = [0xCDu8; 32];

        let (sec1, pub1) = gen_nonce_pair(&sk1, &ctx, &message).unwrap();
        let bytes = pubnonce_to_bytes(&pub1);
        let recovered = pubnonce_from_bytes(&bytes).unwrap();
        assert_eq!(pub1.serialize(), recovered.serialize());

        let agg_nonce = nonce_agg(&[pub1.clone(), pub1.clone()]);
        let sig = partial_sign(&ctx, sk1, sec1, &agg_nonce, &message).unwrap();
        let sig_bytes = partial_sig_to_bytes(&sig);
        let recovered_sig = partial_sig_from_bytes(&sig_bytes).unwrap();
        assert_eq!(sig.serialize(), recovered_sig.serialize());
    }
}
