#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! Two-party exchange as it happens over the relay: only public key hex and
//! JSON envelopes cross the wire.

use reverseqr_crypto::{CryptoError, HexEnvelope, KeyExchangeState};

fn phrase_words() -> Vec<String> {
    (0..512).map(|i| format!("word{i}")).collect()
}

#[test]
fn peers_agree_and_exchange_an_envelope() {
    let words = phrase_words();
    let initiator = KeyExchangeState::new();
    let responder = KeyExchangeState::new();
    let initiator_hex = initiator.public_hex();
    let responder_hex = responder.public_hex();

    let a = initiator.complete(&responder_hex, &words).unwrap();
    let b = responder.complete(&initiator_hex, &words).unwrap();
    assert_eq!(a.verification_phrase, b.verification_phrase);

    let wire = serde_json::to_string(&b.session_key.encrypt(b"meet at noon").unwrap().to_hex())
        .unwrap();
    let envelope: HexEnvelope = serde_json::from_str(&wire).unwrap();
    assert_eq!(a.session_key.decrypt_text(&envelope).unwrap(), "meet at noon");
}

#[test]
fn substituted_key_changes_the_phrase() {
    let words = phrase_words();
    let initiator = KeyExchangeState::new();
    let responder = KeyExchangeState::new();
    let attacker_a = KeyExchangeState::new();
    let attacker_b = KeyExchangeState::new();
    let initiator_hex = initiator.public_hex();
    let responder_hex = responder.public_hex();
    let attacker_a_hex = attacker_a.public_hex();
    let attacker_b_hex = attacker_b.public_hex();

    // Relay hands each side the attacker's key instead of the peer's.
    let a = initiator.complete(&attacker_a_hex, &words).unwrap();
    let b = responder.complete(&attacker_b_hex, &words).unwrap();
    let a_side = attacker_a.complete(&initiator_hex, &words).unwrap();
    let b_side = attacker_b.complete(&responder_hex, &words).unwrap();

    assert_eq!(a.verification_phrase, a_side.verification_phrase);
    assert_eq!(b.verification_phrase, b_side.verification_phrase);
    assert_ne!(a.verification_phrase, b.verification_phrase);

    let sealed = b.session_key.encrypt(b"secret").unwrap();
    assert!(matches!(
        a.session_key.decrypt(&sealed),
        Err(CryptoError::DecryptionFailed(_))
    ));
}

#[test]
fn garbage_peer_key_fails_the_exchange() {
    let result = KeyExchangeState::new().complete("04deadbeef", &phrase_words());
    assert!(matches!(result, Err(CryptoError::InvalidPeerKey(_))));
}
