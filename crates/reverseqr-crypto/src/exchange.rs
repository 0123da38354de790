//! Key exchange protocol logic.
//!
//! Implements relay-mediated P-256 ECDH between the two peers of a session.
//! Each side generates an ephemeral keypair per pairing attempt, sends the
//! uncompressed public point as hex, performs ECDH with the peer's point and
//! derives the symmetric session key via HKDF-SHA256.

use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::phrase::verification_phrase;
use crate::session::SessionKey;

/// Length of an uncompressed SEC1 P-256 point.
pub const PUBLIC_KEY_LEN: usize = 65;

/// An ephemeral P-256 keypair for one pairing attempt.
///
/// The private scalar never leaves this struct; it is zeroized on drop.
pub struct KeyPair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &export_public_key(&self.public))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    pub const fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Our public point as uncompressed SEC1 hex, ready for transport.
    pub fn public_hex(&self) -> String {
        export_public_key(&self.public)
    }

    /// Raw ECDH with the peer's point (32-byte x-coordinate).
    pub fn compute_shared_secret(&self, peer: &PublicKey) -> Zeroizing<[u8; 32]> {
        let shared = self.secret.diffie_hellman(peer);
        let mut out = Zeroizing::new([0u8; 32]);
        out.copy_from_slice(shared.raw_secret_bytes());
        out
    }
}

/// Encode a public key as uncompressed SEC1 hex (`04 || X || Y`).
pub fn export_public_key(public: &PublicKey) -> String {
    hex::encode(public.to_encoded_point(false).as_bytes())
}

/// Decode a peer's uncompressed SEC1 hex point.
///
/// Rejects malformed hex, compressed or truncated encodings, points not on
/// the curve and the identity.
pub fn import_public_key(hex_str: &str) -> Result<PublicKey, CryptoError> {
    let bytes = hex::decode(hex_str.trim())
        .map_err(|e| CryptoError::InvalidPeerKey(format!("not hex: {e}")))?;
    if bytes.len() != PUBLIC_KEY_LEN || bytes[0] != 0x04 {
        return Err(CryptoError::InvalidPeerKey(format!(
            "expected {PUBLIC_KEY_LEN}-byte uncompressed point, got {} bytes",
            bytes.len()
        )));
    }
    PublicKey::from_sec1_bytes(&bytes)
        .map_err(|_| CryptoError::InvalidPeerKey("point is not on the P-256 curve".into()))
}

/// Result of a completed key exchange.
#[derive(Debug)]
pub struct EstablishedKeys {
    pub session_key: SessionKey,
    pub verification_phrase: String,
}

/// State of a key exchange in progress.
#[derive(Debug)]
pub struct KeyExchangeState {
    key_pair: KeyPair,
}

impl Default for KeyExchangeState {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyExchangeState {
    /// Start a new key exchange by generating an ephemeral keypair.
    pub fn new() -> Self {
        Self {
            key_pair: KeyPair::generate(),
        }
    }

    /// Our ephemeral public key hex to send to the peer.
    pub fn public_hex(&self) -> String {
        self.key_pair.public_hex()
    }

    /// Complete the key exchange with the peer's public key hex.
    ///
    /// Consumes the keypair. The shared secret only lives long enough to
    /// derive the session key and the verification phrase.
    pub fn complete<S: AsRef<str>>(
        self,
        peer_public_hex: &str,
        phrase_wordlist: &[S],
    ) -> Result<EstablishedKeys, CryptoError> {
        let peer = import_public_key(peer_public_hex)?;
        let shared = self.key_pair.compute_shared_secret(&peer);

        let session_key = SessionKey::from_shared_secret(&shared[..])?;
        let verification_phrase = verification_phrase(&shared[..], phrase_wordlist)?;

        Ok(EstablishedKeys {
            session_key,
            verification_phrase,
        })
    }
}

/// Perform a complete key exchange and return the results for both sides.
///
/// In production each side creates a `KeyExchangeState`, sends its public
/// hex and calls `complete()` with the peer's.
#[cfg(any(test, feature = "test-utils"))]
pub fn perform_key_exchange<S: AsRef<str>>(
    phrase_wordlist: &[S],
) -> Result<(EstablishedKeys, EstablishedKeys), CryptoError> {
    let a = KeyExchangeState::new();
    let b = KeyExchangeState::new();
    let a_pub = a.public_hex();
    let b_pub = b.public_hex();
    Ok((
        a.complete(&b_pub, phrase_wordlist)?,
        b.complete(&a_pub, phrase_wordlist)?,
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::derive_session_key;

    fn words() -> Vec<String> {
        (0..300).map(|i| format!("word{i}")).collect()
    }

    #[test]
    fn public_hex_is_uncompressed_point() {
        let kp = KeyPair::generate();
        let hex = kp.public_hex();
        assert_eq!(hex.len(), PUBLIC_KEY_LEN * 2);
        assert!(hex.starts_with("04"));
        assert_eq!(import_public_key(&hex).unwrap(), *kp.public_key());
    }

    #[test]
    fn dh_is_symmetric_and_keys_match() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();

        let ab = a.compute_shared_secret(b.public_key());
        let ba = b.compute_shared_secret(a.public_key());
        assert_eq!(*ab, *ba);

        let key_ab = derive_session_key(&ab[..]).unwrap();
        let key_ba = derive_session_key(&ba[..]).unwrap();
        assert_eq!(*key_ab, *key_ba);
    }

    #[test]
    fn key_exchange_produces_matching_sessions() {
        let (a, b) = perform_key_exchange(&words()).unwrap();
        assert_eq!(a.verification_phrase, b.verification_phrase);

        let encrypted = a.session_key.encrypt(b"over the relay").unwrap();
        assert_eq!(b.session_key.decrypt(&encrypted).unwrap(), b"over the relay");

        let reply = b.session_key.encrypt(b"reply").unwrap();
        assert_eq!(a.session_key.decrypt(&reply).unwrap(), b"reply");
    }

    #[test]
    fn separate_exchanges_do_not_share_keys() {
        let (a1, _) = perform_key_exchange(&words()).unwrap();
        let (a2, _) = perform_key_exchange(&words()).unwrap();

        let encrypted = a1.session_key.encrypt(b"secret").unwrap();
        assert!(a2.session_key.decrypt(&encrypted).is_err());
    }

    #[test]
    fn import_rejects_identity() {
        assert!(matches!(
            import_public_key("00"),
            Err(CryptoError::InvalidPeerKey(_))
        ));
    }

    #[test]
    fn import_rejects_point_off_curve() {
        let mut bytes = hex::decode(KeyPair::generate().public_hex()).unwrap();
        bytes[64] ^= 0x01;
        assert!(matches!(
            import_public_key(&hex::encode(bytes)),
            Err(CryptoError::InvalidPeerKey(_))
        ));
    }

    #[test]
    fn import_rejects_compressed_and_garbage() {
        let compressed = hex::encode(
            KeyPair::generate()
                .public_key()
                .to_encoded_point(true)
                .as_bytes(),
        );
        assert!(import_public_key(&compressed).is_err());
        assert!(import_public_key("not hex").is_err());
        assert!(import_public_key("").is_err());
    }

    #[test]
    fn complete_rejects_bad_peer_key() {
        let state = KeyExchangeState::new();
        let result = state.complete(&"04".repeat(PUBLIC_KEY_LEN), &words());
        assert!(matches!(result, Err(CryptoError::InvalidPeerKey(_))));
    }

    #[test]
    fn debug_redacts_secret() {
        let rendered = format!("{:?}", KeyPair::generate());
        assert!(rendered.contains("REDACTED"));
    }
}
