//! Session key for E2E payload encryption.
//!
//! Holds the AES-256-GCM cipher keyed with the HKDF output of the P-256 ECDH
//! shared secret. Every encryption draws a fresh random 96-bit nonce.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::error::CryptoError;

/// HKDF info string for session key derivation.
const HKDF_INFO: &[u8] = b"ReverseQR-Encryption-Key";

/// HKDF salt. ECDH output is already uniform, so an all-zero salt is used.
const HKDF_SALT: [u8; 32] = [0u8; 32];

/// Session key size in bytes (AES-256).
pub const KEY_SIZE: usize = 32;

/// Nonce size for AES-GCM.
pub const NONCE_SIZE: usize = 12;

/// Authentication tag size for AES-GCM.
pub const TAG_SIZE: usize = 16;

/// Encrypted payload with metadata needed for decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    /// AES-GCM ciphertext without the tag.
    pub ciphertext: Vec<u8>,
    /// 12-byte nonce used for this encryption.
    pub nonce: [u8; NONCE_SIZE],
    /// 16-byte authentication tag.
    pub tag: [u8; TAG_SIZE],
}

/// Hex form of [`EncryptedData`] as carried in relay JSON and form fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HexEnvelope {
    pub ciphertext: String,
    pub iv: String,
    pub auth_tag: String,
}

impl EncryptedData {
    pub fn to_hex(&self) -> HexEnvelope {
        HexEnvelope {
            ciphertext: hex::encode(&self.ciphertext),
            iv: hex::encode(self.nonce),
            auth_tag: hex::encode(self.tag),
        }
    }

    /// Parse hex fields. A missing or wrong-length nonce or tag is an error.
    pub fn from_hex(ciphertext: &str, iv: &str, auth_tag: &str) -> Result<Self, CryptoError> {
        let ciphertext = decode_field("ciphertext", ciphertext)?;
        let nonce = decode_field("iv", iv)?;
        let tag = decode_field("authTag", auth_tag)?;

        let nonce: [u8; NONCE_SIZE] =
            nonce
                .try_into()
                .map_err(|v: Vec<u8>| CryptoError::InvalidNonceLength {
                    expected: NONCE_SIZE,
                    actual: v.len(),
                })?;
        let tag: [u8; TAG_SIZE] =
            tag.try_into()
                .map_err(|v: Vec<u8>| CryptoError::InvalidTagLength {
                    expected: TAG_SIZE,
                    actual: v.len(),
                })?;

        Ok(Self {
            ciphertext,
            nonce,
            tag,
        })
    }

    /// Ciphertext with the tag appended, the form used for file blobs.
    pub fn to_sealed(&self) -> Vec<u8> {
        let mut sealed = Vec::with_capacity(self.ciphertext.len() + TAG_SIZE);
        sealed.extend_from_slice(&self.ciphertext);
        sealed.extend_from_slice(&self.tag);
        sealed
    }

    /// Split a sealed blob back into ciphertext and tag.
    pub fn from_sealed(mut sealed: Vec<u8>, iv: &str) -> Result<Self, CryptoError> {
        let nonce = decode_field("iv", iv)?;
        let nonce: [u8; NONCE_SIZE] =
            nonce
                .try_into()
                .map_err(|v: Vec<u8>| CryptoError::InvalidNonceLength {
                    expected: NONCE_SIZE,
                    actual: v.len(),
                })?;
        let split = sealed
            .len()
            .checked_sub(TAG_SIZE)
            .ok_or(CryptoError::InvalidTagLength {
                expected: TAG_SIZE,
                actual: sealed.len(),
            })?;
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&sealed[split..]);
        sealed.truncate(split);

        Ok(Self {
            ciphertext: sealed,
            nonce,
            tag,
        })
    }
}

impl TryFrom<&HexEnvelope> for EncryptedData {
    type Error = CryptoError;

    fn try_from(env: &HexEnvelope) -> Result<Self, Self::Error> {
        Self::from_hex(&env.ciphertext, &env.iv, &env.auth_tag)
    }
}

fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(value.trim()).map_err(|e| CryptoError::InvalidHex {
        field,
        reason: e.to_string(),
    })
}

/// Derive the 32-byte session key from an ECDH shared secret via HKDF-SHA256.
///
/// Both peers derive bit-identical keys from the same shared secret.
pub fn derive_session_key(shared_secret: &[u8]) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(&HKDF_SALT), shared_secret);
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    hk.expand(HKDF_INFO, &mut *key)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(key)
}

/// The symmetric key shared by both peers for the lifetime of a session.
///
/// Used for every payload and filename encryption. Never transmitted.
pub struct SessionKey {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl SessionKey {
    /// Create a session key from a raw ECDH shared secret (runs HKDF).
    pub fn from_shared_secret(shared_secret: &[u8]) -> Result<Self, CryptoError> {
        let key = derive_session_key(shared_secret)?;
        Ok(Self::from_key_bytes(&key))
    }

    /// Create a session key from already-derived key bytes.
    pub fn from_key_bytes(key_bytes: &[u8; KEY_SIZE]) -> Self {
        let mut material = *key_bytes;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&material));
        material.zeroize();
        Self { cipher }
    }

    /// Encrypt plaintext under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedData, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let mut sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let split = sealed
            .len()
            .checked_sub(TAG_SIZE)
            .ok_or_else(|| CryptoError::EncryptionFailed("sealed output shorter than tag".into()))?;
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&sealed[split..]);
        sealed.truncate(split);

        Ok(EncryptedData {
            ciphertext: sealed,
            nonce,
            tag,
        })
    }

    /// Decrypt and authenticate. Any tag mismatch is a hard failure.
    pub fn decrypt(&self, data: &EncryptedData) -> Result<Vec<u8>, CryptoError> {
        let sealed = data.to_sealed();
        self.cipher
            .decrypt(Nonce::from_slice(&data.nonce), sealed.as_slice())
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }

    /// Decrypt a hex envelope into UTF-8 text.
    pub fn decrypt_text(&self, envelope: &HexEnvelope) -> Result<String, CryptoError> {
        let data = EncryptedData::try_from(envelope)?;
        let plain = Zeroizing::new(self.decrypt(&data)?);
        String::from_utf8(plain.to_vec())
            .map_err(|e| CryptoError::DecryptionFailed(format!("plaintext is not UTF-8: {e}")))
    }
}

/// Create a matched pair of `SessionKey`s for testing.
#[cfg(any(test, feature = "test-utils"))]
pub fn test_session_pair() -> Result<(SessionKey, SessionKey), CryptoError> {
    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    let pair = (SessionKey::from_key_bytes(&key), SessionKey::from_key_bytes(&key));
    key.zeroize();
    Ok(pair)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn derive_session_key_is_deterministic() {
        let secret = [7u8; 32];
        let a = derive_session_key(&secret).unwrap();
        let b = derive_session_key(&secret).unwrap();
        assert_eq!(*a, *b);
        assert_ne!(*a, [0u8; KEY_SIZE]);
    }

    #[test]
    fn different_secrets_derive_different_keys() {
        let a = derive_session_key(&[1u8; 32]).unwrap();
        let b = derive_session_key(&[2u8; 32]).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let (sender, receiver) = test_session_pair().unwrap();
        let plaintext = b"Hello, encrypted world!";

        let encrypted = sender.encrypt(plaintext).unwrap();
        assert_eq!(encrypted.ciphertext.len(), plaintext.len());

        let decrypted = receiver.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn encrypt_empty_data() {
        let (sender, receiver) = test_session_pair().unwrap();
        let encrypted = sender.encrypt(b"").unwrap();
        assert!(encrypted.ciphertext.is_empty());
        assert!(receiver.decrypt(&encrypted).unwrap().is_empty());
    }

    #[test]
    fn flipping_any_ciphertext_bit_fails() {
        let (sender, receiver) = test_session_pair().unwrap();
        let encrypted = sender.encrypt(b"secret data").unwrap();

        for byte in 0..encrypted.ciphertext.len() {
            for bit in 0..8 {
                let mut tampered = encrypted.clone();
                tampered.ciphertext[byte] ^= 1 << bit;
                assert!(matches!(
                    receiver.decrypt(&tampered),
                    Err(CryptoError::DecryptionFailed(_))
                ));
            }
        }
    }

    #[test]
    fn flipping_any_tag_bit_fails() {
        let (sender, receiver) = test_session_pair().unwrap();
        let encrypted = sender.encrypt(b"secret data").unwrap();

        for byte in 0..TAG_SIZE {
            for bit in 0..8 {
                let mut tampered = encrypted.clone();
                tampered.tag[byte] ^= 1 << bit;
                assert!(receiver.decrypt(&tampered).is_err());
            }
        }
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let (sender, _) = test_session_pair().unwrap();
        let (_, stranger) = test_session_pair().unwrap();

        let encrypted = sender.encrypt(b"secret data").unwrap();
        assert!(matches!(
            stranger.decrypt(&encrypted),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn nonces_never_repeat() {
        let (session, _) = test_session_pair().unwrap();
        let mut nonces = std::collections::HashSet::new();

        for _ in 0..10_000 {
            let encrypted = session.encrypt(b"x").unwrap();
            assert!(nonces.insert(encrypted.nonce), "nonce collision detected");
        }
    }

    #[test]
    fn hex_envelope_roundtrip() {
        let (sender, receiver) = test_session_pair().unwrap();
        let envelope = sender.encrypt("héllo".as_bytes()).unwrap().to_hex();

        assert_eq!(envelope.iv.len(), NONCE_SIZE * 2);
        assert_eq!(envelope.auth_tag.len(), TAG_SIZE * 2);
        assert_eq!(receiver.decrypt_text(&envelope).unwrap(), "héllo");

        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("authTag").is_some());
    }

    #[test]
    fn missing_tag_is_rejected() {
        let (sender, receiver) = test_session_pair().unwrap();
        let mut envelope = sender.encrypt(b"data").unwrap().to_hex();
        envelope.auth_tag = String::new();

        assert!(matches!(
            receiver.decrypt_text(&envelope),
            Err(CryptoError::InvalidTagLength {
                expected: TAG_SIZE,
                actual: 0
            })
        ));
    }

    #[test]
    fn malformed_hex_is_rejected() {
        let (_, receiver) = test_session_pair().unwrap();
        let envelope = HexEnvelope {
            ciphertext: "zz".into(),
            iv: "00".repeat(NONCE_SIZE),
            auth_tag: "00".repeat(TAG_SIZE),
        };
        assert!(matches!(
            receiver.decrypt_text(&envelope),
            Err(CryptoError::InvalidHex {
                field: "ciphertext",
                ..
            })
        ));
    }

    #[test]
    fn short_nonce_is_rejected() {
        let result = EncryptedData::from_hex("00", "0011", &"00".repeat(TAG_SIZE));
        assert!(matches!(
            result,
            Err(CryptoError::InvalidNonceLength {
                expected: NONCE_SIZE,
                actual: 2
            })
        ));
    }

    #[test]
    fn from_shared_secret_produces_matching_keys() {
        let secret = [42u8; 32];
        let a = SessionKey::from_shared_secret(&secret).unwrap();
        let b = SessionKey::from_shared_secret(&secret).unwrap();

        let encrypted = a.encrypt(b"test").unwrap();
        assert_eq!(b.decrypt(&encrypted).unwrap(), b"test");
    }

    #[test]
    fn debug_redacts_key() {
        let (session, _) = test_session_pair().unwrap();
        assert!(format!("{session:?}").contains("REDACTED"));
    }

    #[test]
    fn sealed_blob_roundtrip() {
        let (a, b) = test_session_pair().unwrap();
        let encrypted = a.encrypt(&[7u8; 1000]).unwrap();
        let sealed = encrypted.to_sealed();
        assert_eq!(sealed.len(), 1000 + TAG_SIZE);

        let reopened = EncryptedData::from_sealed(sealed, &hex::encode(encrypted.nonce)).unwrap();
        assert_eq!(reopened, encrypted);
        assert_eq!(b.decrypt(&reopened).unwrap(), vec![7u8; 1000]);
    }

    #[test]
    fn sealed_blob_shorter_than_tag_is_rejected() {
        let result = EncryptedData::from_sealed(vec![0u8; 5], &"00".repeat(NONCE_SIZE));
        assert!(matches!(
            result,
            Err(CryptoError::InvalidTagLength {
                expected: TAG_SIZE,
                actual: 5
            })
        ));
    }
}
