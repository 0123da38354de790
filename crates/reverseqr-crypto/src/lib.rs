//! `ReverseQR` E2E Encryption Library
//!
//! Provides the cryptographic primitives for pairing two devices through an
//! untrusted relay, with the relay unable to see any payload or filename.
//!
//! ## Crypto primitives
//!
//! - **Key exchange**: P-256 ephemeral ECDH per session → HKDF-SHA256 → 256-bit key
//! - **Encryption**: AES-256-GCM AEAD, fresh random 96-bit nonce per call
//! - **Verification**: 3-word phrase from SHA-256 of the shared secret

pub mod error;
pub mod exchange;
pub mod phrase;
pub mod session;

pub use error::CryptoError;
#[cfg(any(test, feature = "test-utils"))]
pub use exchange::perform_key_exchange;
pub use exchange::{
    EstablishedKeys, KeyExchangeState, KeyPair, PUBLIC_KEY_LEN, export_public_key,
    import_public_key,
};
pub use phrase::{PHRASE_WORDS, verification_phrase};
#[cfg(any(test, feature = "test-utils"))]
pub use session::test_session_pair;
pub use session::{EncryptedData, HexEnvelope, KEY_SIZE, NONCE_SIZE, SessionKey, TAG_SIZE};
