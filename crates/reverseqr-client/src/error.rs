//! Client error taxonomy.

use std::time::Duration;

use reverseqr_core::CodecError;
use reverseqr_crypto::CryptoError;

/// Top-level error for pairing, sending and receiving.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Key exchange failed: {0}")]
    KeyExchange(#[from] KeyExchangeError),

    #[error("Notification channel: {0}")]
    Signaling(#[from] SignalingError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Core(#[from] reverseqr_core::Error),
}

impl ClientError {
    /// Whether retrying the same operation later may succeed.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Signaling(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Failures while obtaining or using the peer's public key.
#[derive(Debug, thiserror::Error)]
pub enum KeyExchangeError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("No peer public key within {0:?}")]
    Timeout(Duration),

    #[error("A peer key waiter is already registered")]
    AlreadyWaiting,

    #[error("Peer key wait was cancelled")]
    Closed,
}

/// Notification channel failures.
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Subscription rejected: {0}")]
    Subscribe(String),

    #[error("Channel closed")]
    Closed,
}

impl SignalingError {
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Closed)
    }
}

/// Relay HTTP failures and local send-path rejections.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Rate limited by relay")]
    RateLimited,

    #[error("Session already has a connected peer")]
    AlreadyJoined,

    #[error("Relay error ({status}): {message}")]
    Http { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("File {name} is {size} bytes, relay limit is {limit}")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    #[error("Encryption failed: {0}")]
    Encryption(#[source] CryptoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unusable phrase wordlist: {0}")]
    Wordlist(#[source] reverseqr_core::Error),
}

impl TransportError {
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// Why a retrieved message could not be turned into plaintext.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct DecryptionError(pub String);

impl From<CryptoError> for DecryptionError {
    fn from(e: CryptoError) -> Self {
        Self(e.to_string())
    }
}
