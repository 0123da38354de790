//! Error types for `ReverseQR` core library.

use thiserror::Error;

/// Result type alias using `ReverseQR` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `ReverseQR` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection code could not be decoded
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Wordlist table is missing or malformed
    #[error("Wordlist error: {0}")]
    Wordlist(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parity class of a code word.
///
/// Every byte has two words; the odd word is used for odd byte values and
/// the even word for even ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Odd,
    Even,
}

impl std::fmt::Display for Parity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Odd => f.write_str("odd"),
            Self::Even => f.write_str("even"),
        }
    }
}

/// Errors from decoding a spoken connection code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The word is not in the code wordlist (forgotten or mistyped).
    #[error("Unknown word at position {position}: \"{word}\". Word was forgotten or mistyped.")]
    UnknownWord { position: usize, word: String },

    /// The word exists but belongs to the other parity class.
    #[error("Invalid word at position {position}: \"{word}\" is for {expected} bytes.")]
    InvalidParity {
        position: usize,
        word: String,
        expected: Parity,
    },

    /// The value is not a valid hex connection code.
    #[error("Invalid connection code: {0}")]
    InvalidCode(String),
}
