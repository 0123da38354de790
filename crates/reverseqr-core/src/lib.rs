//! `ReverseQR` Core Library
//!
//! Shared functionality for `ReverseQR` components:
//! - Connection-code codec (hex code <-> spoken words)
//! - Wordlist tables for codes and verification phrases
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod code;
pub mod config;
pub mod error;
pub mod tracing_init;
pub mod wordlist;

pub use code::ConnectionCode;
pub use config::Config;
pub use error::{CodecError, Error, Parity, Result};
pub use wordlist::{CodeWordlist, PhraseWordlist};
