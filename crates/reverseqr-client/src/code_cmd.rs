//! `reverseqr words` and `reverseqr decode`.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use reverseqr_core::code::{decode, decode_with, encode_with};
use reverseqr_core::{CodeWordlist, ConnectionCode};

/// Resolve user input (hex or spoken words) to a connection code.
///
/// A single token is taken as a direct code entry and never needs a table.
/// Spoken input uses the configured table, or the bundled one; if the table
/// cannot be loaded the raw input is used as typed.
pub fn resolve_code(input: &str, table: Option<&Path>) -> Result<ConnectionCode> {
    let hex = match table {
        _ if is_single_token(input) => input.trim().to_uppercase(),
        Some(path) => match CodeWordlist::from_path(path) {
            Ok(wordlist) => decode_with(input, &wordlist)?,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Code wordlist unusable, using input as-is");
                input.trim().to_uppercase()
            }
        },
        None => decode(input)?,
    };
    ConnectionCode::parse(&hex).with_context(|| format!("\"{input}\" is not a connection code"))
}

fn is_single_token(input: &str) -> bool {
    input
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|t| !t.is_empty())
        .count()
        == 1
}

/// Spoken form of a hex code.
pub fn words(code: &str, table: Option<&Path>) -> Result<String> {
    let code = ConnectionCode::parse(code)?;
    let wordlist = CodeWordlist::load(table)?;
    Ok(encode_with(&code, &wordlist)?)
}

/// Hex code for spoken words.
pub fn decode_words(words: &[String], table: Option<&Path>) -> Result<String> {
    Ok(resolve_code(&words.join(" "), table)?.to_string())
}
