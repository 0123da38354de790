//! Connection-code codec.
//!
//! A connection code is an uppercase hex string. For reading aloud it can be
//! spoken as one word per byte (RFC 1751 / PGP word list style): odd byte
//! values use the byte's odd word, even values its even word. Decoding
//! checks that each word's parity class agrees with the byte it names, which
//! catches most single-word transcription slips.

use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::error::{CodecError, Parity};
use crate::wordlist::CodeWordlist;

/// A session's connection code: non-empty uppercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionCode(String);

impl ConnectionCode {
    /// Validate and normalise a code (case-insensitive input).
    pub fn parse(raw: &str) -> Result<Self, CodecError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CodecError::InvalidCode("code is empty".into()));
        }
        if !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CodecError::InvalidCode(format!(
                "\"{trimmed}\" is not a hex code"
            )));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw bytes of the code. Fails for odd-length codes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        hex::decode(&self.0).map_err(|e| CodecError::InvalidCode(format!("{}: {e}", self.0)))
    }
}

impl fmt::Display for ConnectionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ConnectionCode {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

const fn parity_of(byte: u8) -> Parity {
    if byte % 2 == 1 { Parity::Odd } else { Parity::Even }
}

/// Speak a code as words, one per byte, separated by spaces.
pub fn encode_with(code: &ConnectionCode, wordlist: &CodeWordlist) -> Result<String, CodecError> {
    let words: Vec<String> = code
        .to_bytes()?
        .into_iter()
        .map(|byte| wordlist.word(byte, parity_of(byte)).to_lowercase())
        .collect();
    Ok(words.join(" "))
}

/// Speak a code using the bundled wordlist.
pub fn encode(code: &ConnectionCode) -> Result<String, CodecError> {
    let wordlist = CodeWordlist::bundled().map_err(|e| CodecError::InvalidCode(e.to_string()))?;
    encode_with(code, wordlist)
}

/// Decode user input into a hex code.
///
/// Input is case-insensitive and split on whitespace and hyphens. A single
/// token is returned uppercased as-is (direct code entry). Several tokens
/// are decoded as words, one byte each.
pub fn decode_with(input: &str, wordlist: &CodeWordlist) -> Result<String, CodecError> {
    let trimmed = input.trim().to_lowercase();
    let tokens: Vec<&str> = trimmed
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|t| !t.is_empty())
        .collect();

    match tokens.len() {
        0 => return Err(CodecError::InvalidCode("code is empty".into())),
        1 => return Ok(trimmed.to_uppercase()),
        _ => {}
    }

    let mut bytes = Vec::with_capacity(tokens.len());
    for (position, word) in tokens.into_iter().enumerate() {
        let (byte, listed_as) = wordlist.find(word).ok_or_else(|| CodecError::UnknownWord {
            position,
            word: word.to_string(),
        })?;
        if parity_of(byte) != listed_as {
            return Err(CodecError::InvalidParity {
                position,
                word: word.to_string(),
                expected: listed_as,
            });
        }
        bytes.push(byte);
    }

    Ok(hex::encode_upper(bytes))
}

/// Decode user input using the bundled wordlist.
///
/// If the wordlist cannot be loaded the raw input is returned uppercased;
/// only unknown-word and parity errors are reported to the caller.
pub fn decode(input: &str) -> Result<String, CodecError> {
    match CodeWordlist::bundled() {
        Ok(wordlist) => decode_with(input, wordlist),
        Err(e) => {
            warn!(error = %e, "Code wordlist unavailable, using input as-is");
            Ok(input.trim().to_uppercase())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn wordlist() -> &'static CodeWordlist {
        CodeWordlist::bundled().unwrap()
    }

    #[test]
    fn encode_known_code() {
        let code = ConnectionCode::parse("AB12CD34").unwrap();
        assert_eq!(encode(&code).unwrap(), "pegasus atlas sandalwood choking");
    }

    #[test]
    fn decode_words_back_to_code() {
        assert_eq!(
            decode("Pegasus atlas-SANDALWOOD  choking").unwrap(),
            "AB12CD34"
        );
    }

    #[test]
    fn roundtrip_every_byte_value() {
        let all: Vec<u8> = (0..=u8::MAX).collect();
        let code = ConnectionCode::parse(&hex::encode(&all)).unwrap();
        let words = encode_with(&code, wordlist()).unwrap();
        assert_eq!(decode_with(&words, wordlist()).unwrap(), code.as_str());
    }

    #[test]
    fn single_token_is_returned_uppercased() {
        assert_eq!(decode("ab12cd34").unwrap(), "AB12CD34");
        assert_eq!(decode("  pegasus ").unwrap(), "PEGASUS");
        assert!(matches!(
            decode("not-hex-at-all"),
            Err(CodecError::UnknownWord { position: 0, .. })
        ));
    }

    #[test]
    fn unknown_word_reports_position() {
        let err = decode("pegasus atlas zzzzzz choking").unwrap_err();
        assert_eq!(
            err,
            CodecError::UnknownWord {
                position: 2,
                word: "zzzzzz".into()
            }
        );
    }

    #[test]
    fn parity_mismatch_is_rejected() {
        // The odd word listed for 0xAA names an even byte.
        let odd_word_for_even_byte = wordlist().word(0xAA, Parity::Odd).to_lowercase();
        let input = format!("pegasus {odd_word_for_even_byte}");
        let err = decode_with(&input, wordlist()).unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidParity {
                position: 1,
                word: odd_word_for_even_byte,
                expected: Parity::Odd,
            }
        );
    }

    #[test]
    fn even_word_for_odd_byte_is_rejected() {
        let even_word_for_odd_byte = wordlist().word(0x01, Parity::Even).to_lowercase();
        let input = format!("{even_word_for_odd_byte} atlas");
        assert!(matches!(
            decode_with(&input, wordlist()),
            Err(CodecError::InvalidParity { position: 0, .. })
        ));
    }

    #[test]
    fn empty_input_is_invalid() {
        assert!(matches!(decode("   "), Err(CodecError::InvalidCode(_))));
        assert!(matches!(decode(" - - "), Err(CodecError::InvalidCode(_))));
    }

    #[test]
    fn connection_code_normalises_case() {
        let code: ConnectionCode = " ab12cd34 ".parse().unwrap();
        assert_eq!(code.as_str(), "AB12CD34");
        assert_eq!(code.to_string(), "AB12CD34");
        assert_eq!(code.to_bytes().unwrap(), vec![0xAB, 0x12, 0xCD, 0x34]);
    }

    #[test]
    fn connection_code_rejects_non_hex() {
        assert!(ConnectionCode::parse("XYZ").is_err());
        assert!(ConnectionCode::parse("").is_err());
    }

    #[test]
    fn odd_length_code_cannot_be_spoken() {
        let code = ConnectionCode::parse("ABC").unwrap();
        assert!(matches!(
            encode_with(&code, wordlist()),
            Err(CodecError::InvalidCode(_))
        ));
    }
}
