//! Verification phrase shown to both users after key exchange.
//!
//! SHA-256 of the shared secret, first 6 bytes, read as three big-endian
//! `u16` chunks, each reduced modulo the wordlist length. The window is a
//! fixed protocol constant: peers that derive it differently will never
//! show matching phrases. It is a courtesy fingerprint, not a collision
//! resistant one.

use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Number of words in a verification phrase.
pub const PHRASE_WORDS: usize = 3;

/// Derive the verification phrase for a shared secret.
pub fn verification_phrase<S: AsRef<str>>(
    shared_secret: &[u8],
    wordlist: &[S],
) -> Result<String, CryptoError> {
    if wordlist.is_empty() {
        return Err(CryptoError::EmptyWordlist);
    }
    let hash = Sha256::digest(shared_secret);

    let words: Vec<&str> = hash[..PHRASE_WORDS * 2]
        .chunks_exact(2)
        .map(|chunk| {
            let index = usize::from(u16::from_be_bytes([chunk[0], chunk[1]])) % wordlist.len();
            wordlist[index].as_ref()
        })
        .collect();

    Ok(words.join(" "))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("w{i}")).collect()
    }

    #[test]
    fn phrase_has_three_words() {
        let phrase = verification_phrase(&[9u8; 32], &numbered(7776)).unwrap();
        assert_eq!(phrase.split(' ').count(), PHRASE_WORDS);
    }

    #[test]
    fn phrase_uses_first_six_hash_bytes() {
        let secret = b"shared";
        let hash = Sha256::digest(secret);
        let words = numbered(usize::from(u16::MAX) + 1);

        let expected: Vec<String> = (0..3)
            .map(|i| format!("w{}", u16::from_be_bytes([hash[i * 2], hash[i * 2 + 1]])))
            .collect();
        assert_eq!(
            verification_phrase(secret, &words).unwrap(),
            expected.join(" ")
        );
    }

    #[test]
    fn phrase_reduces_modulo_wordlist_length() {
        let secret = [1u8; 32];
        let hash = Sha256::digest(secret);
        let first = usize::from(u16::from_be_bytes([hash[0], hash[1]])) % 10;

        let phrase = verification_phrase(&secret, &numbered(10)).unwrap();
        assert!(phrase.starts_with(&format!("w{first} ")));
    }

    #[test]
    fn zero_secret_maps_to_known_words_in_a_7776_word_list() {
        // SHA-256 of 32 zero bytes starts 66 68 7a ad f8 62.
        assert_eq!(
            verification_phrase(&[0u8; 32], &numbered(7776)).unwrap(),
            "w2888 w301 w1378"
        );
    }

    #[test]
    fn phrase_is_deterministic() {
        let words = numbered(512);
        assert_eq!(
            verification_phrase(&[3u8; 32], &words).unwrap(),
            verification_phrase(&[3u8; 32], &words).unwrap()
        );
    }

    #[test]
    fn empty_wordlist_is_an_error() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            verification_phrase(&[0u8; 32], &empty),
            Err(CryptoError::EmptyWordlist)
        ));
    }
}
