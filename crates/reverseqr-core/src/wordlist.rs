//! Wordlist tables for the spoken connection code and the verification phrase.
//!
//! Two tables are used:
//! - the code table maps every byte value to an `[odd, even]` word pair
//!   (PGP word list layout, optionally wrapped as `{"pgp_wordlist": {...}}`)
//! - the phrase table is a flat list of words (optionally wrapped as
//!   `{"eff_wordlist": [...]}`)
//!
//! Bundled tables are compiled in and parsed on first use, then cached for
//! the lifetime of the process. A replacement table can be loaded from disk.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::OnceLock;

use serde::Deserialize;

use crate::error::{Error, Parity, Result};

const BUNDLED_CODE_TABLE: &str = include_str!("../data/pgp-wordlist.json");
const BUNDLED_PHRASE_TABLE: &str = include_str!("../data/phrase-wordlist.json");

static CODE_WORDLIST: OnceLock<std::result::Result<CodeWordlist, String>> = OnceLock::new();
static PHRASE_WORDLIST: OnceLock<std::result::Result<PhraseWordlist, String>> = OnceLock::new();

#[derive(Deserialize)]
#[serde(untagged)]
enum CodeTableFile {
    Wrapped {
        pgp_wordlist: BTreeMap<String, Vec<String>>,
    },
    Bare(BTreeMap<String, Vec<String>>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PhraseTableFile {
    Wrapped { eff_wordlist: Vec<String> },
    Bare(Vec<String>),
}

/// Byte to word-pair table used to speak a connection code.
#[derive(Debug, Clone)]
pub struct CodeWordlist {
    /// `[odd, even]` words, indexed by byte value.
    pairs: Vec<[String; 2]>,
    /// Lowercased word to (byte, parity class it was listed under).
    lookup: HashMap<String, (u8, Parity)>,
}

impl CodeWordlist {
    /// The bundled table, parsed once per process.
    pub fn bundled() -> Result<&'static Self> {
        CODE_WORDLIST
            .get_or_init(|| Self::from_json(BUNDLED_CODE_TABLE).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| Error::Wordlist(e.clone()))
    }

    /// The configured table if a path is given, the bundled one otherwise.
    pub fn load(path: Option<&Path>) -> Result<Cow<'static, Self>> {
        match path {
            Some(path) => Self::from_path(path).map(Cow::Owned),
            None => Self::bundled().map(Cow::Borrowed),
        }
    }

    /// Load a table from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Wordlist(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Parse a table from JSON text.
    ///
    /// Every byte value `00`..`FF` must be present with exactly two words,
    /// and no word may appear twice.
    pub fn from_json(json: &str) -> Result<Self> {
        let entries = match serde_json::from_str::<CodeTableFile>(json)? {
            CodeTableFile::Wrapped { pgp_wordlist } => pgp_wordlist,
            CodeTableFile::Bare(map) => map,
        };

        let mut slots: Vec<Option<[String; 2]>> = vec![None; 256];
        for (hex_byte, words) in entries {
            let byte = u8::from_str_radix(&hex_byte, 16).map_err(|_| {
                Error::Wordlist(format!("Invalid wordlist key \"{hex_byte}\""))
            })?;
            let [odd, even]: [String; 2] = words.try_into().map_err(|_| {
                Error::Wordlist(format!("Invalid wordlist entry for {hex_byte}"))
            })?;
            slots[usize::from(byte)] = Some([odd, even]);
        }

        let mut pairs = Vec::with_capacity(256);
        let mut lookup = HashMap::with_capacity(512);
        for (byte, slot) in (0..=u8::MAX).zip(slots) {
            let pair = slot.ok_or_else(|| {
                Error::Wordlist(format!("Missing wordlist entry for {byte:02X}"))
            })?;
            for (word, parity) in [(&pair[0], Parity::Odd), (&pair[1], Parity::Even)] {
                if lookup.insert(word.to_lowercase(), (byte, parity)).is_some() {
                    return Err(Error::Wordlist(format!("Duplicate word \"{word}\"")));
                }
            }
            pairs.push(pair);
        }

        Ok(Self { pairs, lookup })
    }

    /// Word for `byte` under the given parity class.
    pub fn word(&self, byte: u8, parity: Parity) -> &str {
        let pair = &self.pairs[usize::from(byte)];
        match parity {
            Parity::Odd => &pair[0],
            Parity::Even => &pair[1],
        }
    }

    /// Find the byte and parity class a (lowercase) word is listed under.
    pub fn find(&self, word: &str) -> Option<(u8, Parity)> {
        self.lookup.get(word).copied()
    }
}

/// Flat word list used for the verification phrase.
#[derive(Debug, Clone)]
pub struct PhraseWordlist {
    words: Vec<String>,
}

impl PhraseWordlist {
    /// The bundled table, parsed once per process.
    pub fn bundled() -> Result<&'static Self> {
        PHRASE_WORDLIST
            .get_or_init(|| Self::from_json(BUNDLED_PHRASE_TABLE).map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| Error::Wordlist(e.clone()))
    }

    pub fn load(path: Option<&Path>) -> Result<Cow<'static, Self>> {
        match path {
            Some(path) => Self::from_path(path).map(Cow::Owned),
            None => Self::bundled().map(Cow::Borrowed),
        }
    }

    /// Load a table from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Wordlist(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Parse a table from JSON text. The list must not be empty.
    pub fn from_json(json: &str) -> Result<Self> {
        let words = match serde_json::from_str::<PhraseTableFile>(json)? {
            PhraseTableFile::Wrapped { eff_wordlist } => eff_wordlist,
            PhraseTableFile::Bare(words) => words,
        };
        if words.is_empty() {
            return Err(Error::Wordlist("Phrase wordlist is empty".into()));
        }
        Ok(Self { words })
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}
