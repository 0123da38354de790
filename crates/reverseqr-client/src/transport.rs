//! Send path.
//!
//! Every payload is sealed under the session key before it leaves the
//! process. Files are encrypted twice with independent nonces: once for the
//! body, once for the name. The relay only ever sees an opaque blob name.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use tracing::info;

use reverseqr_crypto::{CryptoError, EncryptedData, HexEnvelope, SessionKey};

use crate::error::{ClientError, TransportError};
use crate::relay::{RelayApi, RelayLimits, Submission};
use crate::signaling::SessionContext;

const BLOB_SUFFIX_LEN: usize = 9;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// A file queued for sending.
#[derive(Clone)]
pub struct OutgoingFile {
    pub name: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for OutgoingFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingFile")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .finish()
    }
}

impl OutgoingFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Read a file from disk, named after its final path component.
    pub async fn read(path: &Path) -> Result<Self, TransportError> {
        let data = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Ok(Self { name, data })
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// One user submission: optional text plus any number of files.
#[derive(Debug, Clone, Default)]
pub struct Outgoing {
    pub text: Option<String>,
    pub files: Vec<OutgoingFile>,
}

impl Outgoing {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            files: Vec::new(),
        }
    }

    pub fn files(files: Vec<OutgoingFile>) -> Self {
        Self { text: None, files }
    }

    pub fn is_empty(&self) -> bool {
        self.text.as_deref().is_none_or(|t| t.trim().is_empty()) && self.files.is_empty()
    }
}

/// An encrypted file ready for upload.
#[derive(Debug, Clone)]
pub struct EncryptedFile {
    /// Opaque name the relay stores the blob under.
    pub blob_name: String,
    /// Body ciphertext with its tag appended.
    pub body: Vec<u8>,
    pub body_iv: String,
    /// Hex of the name ciphertext with its tag appended.
    pub name: String,
    pub name_iv: String,
}

impl EncryptedFile {
    /// Recover the original name and content.
    pub fn open(&self, key: &SessionKey) -> Result<(String, Vec<u8>), CryptoError> {
        let sealed_name = hex::decode(&self.name).map_err(|e| CryptoError::InvalidHex {
            field: "fileNames[]",
            reason: e.to_string(),
        })?;
        let name = key.decrypt_text(&EncryptedData::from_sealed(sealed_name, &self.name_iv)?.to_hex())?;
        let body = EncryptedData::from_sealed(self.body.clone(), &self.body_iv)?;
        Ok((name, key.decrypt(&body)?))
    }
}

/// What was sent, kept on the session for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentContent {
    Text(String),
    Files(Vec<SentFile>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFile {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct SentRecord {
    pub content: SentContent,
    pub sent_at: SystemTime,
}

/// Opaque relay-side blob name: `encrypted_<unix-millis>_<9 base36 chars>`.
pub fn blob_name() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    let mut rng = rand::thread_rng();
    let suffix: String = (0..BLOB_SUFFIX_LEN)
        .map(|_| char::from(BASE36[rng.gen_range(0..BASE36.len())]))
        .collect();
    format!("encrypted_{millis}_{suffix}")
}

pub fn encrypt_text(key: &SessionKey, text: &str) -> Result<HexEnvelope, TransportError> {
    key.encrypt(text.as_bytes())
        .map(|data| data.to_hex())
        .map_err(TransportError::Encryption)
}

/// Encrypt name and body of one file. Either both succeed or nothing is
/// produced for the file.
pub fn encrypt_file(key: &SessionKey, file: &OutgoingFile) -> Result<EncryptedFile, TransportError> {
    let name = key
        .encrypt(file.name.as_bytes())
        .map_err(TransportError::Encryption)?;
    let body = key.encrypt(&file.data).map_err(TransportError::Encryption)?;
    Ok(EncryptedFile {
        blob_name: blob_name(),
        body_iv: hex::encode(body.nonce),
        body: body.to_sealed(),
        name: hex::encode(name.to_sealed()),
        name_iv: hex::encode(name.nonce),
    })
}

/// Reject files over the relay's limit before spending time encrypting them.
pub fn check_sizes(files: &[OutgoingFile], limits: &RelayLimits) -> Result<(), TransportError> {
    match files.iter().find(|f| f.size() > limits.max_file_size) {
        Some(file) => Err(TransportError::FileTooLarge {
            name: file.name.clone(),
            size: file.size(),
            limit: limits.max_file_size,
        }),
        None => Ok(()),
    }
}

/// Encrypt and send a submission for an established session.
///
/// Text and files go out as separate relay submissions, text first. File
/// sizes are checked before anything is sent, and a file that fails to
/// encrypt aborts the whole file batch.
pub async fn send<R: RelayApi + ?Sized>(
    relay: &R,
    ctx: &mut SessionContext,
    outgoing: Outgoing,
) -> Result<(), ClientError> {
    if outgoing.is_empty() {
        return Err(ClientError::InvalidState(
            "nothing to send: enter a message or select files".into(),
        ));
    }
    ctx.ensure_established()?;
    let handle = ctx.handle()?;
    check_sizes(&outgoing.files, ctx.limits())?;

    let Outgoing { text, files } = outgoing;
    let text = text.filter(|t| !t.is_empty());

    if let Some(text) = text {
        let envelope = encrypt_text(ctx.session_key()?, &text)?;
        relay.send(&handle, Submission::Text(envelope)).await?;
        info!(code = %handle.code, kind = "text", "Message sent");
        ctx.record_sent(SentContent::Text(text));
    }

    if !files.is_empty() {
        let key = ctx.session_key()?;
        let encrypted = files
            .iter()
            .map(|f| encrypt_file(key, f))
            .collect::<Result<Vec<_>, _>>()?;
        let summary: Vec<SentFile> = files
            .into_iter()
            .map(|f| SentFile {
                size: f.size(),
                name: f.name,
            })
            .collect();

        relay.send(&handle, Submission::Files(encrypted)).await?;
        info!(code = %handle.code, kind = "files", count = summary.len(), "Message sent");
        ctx.record_sent(SentContent::Files(summary));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use reverseqr_crypto::test_session_pair;

    #[test]
    fn blob_name_is_opaque() {
        let name = blob_name();
        let mut parts = name.splitn(3, '_');
        assert_eq!(parts.next(), Some("encrypted"));
        assert!(parts.next().unwrap().chars().all(|c| c.is_ascii_digit()));
        let suffix = parts.next().unwrap();
        assert_eq!(suffix.len(), BLOB_SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn file_roundtrip_recovers_name_and_bytes() {
        let (ours, theirs) = test_session_pair().unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let file = OutgoingFile::new("report.pdf", data.clone());

        let encrypted = encrypt_file(&ours, &file).unwrap();
        assert!(!encrypted.blob_name.contains("report"));
        let (name, body) = encrypted.open(&theirs).unwrap();
        assert_eq!(name, "report.pdf");
        assert_eq!(body, data);
    }

    #[test]
    fn name_and_body_use_independent_nonces() {
        let (key, _) = test_session_pair().unwrap();
        let encrypted = encrypt_file(&key, &OutgoingFile::new("a.txt", b"hello".to_vec())).unwrap();
        assert_ne!(encrypted.name_iv, encrypted.body_iv);
    }

    #[test]
    fn tampered_body_fails_to_open() {
        let (ours, theirs) = test_session_pair().unwrap();
        let mut encrypted = encrypt_file(&ours, &OutgoingFile::new("a.txt", b"hello".to_vec())).unwrap();
        encrypted.body[0] ^= 0x80;
        assert!(encrypted.open(&theirs).is_err());
    }

    #[test]
    fn text_envelope_decrypts_on_peer() {
        let (ours, theirs) = test_session_pair().unwrap();
        let envelope = encrypt_text(&ours, "Hello").unwrap();
        assert_eq!(theirs.decrypt_text(&envelope).unwrap(), "Hello");
    }

    #[test]
    fn oversized_file_is_rejected_with_details() {
        let limits = RelayLimits {
            max_file_size: 4,
            max_file_size_formatted: None,
        };
        let files = vec![
            OutgoingFile::new("small", vec![0; 4]),
            OutgoingFile::new("big.bin", vec![0; 5]),
        ];
        match check_sizes(&files, &limits) {
            Err(TransportError::FileTooLarge { name, size, limit }) => {
                assert_eq!((name.as_str(), size, limit), ("big.bin", 5, 4));
            }
            other => panic!("expected FileTooLarge, got {other:?}"),
        }
        assert!(check_sizes(&files[..1], &limits).is_ok());
    }

    #[test]
    fn blank_submission_is_empty() {
        assert!(Outgoing::default().is_empty());
        assert!(Outgoing::text("   ").is_empty());
        assert!(!Outgoing::text("hi").is_empty());
        assert!(!Outgoing::files(vec![OutgoingFile::new("a", Vec::new())]).is_empty());
    }

    #[tokio::test]
    async fn read_names_file_after_last_component() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"contents").unwrap();

        let file = OutgoingFile::read(&path).await.unwrap();
        assert_eq!(file.name, "notes.txt");
        assert_eq!(file.data, b"contents");
        assert_eq!(file.size(), 8);
    }
}
