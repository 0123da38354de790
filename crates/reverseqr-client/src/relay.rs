//! Relay HTTP API.
//!
//! The relay stores public keys and encrypted payloads and never sees key
//! material. `RelayApi` is the seam between the session logic and the wire;
//! `HttpRelay` talks to a real relay with reqwest, and the in-memory relay in
//! `testing` stands in for it in tests.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

use reverseqr_core::config::RelayConfig;
use reverseqr_core::{ConnectionCode, PhraseWordlist};
use reverseqr_crypto::HexEnvelope;

use crate::error::TransportError;
use crate::transport::EncryptedFile;

/// Default per-file limit when the relay does not publish one (5 GiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Which side of the session this client plays.
///
/// The initiator created the session and displays the code; the responder
/// (connector) joins with it. The relay names them by direction of the
/// first transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionRole {
    #[serde(rename = "receiver")]
    Initiator,
    #[serde(rename = "sender")]
    Responder,
}

impl SessionRole {
    pub const fn as_wire(self) -> &'static str {
        match self {
            Self::Initiator => "receiver",
            Self::Responder => "sender",
        }
    }

    pub const fn peer(self) -> Self {
        match self {
            Self::Initiator => Self::Responder,
            Self::Responder => Self::Initiator,
        }
    }
}

impl std::fmt::Display for SessionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Identifies a joined session towards the relay.
#[derive(Clone)]
pub struct SessionHandle {
    pub code: ConnectionCode,
    pub role: SessionRole,
    /// Notification channel token issued on join.
    pub token: String,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("code", &self.code)
            .field("role", &self.role)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Outcome of joining a session.
#[derive(Debug, Clone)]
pub struct Joined {
    /// Code as echoed by the relay.
    pub code: String,
    pub token: String,
    /// Present when the peer already registered its key.
    pub peer_public_key: Option<String>,
}

/// Server-published limits (`GET /api/config`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayLimits {
    pub max_file_size: u64,
    #[serde(default)]
    pub max_file_size_formatted: Option<String>,
}

impl Default for RelayLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_file_size_formatted: None,
        }
    }
}

/// One encrypted submission to `POST /api/message/send`.
#[derive(Debug, Clone)]
pub enum Submission {
    Text(HexEnvelope),
    Files(Vec<EncryptedFile>),
}

impl Submission {
    pub const fn message_type(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Files(_) => MessageKind::Files,
        }
    }
}

/// Message type tag used on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Files,
    #[default]
    #[serde(other)]
    Unknown,
}

impl MessageKind {
    pub const fn as_wire(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Files => "files",
            Self::Unknown => "unknown",
        }
    }
}

/// Identifier of a retrieved message. The relay uses the submission
/// timestamp, normally a number of milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Number(u64),
    Text(String),
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// A message as returned by `GET /api/message/retrieve/{code}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedMessage {
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciphertext: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<RetrievedFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<MessageId>,
}

fn non_empty(field: Option<&String>) -> Option<String> {
    field.filter(|s| !s.is_empty()).cloned()
}

impl RetrievedMessage {
    /// The text envelope, if all three fields are present and non-empty.
    pub fn text_envelope(&self) -> Option<HexEnvelope> {
        Some(HexEnvelope {
            ciphertext: non_empty(self.ciphertext.as_ref())?,
            iv: non_empty(self.iv.as_ref())?,
            auth_tag: non_empty(self.auth_tag.as_ref())?,
        })
    }
}

/// A file descriptor inside a retrieved `files` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedFile {
    /// Opaque blob name on the relay.
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_auth_tag: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
}

impl RetrievedFile {
    /// The encrypted name, if all three fields are present and non-empty.
    pub fn name_envelope(&self) -> Option<HexEnvelope> {
        Some(HexEnvelope {
            ciphertext: non_empty(self.encrypted_name.as_ref())?,
            iv: non_empty(self.name_iv.as_ref())?,
            auth_tag: non_empty(self.name_auth_tag.as_ref())?,
        })
    }
}

/// Relay operations used by the connector.
#[async_trait]
pub trait RelayApi: Send + Sync + 'static {
    /// Register our public key with the session.
    ///
    /// Fails with `AlreadyJoined` when our side of the session is taken.
    async fn join(
        &self,
        code: &ConnectionCode,
        role: SessionRole,
        public_key_hex: &str,
    ) -> Result<Joined, TransportError>;

    /// Upload one encrypted submission for the peer.
    async fn send(&self, session: &SessionHandle, submission: Submission)
    -> Result<(), TransportError>;

    /// Fetch all messages the peer has sent so far.
    async fn retrieve(&self, session: &SessionHandle)
    -> Result<Vec<RetrievedMessage>, TransportError>;

    /// Fetch server-published limits.
    async fn limits(&self) -> Result<RelayLimits, TransportError>;

    /// The word list the relay's own pages derive verification phrases from.
    async fn phrase_wordlist(&self) -> Result<PhraseWordlist, TransportError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinBody<'a> {
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    responder_dh_public_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    initiator_dh_public_key: Option<&'a str>,
}

impl<'a> JoinBody<'a> {
    const fn new(code: &'a str, role: SessionRole, public_key_hex: &'a str) -> Self {
        match role {
            SessionRole::Responder => Self {
                code,
                responder_dh_public_key: Some(public_key_hex),
                initiator_dh_public_key: None,
            },
            SessionRole::Initiator => Self {
                code,
                responder_dh_public_key: None,
                initiator_dh_public_key: Some(public_key_hex),
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinResponse {
    #[serde(default)]
    code: Option<String>,
    ws_token: String,
    #[serde(default)]
    initiator_public_key: Option<String>,
    #[serde(default)]
    responder_public_key: Option<String>,
}

impl JoinResponse {
    fn into_joined(self, requested: &ConnectionCode, role: SessionRole) -> Joined {
        let peer_public_key = match role {
            SessionRole::Responder => self.initiator_public_key,
            SessionRole::Initiator => self.responder_public_key,
        };
        Joined {
            code: self.code.unwrap_or_else(|| requested.to_string()),
            token: self.ws_token,
            peer_public_key: peer_public_key.filter(|k| !k.is_empty()),
        }
    }
}

#[derive(Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    messages: Vec<RetrievedMessage>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Relay client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRelay {
    http: reqwest::Client,
    base_url: String,
    /// `GET /eff_wordlist.json`, fetched on first use.
    phrase_words: OnceCell<PhraseWordlist>,
}

impl HttpRelay {
    pub fn new(config: &RelayConfig) -> Result<Self, TransportError> {
        // reqwest is built with rustls-no-provider. Err means a provider is
        // already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let base_url = config.url.trim_end_matches('/').to_string();
        Ok(Self {
            http,
            base_url,
            phrase_words: OnceCell::new(),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    /// Map non-success statuses to transport errors.
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = resp.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS => Err(TransportError::RateLimited),
            StatusCode::CONFLICT => Err(TransportError::AlreadyJoined),
            s if s.is_success() => Ok(resp),
            s => {
                let fallback = s.canonical_reason().unwrap_or("Unknown").to_string();
                let message = resp
                    .json::<ErrorBody>()
                    .await
                    .map_or(fallback, |body| body.error);
                Err(TransportError::Http {
                    status: s.as_u16(),
                    message,
                })
            }
        }
    }
}

/// Text fields sent alongside each file part. Names travel sealed, tag
/// appended, like the body.
fn file_fields(file: &EncryptedFile) -> [(&'static str, String); 3] {
    [
        ("fileIvs[]", file.body_iv.clone()),
        ("fileNames[]", file.name.clone()),
        ("fileNameIvs[]", file.name_iv.clone()),
    ]
}

/// Build the multipart form for a submission.
fn submission_form(code: &ConnectionCode, submission: Submission) -> Result<Form, TransportError> {
    let kind = submission.message_type();
    let form = Form::new()
        .text("code", code.to_string())
        .text("messageType", kind.as_wire());

    match submission {
        Submission::Text(envelope) => Ok(form
            .text("ciphertext", envelope.ciphertext)
            .text("iv", envelope.iv)
            .text("authTag", envelope.auth_tag)),
        Submission::Files(files) => {
            let mut form = form;
            for file in files {
                let fields = file_fields(&file);
                let part = Part::bytes(file.body)
                    .file_name(file.blob_name)
                    .mime_str("application/octet-stream")?;
                form = form.part("files", part);
                for (name, value) in fields {
                    form = form.text(name, value);
                }
            }
            Ok(form)
        }
    }
}

#[async_trait]
impl RelayApi for HttpRelay {
    async fn join(
        &self,
        code: &ConnectionCode,
        role: SessionRole,
        public_key_hex: &str,
    ) -> Result<Joined, TransportError> {
        let url = self.api_url("/session/join");
        let body = JoinBody::new(code.as_str(), role, public_key_hex);
        let resp = self.http.post(&url).json(&body).send().await?;
        let resp = Self::check_status(resp).await?;
        let joined: JoinResponse = resp.json().await?;
        Ok(joined.into_joined(code, role))
    }

    async fn send(
        &self,
        session: &SessionHandle,
        submission: Submission,
    ) -> Result<(), TransportError> {
        let url = self.api_url("/message/send");
        let form = submission_form(&session.code, submission)?;
        let resp = self.http.post(&url).multipart(form).send().await?;
        Self::check_status(resp).await?;
        Ok(())
    }

    async fn retrieve(
        &self,
        session: &SessionHandle,
    ) -> Result<Vec<RetrievedMessage>, TransportError> {
        let url = self.api_url(&format!("/message/retrieve/{}", session.code));
        let resp = self.http.get(&url).send().await?;
        let resp = Self::check_status(resp).await?;
        let body: RetrieveResponse = resp.json().await?;
        debug!(count = body.messages.len(), "Retrieved messages");
        Ok(body.messages)
    }

    async fn limits(&self) -> Result<RelayLimits, TransportError> {
        let url = self.api_url("/config");
        let resp = self.http.get(&url).send().await?;
        let resp = Self::check_status(resp).await?;
        Ok(resp.json().await?)
    }

    async fn phrase_wordlist(&self) -> Result<PhraseWordlist, TransportError> {
        let words = self
            .phrase_words
            .get_or_try_init(|| async {
                let url = format!("{}/eff_wordlist.json", self.base_url);
                let resp = self.http.get(&url).send().await?;
                let body = Self::check_status(resp).await?.text().await?;
                let words = PhraseWordlist::from_json(&body).map_err(TransportError::Wordlist)?;
                debug!(words = words.len(), "Fetched phrase wordlist");
                Ok::<_, TransportError>(words)
            })
            .await?;
        Ok(words.clone())
    }
}
