//! In-memory relay for tests.
//!
//! Implements both the HTTP API and the notification channel so two
//! `SignalingClient`s can pair and exchange messages without a network.
//! Mirrors relay behaviour: 409 on a second join for the same role, a
//! `keys-available` push on subscribe when the peer joined first, and a
//! `message-available` push to the peer on every submission.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use reverseqr_core::{ConnectionCode, PhraseWordlist};
use reverseqr_crypto::TAG_SIZE;

use crate::error::{SignalingError, TransportError};
use crate::notify::{Notification, NotificationTransport};
use crate::relay::{
    Joined, MessageId, MessageKind, RelayApi, RelayLimits, RetrievedFile, RetrievedMessage,
    SessionHandle, SessionRole, Submission,
};
use crate::transport::EncryptedFile;

const FIRST_MESSAGE_ID: u64 = 1_700_000_000_000;

#[derive(Default)]
struct Slot {
    keys: HashMap<SessionRole, String>,
    tokens: HashMap<SessionRole, String>,
    subscribers: HashMap<SessionRole, Vec<mpsc::Sender<Notification>>>,
    /// Messages keyed by recipient role.
    mailboxes: HashMap<SessionRole, Vec<RetrievedMessage>>,
    blobs: HashMap<String, EncryptedFile>,
}

impl Slot {
    fn notify(&mut self, role: SessionRole, notification: &Notification) {
        if let Some(subs) = self.subscribers.get_mut(&role) {
            subs.retain(|tx| tx.try_send(notification.clone()).is_ok());
        }
    }

    fn authorize(&self, session: &SessionHandle) -> Result<(), TransportError> {
        if self.tokens.get(&session.role) == Some(&session.token) {
            Ok(())
        } else {
            Err(TransportError::Http {
                status: 403,
                message: "invalid session token".into(),
            })
        }
    }
}

/// Relay double shared by both peers of a test.
#[derive(Default)]
pub struct MemoryRelay {
    sessions: Mutex<HashMap<String, Slot>>,
    limits: RelayLimits,
    phrase_words: Option<PhraseWordlist>,
    rate_limited: AtomicBool,
    next_id: AtomicU64,
    next_token: AtomicU64,
    opens: AtomicU32,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: RelayLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Serve `words` as the relay's phrase wordlist. Without it the
    /// wordlist request answers 404.
    #[must_use]
    pub fn with_phrase_words(mut self, words: PhraseWordlist) -> Self {
        self.phrase_words = Some(words);
        self
    }

    /// Answer every HTTP call with 429 while set.
    pub fn set_rate_limited(&self, limited: bool) {
        self.rate_limited.store(limited, Ordering::SeqCst);
    }

    /// Number of notification channels opened so far.
    pub fn channel_opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Drop every open notification channel, as a relay restart would.
    pub async fn drop_channels(&self) {
        for slot in self.sessions.lock().await.values_mut() {
            slot.subscribers.clear();
        }
    }

    /// Place a raw message in a recipient's mailbox without notifying.
    pub async fn inject(&self, code: &ConnectionCode, to: SessionRole, message: RetrievedMessage) {
        self.sessions
            .lock()
            .await
            .entry(code.to_string())
            .or_default()
            .mailboxes
            .entry(to)
            .or_default()
            .push(message);
    }

    /// Push a notification to a role's open channels.
    pub async fn push(&self, code: &ConnectionCode, to: SessionRole, notification: Notification) {
        if let Some(slot) = self.sessions.lock().await.get_mut(code.as_str()) {
            slot.notify(to, &notification);
        }
    }

    /// An uploaded file blob by its opaque name.
    pub async fn blob(&self, code: &ConnectionCode, blob_name: &str) -> Option<EncryptedFile> {
        self.sessions
            .lock()
            .await
            .get(code.as_str())
            .and_then(|slot| slot.blobs.get(blob_name).cloned())
    }

    fn check_rate(&self) -> Result<(), TransportError> {
        if self.rate_limited.load(Ordering::SeqCst) {
            Err(TransportError::RateLimited)
        } else {
            Ok(())
        }
    }

    fn message_id(&self) -> MessageId {
        MessageId::Number(FIRST_MESSAGE_ID + self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

/// The descriptor a relay lists for an uploaded file. The sealed name from
/// `fileNames[]` is stored split, its trailing tag as `nameAuthTag`.
pub fn stored_file(file: &EncryptedFile) -> RetrievedFile {
    let split = file.name.len().saturating_sub(TAG_SIZE * 2);
    let (ciphertext, tag) = file.name.split_at(split);
    RetrievedFile {
        filename: file.blob_name.clone(),
        encrypted_name: Some(ciphertext.to_string()),
        name_iv: Some(file.name_iv.clone()),
        name_auth_tag: Some(tag.to_string()),
        size: file.body.len() as u64,
        original_name: None,
    }
}

#[async_trait]
impl RelayApi for MemoryRelay {
    async fn join(
        &self,
        code: &ConnectionCode,
        role: SessionRole,
        public_key_hex: &str,
    ) -> Result<Joined, TransportError> {
        self.check_rate()?;
        let mut sessions = self.sessions.lock().await;
        let slot = sessions.entry(code.to_string()).or_default();
        if slot.keys.contains_key(&role) {
            return Err(TransportError::AlreadyJoined);
        }

        let token = format!(
            "mem-{role}-{}",
            self.next_token.fetch_add(1, Ordering::SeqCst)
        );
        slot.keys.insert(role, public_key_hex.to_string());
        slot.tokens.insert(role, token.clone());
        slot.notify(
            role.peer(),
            &Notification::PeerKeyAvailable {
                peer_public_key: public_key_hex.to_string(),
            },
        );

        Ok(Joined {
            code: code.to_string(),
            token,
            peer_public_key: slot.keys.get(&role.peer()).cloned(),
        })
    }

    async fn send(
        &self,
        session: &SessionHandle,
        submission: Submission,
    ) -> Result<(), TransportError> {
        self.check_rate()?;
        let id = self.message_id();
        let mut sessions = self.sessions.lock().await;
        let slot = sessions
            .get_mut(session.code.as_str())
            .ok_or_else(|| TransportError::Http {
                status: 404,
                message: "session not found".into(),
            })?;
        slot.authorize(session)?;

        let message = match submission {
            Submission::Text(envelope) => RetrievedMessage {
                kind: MessageKind::Text,
                ciphertext: Some(envelope.ciphertext),
                iv: Some(envelope.iv),
                auth_tag: Some(envelope.auth_tag),
                files: Vec::new(),
                timestamp: Some(id),
            },
            Submission::Files(files) => {
                let stored = files.iter().map(stored_file).collect();
                for file in files {
                    slot.blobs.insert(file.blob_name.clone(), file);
                }
                RetrievedMessage {
                    kind: MessageKind::Files,
                    files: stored,
                    timestamp: Some(id),
                    ..Default::default()
                }
            }
        };

        let recipient = session.role.peer();
        slot.mailboxes.entry(recipient).or_default().push(message);
        slot.notify(recipient, &Notification::MessageAvailable);
        Ok(())
    }

    async fn retrieve(
        &self,
        session: &SessionHandle,
    ) -> Result<Vec<RetrievedMessage>, TransportError> {
        self.check_rate()?;
        let sessions = self.sessions.lock().await;
        let Some(slot) = sessions.get(session.code.as_str()) else {
            return Ok(Vec::new());
        };
        slot.authorize(session)?;
        Ok(slot
            .mailboxes
            .get(&session.role)
            .cloned()
            .unwrap_or_default())
    }

    async fn limits(&self) -> Result<RelayLimits, TransportError> {
        self.check_rate()?;
        Ok(self.limits.clone())
    }

    async fn phrase_wordlist(&self) -> Result<PhraseWordlist, TransportError> {
        self.check_rate()?;
        self.phrase_words.clone().ok_or_else(|| TransportError::Http {
            status: 404,
            message: "Not Found".into(),
        })
    }
}

#[async_trait]
impl NotificationTransport for MemoryRelay {
    async fn open(
        &self,
        session: &SessionHandle,
    ) -> Result<mpsc::Receiver<Notification>, SignalingError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let mut sessions = self.sessions.lock().await;
        let slot = sessions
            .get_mut(session.code.as_str())
            .ok_or_else(|| SignalingError::Subscribe("unknown session".into()))?;
        if slot.tokens.get(&session.role) != Some(&session.token) {
            return Err(SignalingError::Subscribe("invalid token".into()));
        }

        let (tx, rx) = mpsc::channel(32);
        if let Some(peer_key) = slot.keys.get(&session.role.peer()) {
            let _ = tx.try_send(Notification::KeysAvailable {
                peer_public_key: peer_key.clone(),
            });
        }
        slot.subscribers.entry(session.role).or_default().push(tx);
        Ok(rx)
    }
}
