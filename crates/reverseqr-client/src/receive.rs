//! Receive pipeline: fetch, deduplicate, decrypt.
//!
//! Each message is decrypted on its own. A message that fails to decrypt
//! becomes an `Undecryptable` record and never affects the rest of its
//! batch. Identifiers are recorded before decryption, so a message is
//! processed at most once per session whatever its outcome.

use std::collections::HashSet;

use tracing::{debug, info};

use reverseqr_crypto::SessionKey;

use crate::error::{ClientError, DecryptionError};
use crate::relay::{MessageId, MessageKind, RelayApi, RetrievedFile, RetrievedMessage};
use crate::signaling::SessionContext;

/// Shown in place of a filename that fails to decrypt.
pub const UNDECRYPTABLE_NAME: &str = "[Unable to decrypt]";

/// Decrypted content of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceivedContent {
    Text(String),
    Files(Vec<ReceivedFile>),
    Undecryptable(DecryptionError),
}

/// A received file, reported by its decrypted name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub name: String,
    /// Opaque blob name on the relay.
    pub blob: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessageRecord {
    pub id: MessageId,
    pub kind: MessageKind,
    pub content: ReceivedContent,
}

/// Seen identifiers and display history for one session.
#[derive(Debug, Default)]
pub struct ReceiveLog {
    seen: HashSet<MessageId>,
    history: Vec<ReceivedMessageRecord>,
}

impl ReceiveLog {
    /// Keep only messages not seen before and mark them seen.
    ///
    /// Messages without an identifier cannot be deduplicated and are
    /// skipped. Duplicates within the batch collapse to the first.
    pub fn filter_new(&mut self, batch: Vec<RetrievedMessage>) -> Vec<(MessageId, RetrievedMessage)> {
        batch
            .into_iter()
            .filter_map(|msg| {
                let Some(id) = msg.timestamp.clone() else {
                    debug!(kind = msg.kind.as_wire(), "Skipping message without identifier");
                    return None;
                };
                self.seen.insert(id.clone()).then_some((id, msg))
            })
            .collect()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    pub fn history(&self) -> &[ReceivedMessageRecord] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

fn file_name(key: &SessionKey, file: &RetrievedFile) -> String {
    match file.name_envelope() {
        Some(envelope) => key
            .decrypt_text(&envelope)
            .unwrap_or_else(|_| UNDECRYPTABLE_NAME.to_string()),
        None => file
            .original_name
            .clone()
            .unwrap_or_else(|| file.filename.clone()),
    }
}

/// Decrypt one retrieved message. Never fails; problems become
/// `Undecryptable`.
pub fn decrypt_message(key: &SessionKey, id: MessageId, msg: &RetrievedMessage) -> ReceivedMessageRecord {
    let content = match msg.kind {
        MessageKind::Text => match msg.text_envelope() {
            Some(envelope) => key
                .decrypt_text(&envelope)
                .map_or_else(|e| ReceivedContent::Undecryptable(e.into()), ReceivedContent::Text),
            None => ReceivedContent::Undecryptable(DecryptionError(
                "text message is missing ciphertext, iv or authTag".into(),
            )),
        },
        MessageKind::Files => ReceivedContent::Files(
            msg.files
                .iter()
                .map(|f| ReceivedFile {
                    name: file_name(key, f),
                    blob: f.filename.clone(),
                    size: f.size,
                })
                .collect(),
        ),
        MessageKind::Unknown => {
            ReceivedContent::Undecryptable(DecryptionError("unsupported message type".into()))
        }
    };
    ReceivedMessageRecord {
        id,
        kind: msg.kind,
        content,
    }
}

/// Deduplicate and decrypt a batch, appending new records to the log.
pub fn process_batch(
    key: &SessionKey,
    log: &mut ReceiveLog,
    batch: Vec<RetrievedMessage>,
) -> Vec<ReceivedMessageRecord> {
    let records: Vec<ReceivedMessageRecord> = log
        .filter_new(batch)
        .into_iter()
        .map(|(id, msg)| decrypt_message(key, id, &msg))
        .collect();
    log.history.extend(records.iter().cloned());
    records
}

/// Pull the session's messages from the relay and return the new ones.
pub async fn fetch_new<R: RelayApi + ?Sized>(
    relay: &R,
    ctx: &mut SessionContext,
) -> Result<Vec<ReceivedMessageRecord>, ClientError> {
    ctx.ensure_established()?;
    let handle = ctx.handle()?;
    let batch = relay.retrieve(&handle).await?;

    let (key, log) = ctx.receive_parts()?;
    let records = process_batch(key, log, batch);
    if !records.is_empty() {
        let undecryptable = records
            .iter()
            .filter(|r| matches!(r.content, ReceivedContent::Undecryptable(_)))
            .count();
        info!(code = %handle.code, count = records.len(), undecryptable, "Received new messages");
    }
    Ok(records)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::testing::stored_file;
    use crate::transport::{OutgoingFile, encrypt_file, encrypt_text};
    use reverseqr_crypto::test_session_pair;

    fn text_message(key: &SessionKey, text: &str, ts: u64) -> RetrievedMessage {
        let envelope = encrypt_text(key, text).unwrap();
        RetrievedMessage {
            kind: MessageKind::Text,
            ciphertext: Some(envelope.ciphertext),
            iv: Some(envelope.iv),
            auth_tag: Some(envelope.auth_tag),
            files: Vec::new(),
            timestamp: Some(MessageId::Number(ts)),
        }
    }

    #[test]
    fn only_new_messages_pass_the_filter() {
        let (key, _) = test_session_pair().unwrap();
        let mut log = ReceiveLog::default();

        let first = vec![text_message(&key, "a", 1), text_message(&key, "b", 2)];
        assert_eq!(log.filter_new(first).len(), 2);

        let second = vec![
            text_message(&key, "a", 1),
            text_message(&key, "b", 2),
            text_message(&key, "c", 3),
        ];
        let fresh = log.filter_new(second);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].0, MessageId::Number(3));
        assert!(log.contains(&MessageId::Number(1)));
    }

    #[test]
    fn processing_same_batch_twice_is_idempotent() {
        let (ours, theirs) = test_session_pair().unwrap();
        let batch = vec![text_message(&ours, "hello", 10), text_message(&ours, "again", 11)];
        let mut log = ReceiveLog::default();

        let first = process_batch(&theirs, &mut log, batch.clone());
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].content, ReceivedContent::Text("hello".into()));

        assert!(process_batch(&theirs, &mut log, batch).is_empty());
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn messages_without_identifier_are_skipped() {
        let (key, _) = test_session_pair().unwrap();
        let mut msg = text_message(&key, "x", 1);
        msg.timestamp = None;
        let mut log = ReceiveLog::default();
        assert!(log.filter_new(vec![msg]).is_empty());
        assert!(log.is_empty());
    }

    #[test]
    fn bad_message_does_not_block_batch() {
        let (ours, theirs) = test_session_pair().unwrap();
        let mut tampered = text_message(&ours, "tampered", 1);
        let mut ct = hex::decode(tampered.ciphertext.as_deref().unwrap()).unwrap();
        ct[0] ^= 1;
        tampered.ciphertext = Some(hex::encode(ct));

        let mut tagless = text_message(&ours, "no tag", 2);
        tagless.auth_tag = None;

        let batch = vec![tampered, tagless, text_message(&ours, "fine", 3)];
        let records = process_batch(&theirs, &mut ReceiveLog::default(), batch);

        assert_eq!(records.len(), 3);
        assert!(matches!(records[0].content, ReceivedContent::Undecryptable(_)));
        assert!(matches!(records[1].content, ReceivedContent::Undecryptable(_)));
        assert_eq!(records[2].content, ReceivedContent::Text("fine".into()));
    }

    #[test]
    fn undecryptable_message_is_not_retried() {
        let (ours, _) = test_session_pair().unwrap();
        let (stranger, _) = test_session_pair().unwrap();
        let batch = vec![text_message(&ours, "for someone else", 5)];
        let mut log = ReceiveLog::default();

        assert_eq!(process_batch(&stranger, &mut log, batch.clone()).len(), 1);
        assert!(process_batch(&stranger, &mut log, batch).is_empty());
    }

    #[test]
    fn file_names_are_decrypted() {
        let (ours, theirs) = test_session_pair().unwrap();
        let encrypted = encrypt_file(&ours, &OutgoingFile::new("photo.jpg", vec![1, 2, 3])).unwrap();
        let msg = RetrievedMessage {
            kind: MessageKind::Files,
            files: vec![stored_file(&encrypted)],
            timestamp: Some(MessageId::Number(1)),
            ..Default::default()
        };

        let record = decrypt_message(&theirs, MessageId::Number(1), &msg);
        let ReceivedContent::Files(files) = record.content else {
            panic!("expected files");
        };
        assert_eq!(files[0].name, "photo.jpg");
        assert_eq!(files[0].blob, encrypted.blob_name);
        assert_eq!(files[0].size, 19);
    }

    #[test]
    fn file_name_fallbacks() {
        let (key, _) = test_session_pair().unwrap();
        let plain = RetrievedFile {
            filename: "encrypted_1_abc".into(),
            original_name: Some("legacy.txt".into()),
            ..Default::default()
        };
        assert_eq!(file_name(&key, &plain), "legacy.txt");

        let bare = RetrievedFile {
            filename: "encrypted_1_abc".into(),
            ..Default::default()
        };
        assert_eq!(file_name(&key, &bare), "encrypted_1_abc");

        let garbled = RetrievedFile {
            filename: "encrypted_1_abc".into(),
            encrypted_name: Some("zz".into()),
            name_iv: Some("00".repeat(12)),
            name_auth_tag: Some("00".repeat(16)),
            ..Default::default()
        };
        assert_eq!(file_name(&key, &garbled), UNDECRYPTABLE_NAME);

        let blank = RetrievedFile {
            filename: "encrypted_1_abc".into(),
            encrypted_name: Some(String::new()),
            name_iv: Some(String::new()),
            name_auth_tag: Some(String::new()),
            original_name: Some("legacy.txt".into()),
            ..Default::default()
        };
        assert_eq!(file_name(&key, &blank), "legacy.txt");
    }
}
