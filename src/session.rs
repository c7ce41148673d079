//! # Session state
//!
//! A [`Session`] is everything one user's conversation owns: its encryption key, the
//! visible chat history, and the running [`ConversationMemory`] replayed to the model.
//! Nothing here is global; every pipeline and engine call receives the session it acts on.
//!
//! The key is generated when the session starts and dropped (and zeroized) with it. It is
//! never written anywhere, so entries a session stored cannot be opened once it ends.
//!
//! This module also holds the history utilities: [`ChatStats`], and the encrypted
//! [`export_history`] / [`import_history`] pair.
//!
//! ## Export format
//! ```json
//! [
//!   {
//!     "role": "user",
//!     "content": "<ciphertext>",
//!     "timestamp": "2024-05-01T10:15:00.123456+02:00",
//!     "encrypted": true
//!   }
//! ]
//! ```
//! Every export seals each message again with a fresh nonce, so two exports of the same
//! history never share ciphertext.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::brain::{ConversationMemory, Memory};
use crate::cipher::{self, EncryptionKey};
use crate::config::SecureChatConfig;
use crate::error::{ChatError, Result};

/// Who authored a message.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

/// One entry of the visible chat history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    /// Plaintext content.
    pub content: String,
    /// Creation time, serialized as RFC 3339.
    pub timestamp: DateTime<Local>,
    /// `true` once the write flow stored this message's ciphertext.
    pub encrypted: bool,
}

impl Message {
    /// A message created now, not yet stored.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Local::now(),
            encrypted: false,
        }
    }
}

/// Per-user conversation state.
pub struct Session {
    id: Uuid,
    key: EncryptionKey,
    history: VecDeque<Message>,
    max_history: usize,
    memory: ConversationMemory,
    started_at: DateTime<Local>,
}

impl Session {
    /// Start a session with a freshly generated key.
    pub fn new(config: &SecureChatConfig) -> Self {
        Self::with_key(cipher::generate_key(), config)
    }

    /// Start a session around an existing key.
    pub fn with_key(key: EncryptionKey, config: &SecureChatConfig) -> Self {
        let id = Uuid::new_v4();
        debug!(session = %id, "session started");
        Self {
            id,
            key,
            history: VecDeque::new(),
            max_history: config.max_history.max(1),
            memory: ConversationMemory::new(config.memory_max_tokens),
            started_at: Local::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Append `message`, dropping the oldest entry when the history is full.
    pub fn record(&mut self, message: Message) {
        self.history.push_back(message);
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }

    /// Visible history, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Message> {
        self.history.iter()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.history.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Push a completed turn into the running memory.
    pub fn remember(&mut self, role: Role, content: &str) {
        self.memory.add(Memory::new(role, content));
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// Empty both the visible history and the running memory.
    ///
    /// Entries already in the vector store are untouched.
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.memory.clear();
    }

    pub fn stats(&self) -> ChatStats {
        ChatStats::from_messages(self.history.iter())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("messages", &self.history.len())
            .field("memory_turns", &self.memory.len())
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

/// Summary numbers over a chat history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatStats {
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    /// Mean user message length in characters.
    pub avg_user_length: f64,
    /// Mean assistant message length in characters.
    pub avg_assistant_length: f64,
    pub last_message_time: Option<DateTime<Local>>,
}

impl ChatStats {
    pub fn from_messages<'a>(messages: impl IntoIterator<Item = &'a Message>) -> Self {
        let mut stats = ChatStats::default();
        let (mut user_chars, mut assistant_chars) = (0usize, 0usize);

        for message in messages {
            stats.total_messages += 1;
            let chars = message.content.chars().count();
            match message.role {
                Role::User => {
                    stats.user_messages += 1;
                    user_chars += chars;
                }
                Role::Assistant => {
                    stats.assistant_messages += 1;
                    assistant_chars += chars;
                }
            }
            stats.last_message_time = Some(message.timestamp);
        }

        if stats.user_messages > 0 {
            stats.avg_user_length = user_chars as f64 / stats.user_messages as f64;
        }
        if stats.assistant_messages > 0 {
            stats.avg_assistant_length = assistant_chars as f64 / stats.assistant_messages as f64;
        }
        stats
    }
}

impl fmt::Display for ChatStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total messages:     {}", self.total_messages)?;
        writeln!(f, "User messages:      {}", self.user_messages)?;
        writeln!(f, "Assistant messages: {}", self.assistant_messages)?;
        writeln!(f, "Avg user length:    {:.1}", self.avg_user_length)?;
        writeln!(f, "Avg reply length:   {:.1}", self.avg_assistant_length)?;
        match self.last_message_time {
            Some(ts) => write!(f, "Last message:       {}", ts.format("%Y-%m-%d %H:%M:%S")),
            None => write!(f, "Last message:       -"),
        }
    }
}

/// One element of an exported history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExportRecord {
    pub role: Role,
    /// Ciphertext of the message content.
    pub content: String,
    /// RFC 3339 creation time.
    pub timestamp: String,
    pub encrypted: bool,
}

/// Seal every history message again under the session key.
///
/// Messages that fail to encrypt are skipped and logged.
pub fn export_records(session: &Session) -> Vec<ExportRecord> {
    session
        .history()
        .filter_map(|message| match cipher::encrypt(&message.content, session.key()) {
            Ok(sealed) => Some(ExportRecord {
                role: message.role,
                content: sealed.into_string(),
                timestamp: message.timestamp.to_rfc3339(),
                encrypted: true,
            }),
            Err(e) => {
                warn!(role = %message.role, "skipping message in export: {e}");
                None
            }
        })
        .collect()
}

/// Pretty JSON array of `records`, or exactly `"[]"` when there are none.
pub fn render_export(records: &[ExportRecord]) -> Result<String> {
    if records.is_empty() {
        return Ok("[]".to_string());
    }

    debug!(records = records.len(), "exported history");
    serde_json::to_string_pretty(records)
        .map_err(|e| ChatError::invalid_input(format!("failed to serialize export: {e}")))
}

/// Serialize the session history as a pretty JSON array of freshly sealed records.
///
/// Returns exactly `"[]"` when there is nothing to export.
pub fn export_history(session: &Session) -> Result<String> {
    render_export(&export_records(session))
}

/// Outcome of [`import_history`].
#[derive(Debug, Default)]
pub struct ImportReport {
    /// Records that opened successfully, in file order.
    pub messages: Vec<Message>,
    /// `(record index, error)` for every record that could not be restored.
    pub failures: Vec<(usize, ChatError)>,
}

/// Decrypt an export produced by [`export_history`] under `key`.
///
/// A bad record never aborts the import; it is reported in [`ImportReport::failures`].
///
/// # Errors
/// `InvalidInput` when `json` is not an array of export records.
pub fn import_history(json: &str, key: &EncryptionKey) -> Result<ImportReport> {
    let records: Vec<ExportRecord> = serde_json::from_str(json)
        .map_err(|e| ChatError::invalid_input(format!("not a history export: {e}")))?;

    let mut report = ImportReport::default();
    for (index, record) in records.into_iter().enumerate() {
        if !record.encrypted || !cipher::is_probably_encrypted(&record.content) {
            warn!(index, "import record does not look encrypted");
        }

        let restored = DateTime::parse_from_rfc3339(&record.timestamp)
            .map_err(|e| ChatError::invalid_input(format!("bad timestamp: {e}")))
            .and_then(|timestamp| {
                let content = cipher::decrypt(&record.content, key)?;
                Ok(Message {
                    role: record.role,
                    content,
                    timestamp: timestamp.with_timezone(&Local),
                    encrypted: true,
                })
            });

        match restored {
            Ok(message) => report.messages.push(message),
            Err(e) => {
                warn!(index, "skipping import record: {e}");
                report.failures.push((index, e));
            }
        }
    }
    Ok(report)
}
