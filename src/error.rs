//! Error types for Secure Chat.
//!
//! Every fallible operation in the library returns [`Result`], whose error side is
//! the [`ChatError`] taxonomy. Adapters map their third-party errors (HTTP, SQLite,
//! AEAD, JSON/YAML) into one of these variants at the boundary so callers can decide
//! what is fatal for a chat turn and what only affects durability.

use std::fmt;

use thiserror::Error;

/// Result type for Secure Chat operations.
pub type Result<T> = std::result::Result<T, ChatError>;

/// The last state a message reached in the write flow before it was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    /// Plaintext accepted, nothing derived yet.
    Received,
    /// Ciphertext produced.
    Encrypted,
    /// Embedding of the plaintext produced.
    Embedded,
    /// (ciphertext, embedding) committed to the store.
    Stored,
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteStage::Received => "received",
            WriteStage::Encrypted => "encrypted",
            WriteStage::Embedded => "embedded",
            WriteStage::Stored => "stored",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while encrypting, embedding, storing, or chatting.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Malformed arguments: non-text payloads, bad key format, broken tokens, `k == 0`.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// AEAD verification failed - the ciphertext was tampered with or sealed under another key.
    #[error("authentication failed: ciphertext was modified or sealed with a different key")]
    AuthenticationFailure,

    /// An external service could not be reached (connection refused, DNS, timeout).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// An external service answered, but with an error (non-2xx, API error, empty answer).
    #[error("service error: {0}")]
    ServiceError(String),

    /// The embedding service answered with a malformed vector.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A vector does not match the dimensionality established for its collection.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The persistence layer failed (I/O, permissions, locked or corrupt database).
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A best-effort write was abandoned after it reached `stage`.
    #[error("persistence skipped after stage '{stage}': {source}")]
    PersistenceSkipped {
        stage: WriteStage,
        #[source]
        source: Box<ChatError>,
    },

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Local I/O error (config files, exports).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Wrap `source` as a write abandoned after `stage`.
    pub fn persistence_skipped(stage: WriteStage, source: ChatError) -> Self {
        Self::PersistenceSkipped {
            stage,
            source: Box::new(source),
        }
    }

    /// Creates an InvalidInput error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// `true` when the failure comes from an unreachable or misbehaving remote service.
    pub fn is_service_failure(&self) -> bool {
        matches!(
            self,
            ChatError::ServiceUnavailable(_)
                | ChatError::ServiceError(_)
                | ChatError::InvalidResponse(_)
        )
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(err: rusqlite::Error) -> Self {
        ChatError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_yaml::Error> for ChatError {
    fn from(err: serde_yaml::Error) -> Self {
        ChatError::Config(err.to_string())
    }
}
