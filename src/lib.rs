//! # Secure Chat
//!
//! A terminal chat client for OpenAI-compatible model servers (Ollama by default) whose
//! long-term memory is an **encrypted** vector store.
//!
//! Every message is sealed with a per-session key before it is stored; only the
//! embedding of its plaintext sits next to the ciphertext so similar messages can be
//! found again. On each turn the closest earlier messages are retrieved, decrypted and
//! handed to the model as context, together with the running conversation memory.
//!
//! ## Modules
//! - [`cipher`]: authenticated encryption of message text
//! - [`embeddings`]: text → vector through an embedding service
//! - [`vector_store`]: persistent similarity search over (ciphertext, embedding) pairs
//! - [`pipeline`]: encrypt → embed → store, and embed → search → decrypt
//! - [`api`]: the language-model adapter
//! - [`brain`], [`template`], [`session`]: running memory, prompt layout, session state
//! - [`frontend`], [`chat`]: presentation seam and the turn/loop driver
//! - [`config`], [`commands`], [`error`]: configuration, CLI, error taxonomy
//!
//! ## Quick start
//! ```sh
//! schat init          # write config.yaml and templates/default.yaml
//! schat chat          # interactive session
//! schat ask "How do I rotate SSH keys?"
//! ```

use std::path::PathBuf;

use directories::ProjectDirs;

pub mod api;
pub mod brain;
pub mod chat;
pub mod cipher;
pub mod commands;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod frontend;
pub mod pipeline;
pub mod session;
pub mod template;
pub mod vector_store;

#[cfg(test)]
mod test_support;

pub use error::{ChatError, Result};

/// Retrieves the configuration directory for the application.
///
/// Utilizes the `directories` crate to determine the platform's conventional location:
///
/// - macOS: `~/Library/Application Support/com.secure-chat.schat/`
/// - Linux: `~/.config/schat/` (via XDG)
/// - Windows: `%APPDATA%\secure-chat\schat\config\`
///
/// # Errors
///
/// `Config` if no home directory can be determined.
pub fn config_dir() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "secure-chat", "schat")
        .ok_or_else(|| ChatError::config("Unable to determine config directory"))?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
