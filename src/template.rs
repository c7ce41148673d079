//! # Prompt templates
//!
//! A template is a small YAML document that steers the assistant:
//! - a `system_prompt` sent as the system message of every request,
//! - an optional `context_header` introducing the retrieved context block,
//! - optional `pre_user_message_content` / `post_user_message_content` strings that are
//!   prepended/appended to the user text at send time.
//!
//! Templates live under the application's configuration directory:
//!
//! ```text
//! <config_dir>/templates/<name>.yaml
//! ```
//!
//! The `default` template is built in; a file of that name overrides it.
//!
//! ## Minimal YAML example
//!
//! ```yaml
//! system_prompt: "You are a terse assistant focused on security and privacy."
//! # context_header: "Notes from earlier chats:"
//! # post_user_message_content: "Answer in plain English."
//! ```
//!
//! ## Composition
//! [`PromptTemplate::compose`] lays out a request as: one system message (prompt plus the
//! numbered context block, omitted when nothing was retrieved), then the running memory
//! turns oldest first, then the decorated user text.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::brain::Memory;
use crate::error::{ChatError, Result};
use crate::session::Role;

/// Name of the built-in template.
pub const DEFAULT_TEMPLATE: &str = "default";

const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI security assistant focused on privacy and data protection. Your role is to:
- Provide secure and privacy-conscious responses
- Handle sensitive information appropriately
- Guide users on security best practices
- Maintain confidentiality in conversations
- Flag potential security concerns";

const DEFAULT_CONTEXT_HEADER: &str = "Relevant context from earlier conversations:";

/// Role of a composed prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl From<Role> for PromptRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => PromptRole::User,
            Role::Assistant => PromptRole::Assistant,
        }
    }
}

/// One role-tagged message of a composed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A reusable prompt template.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PromptTemplate {
    /// Instruction sent as the system message.
    pub system_prompt: String,

    /// Line introducing the retrieved context block.
    #[serde(default)]
    pub context_header: Option<String>,

    /// Extra text added **before** each user message at send time.
    #[serde(default)]
    pub pre_user_message_content: Option<String>,

    /// Extra text added **after** each user message at send time.
    #[serde(default)]
    pub post_user_message_content: Option<String>,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            context_header: Some(DEFAULT_CONTEXT_HEADER.to_string()),
            pre_user_message_content: None,
            post_user_message_content: None,
        }
    }
}

impl PromptTemplate {
    /// System message content for a turn with the given retrieved `context`.
    pub fn system_message(&self, context: &[String]) -> String {
        if context.is_empty() {
            return self.system_prompt.clone();
        }

        let header = self
            .context_header
            .as_deref()
            .unwrap_or(DEFAULT_CONTEXT_HEADER);
        let mut content = format!("{}\n\n{header}", self.system_prompt);
        for (i, item) in context.iter().enumerate() {
            content.push_str(&format!("\n{}. {item}", i + 1));
        }
        content
    }

    /// Apply the pre/post decorations to `question`.
    pub fn decorate_user_message(&self, question: &str) -> String {
        let mut text = question.to_string();
        if let Some(prepend) = &self.pre_user_message_content {
            text = format!("{prepend} {text}");
        }
        if let Some(append) = &self.post_user_message_content {
            text = format!("{text} {append}");
        }
        text
    }

    /// Lay out a full request.
    pub fn compose(
        &self,
        user_text: &str,
        context: &[String],
        memory: &[Memory],
    ) -> Vec<PromptMessage> {
        let mut messages = Vec::with_capacity(memory.len() + 2);
        messages.push(PromptMessage::new(
            PromptRole::System,
            self.system_message(context),
        ));
        messages.extend(
            memory
                .iter()
                .map(|turn| PromptMessage::new(turn.role.into(), turn.content.clone())),
        );
        messages.push(PromptMessage::new(
            PromptRole::User,
            self.decorate_user_message(user_text),
        ));
        messages
    }
}

/// Path of template `name` under `dir`.
pub fn template_path(dir: &Path, name: &str) -> PathBuf {
    dir.join("templates").join(format!("{name}.yaml"))
}

/// Load template `name` from the configuration directory.
///
/// The built-in default is returned for [`DEFAULT_TEMPLATE`] when no file overrides it.
///
/// ### Errors
/// - `Config` if the configuration directory cannot be determined or the YAML is invalid.
/// - `Io` if a named template other than the default does not exist.
pub fn load_template(name: &str) -> Result<PromptTemplate> {
    load_template_from(&crate::config_dir()?, name)
}

/// Load template `name` from `<dir>/templates/`.
pub fn load_template_from(dir: &Path, name: &str) -> Result<PromptTemplate> {
    if name.contains(['/', '\\']) || name.trim().is_empty() {
        return Err(ChatError::config(format!("invalid template name: {name:?}")));
    }

    let path = template_path(dir, name);
    if name == DEFAULT_TEMPLATE && !path.exists() {
        return Ok(PromptTemplate::default());
    }

    info!("Loading template: {}", path.display());
    let content = fs::read_to_string(&path)?;
    let template: PromptTemplate = serde_yaml::from_str(&content)?;
    Ok(template)
}
