//! # Chat engine
//!
//! [`ChatEngine`] runs one conversation turn end to end and drives the interactive loop.
//!
//! A turn, in order:
//! 1. validate the input (blank input is rejected before anything else happens);
//! 2. **read flow**: retrieve up to `retrieval_k` earlier messages as context. A failure
//!    here only costs context and is shown as a notice;
//! 3. record the user message and run its **write flow**. A failed write only costs
//!    durability: the message stays in the history with `encrypted == false`;
//! 4. call the agent. A failure is shown with `display_error` and ends the turn;
//! 5. stream the reply to the front end, live when `stream` is set, otherwise replayed
//!    in `stream_chunk_words`-word chunks;
//! 6. record the reply and run its write flow;
//! 7. push both turns into the running memory.
//!
//! Context is retrieved before the new message is stored, so a question never comes
//! back to the model as its own context.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use tracing::{debug, info, warn};

use crate::api::ChatAgent;
use crate::config::SecureChatConfig;
use crate::error::{ChatError, Result};
use crate::frontend::ChatFrontend;
use crate::pipeline::SecurePipeline;
use crate::session::{self, Message, Role, Session};

const HELP: &str = "Commands:
  /help            show this help
  /history         show this session's messages
  /stats           show session statistics
  /export [path]   write the history as encrypted JSON
  /clear           clear the history and running memory
  /forget          delete every message from the encrypted store
  /exit, /quit     leave the chat";

/// What happened during a successful turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub response: String,
    /// Earlier messages supplied as context.
    pub context_used: usize,
    /// Whether the user message reached the store.
    pub user_stored: bool,
    /// Whether the response reached the store.
    pub response_stored: bool,
}

/// An interactive slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Help,
    Clear,
    Forget,
    Stats,
    History,
    Export(Option<PathBuf>),
    Unknown(String),
}

impl Command {
    /// Parse `line` as a command; `None` means it is an ordinary message.
    pub fn parse(line: &str) -> Option<Command> {
        let line = line.trim();
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            return Some(Command::Exit);
        }
        let rest = line.strip_prefix('/')?;
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };

        Some(match name.to_lowercase().as_str() {
            "exit" | "quit" => Command::Exit,
            "help" => Command::Help,
            "clear" => Command::Clear,
            "forget" => Command::Forget,
            "stats" => Command::Stats,
            "history" => Command::History,
            "export" if arg.is_empty() => Command::Export(None),
            "export" => Command::Export(Some(PathBuf::from(arg))),
            _ => Command::Unknown(name.to_string()),
        })
    }
}

/// Whether the interactive loop keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Split `text` into slices of at most `words` words each.
///
/// Whitespace stays attached to the preceding word, so the slices concatenate back to
/// `text` exactly.
pub fn word_chunks(text: &str, words: usize) -> Vec<&str> {
    let words = words.max(1);
    let mut chunks = Vec::new();
    let (mut start, mut count, mut in_word) = (0, 0, false);

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            in_word = false;
        } else if !in_word {
            in_word = true;
            if count == words {
                chunks.push(&text[start..i]);
                start = i;
                count = 0;
            }
            count += 1;
        }
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

/// Default export file name for the current time.
pub fn default_export_path() -> PathBuf {
    PathBuf::from(format!(
        "encrypted_chat_history_{}.json",
        Local::now().format("%Y%m%d_%H%M%S")
    ))
}

/// One session's chat: history, pipeline and agent.
pub struct ChatEngine {
    session: Session,
    pipeline: SecurePipeline,
    agent: Box<dyn ChatAgent>,
    retrieval_k: usize,
    stream: bool,
    chunk_words: usize,
    chunk_delay: Duration,
}

impl ChatEngine {
    pub fn new(
        config: &SecureChatConfig,
        session: Session,
        pipeline: SecurePipeline,
        agent: Box<dyn ChatAgent>,
    ) -> Self {
        Self {
            session,
            pipeline,
            agent,
            retrieval_k: config.retrieval_k.max(1),
            stream: config.stream,
            chunk_words: config.stream_chunk_words.max(1),
            chunk_delay: Duration::from_millis(config.stream_delay_ms),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn pipeline(&self) -> &SecurePipeline {
        &self.pipeline
    }

    /// Run one turn for `input`.
    ///
    /// # Errors
    /// - `InvalidInput` for blank input.
    /// - The agent's error when no response could be produced; it has already been
    ///   shown through [`ChatFrontend::display_error`].
    pub async fn handle_turn(
        &mut self,
        frontend: &mut dyn ChatFrontend,
        input: &str,
    ) -> Result<TurnOutcome> {
        let text = input.trim();
        if text.is_empty() {
            return Err(ChatError::invalid_input("message is empty"));
        }

        let context = match self.pipeline.read(&self.session, text, self.retrieval_k).await {
            Ok(retrieval) => retrieval.contents(),
            Err(e) => {
                warn!("context retrieval failed: {e}");
                frontend.display_notice(&format!("Earlier messages unavailable: {e}"))?;
                Vec::new()
            }
        };

        let mut user_message = Message::new(Role::User, text);
        let user_stored = self.persist(frontend, text).await?;
        user_message.encrypted = user_stored;
        self.session.record(user_message);

        let memory = self.session.memory().turns();
        let response = match self.generate(frontend, text, &context, &memory).await {
            Ok(response) => response,
            Err(e) => {
                frontend.end_stream()?;
                frontend.display_error(&e.to_string())?;
                return Err(e);
            }
        };
        frontend.end_stream()?;

        let mut reply = Message::new(Role::Assistant, response.clone());
        let response_stored = self.persist(frontend, &response).await?;
        reply.encrypted = response_stored;
        self.session.record(reply);

        self.session.remember(Role::User, text);
        self.session.remember(Role::Assistant, &response);

        info!(
            context = context.len(),
            user_stored, response_stored, "turn complete"
        );
        Ok(TurnOutcome {
            response,
            context_used: context.len(),
            user_stored,
            response_stored,
        })
    }

    async fn generate(
        &self,
        frontend: &mut dyn ChatFrontend,
        text: &str,
        context: &[String],
        memory: &[crate::brain::Memory],
    ) -> Result<String> {
        if self.stream {
            let mut forward = |delta: &str| {
                if let Err(e) = frontend.stream_message(Role::Assistant, delta) {
                    warn!("failed to display chunk: {e}");
                }
            };
            return self
                .agent
                .respond_streaming(text, context, memory, &mut forward)
                .await;
        }

        let response = self.agent.respond(text, context, memory).await?;
        for chunk in word_chunks(&response, self.chunk_words) {
            frontend.stream_message(Role::Assistant, chunk)?;
            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
        }
        Ok(response)
    }

    /// Write flow for one message; failures become a notice and `false`.
    async fn persist(&mut self, frontend: &mut dyn ChatFrontend, content: &str) -> Result<bool> {
        match self.pipeline.write(&self.session, content).await {
            Ok(id) => {
                debug!(id, "message persisted");
                Ok(true)
            }
            Err(e) => {
                warn!("{e}");
                frontend.display_notice(&format!("Message not saved to encrypted history: {e}"))?;
                Ok(false)
            }
        }
    }

    /// Execute an interactive command.
    pub async fn handle_command(
        &mut self,
        frontend: &mut dyn ChatFrontend,
        command: Command,
    ) -> Result<Flow> {
        match command {
            Command::Exit => return Ok(Flow::Exit),
            Command::Help => frontend.display_notice(HELP)?,
            Command::Clear => {
                self.session.clear_history();
                frontend.display_notice("Chat history cleared.")?;
            }
            Command::Forget => match self.pipeline.clear_store() {
                Ok(()) => frontend.display_notice("Encrypted message store cleared.")?,
                Err(e) => frontend.display_error(&e.to_string())?,
            },
            Command::Stats => {
                frontend.display_notice(&self.session.stats().to_string())?;
                match self.pipeline.stored_entries() {
                    Ok(n) => frontend.display_notice(&format!("Stored entries:     {n}"))?,
                    Err(e) => frontend.display_notice(&format!("Stored entries:     ? ({e})"))?,
                }
            }
            Command::History => {
                if self.session.is_empty() {
                    frontend.display_notice("No messages yet.")?;
                }
                for message in self.session.messages() {
                    frontend.display_message(&message)?;
                }
            }
            Command::Export(path) => {
                let path = path.unwrap_or_else(default_export_path);
                match self.export_to(&path) {
                    Ok(written) => frontend.display_notice(&format!(
                        "Exported {written} messages to {}",
                        path.display()
                    ))?,
                    Err(e) => frontend.display_error(&format!("Export failed: {e}"))?,
                }
            }
            Command::Unknown(name) => {
                frontend.display_notice(&format!("Unknown command /{name}. Type /help."))?
            }
        }
        Ok(Flow::Continue)
    }

    /// Write the export file; returns the number of records written.
    fn export_to(&self, path: &Path) -> Result<usize> {
        let records = session::export_records(&self.session);
        let json = session::render_export(&records)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        info!(path = %path.display(), records = records.len(), "history exported");
        Ok(records.len())
    }

    /// Read input until end of input or an exit command.
    ///
    /// Failed turns were already shown to the user and do not end the loop.
    pub async fn run(&mut self, frontend: &mut dyn ChatFrontend) -> Result<()> {
        frontend.display_notice("Secure chat started. Type /help for commands, /exit to leave.")?;

        while let Some(line) = frontend.get_user_input()? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(command) = Command::parse(line) {
                if self.handle_command(frontend, command).await? == Flow::Exit {
                    break;
                }
                continue;
            }
            if let Err(e) = self.handle_turn(frontend, line).await {
                debug!("turn failed: {e}");
            }
        }

        info!(session = %self.session.id(), messages = self.session.len(), "chat ended");
        Ok(())
    }
}
