//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a `Cli` struct that represents the parsed command-line arguments,
//! a `ConfigOverrides` struct with the flags (and their environment variables) that are
//! layered over the configuration file, and a `Commands` enum with the subcommands.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use secure_chat::commands::{Cli, Commands};
//! use secure_chat::config::SecureChatConfig;
//!
//! let cli = Cli::parse();
//! let mut config = SecureChatConfig::default();
//! cli.overrides.apply(&mut config);
//! match cli.command {
//!     Commands::Ask { question } => println!("asking: {question}"),
//!     _ => {}
//! }
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::SecureChatConfig;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Auto)]
pub struct Cli {
    /// Configuration file; defaults to `config.yaml` in the platform config directory.
    #[arg(long, short = 'c', global = true, env = "SCHAT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ConfigOverrides,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Settings that override the configuration file.
///
/// Each one can be given as a flag or through its environment variable; the flag wins.
#[derive(Args, Debug, Default, Clone, PartialEq)]
pub struct ConfigOverrides {
    /// Chat model name.
    #[arg(long, global = true, env = "OLLAMA_MODEL")]
    pub model: Option<String>,

    /// Base URL of the OpenAI-compatible API, including `/v1`.
    #[arg(long = "api-base", global = true, env = "OLLAMA_HOST")]
    pub api_base: Option<String>,

    /// API key sent to the chat endpoint.
    #[arg(long = "api-key", global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Sampling temperature (0.0 to 2.0).
    #[arg(long, global = true, env = "TEMPERATURE")]
    pub temperature: Option<f32>,

    /// Directory of the encrypted vector store.
    #[arg(long = "vector-db-path", global = true, env = "VECTOR_DB_PATH")]
    pub vector_db_path: Option<PathBuf>,

    /// Embedding model name; defaults to the chat model.
    #[arg(long = "embedding-model", global = true, env = "EMBEDDING_MODEL")]
    pub embedding_model: Option<String>,

    /// Number of earlier messages retrieved as context.
    #[arg(short = 'k', long = "k", global = true)]
    pub retrieval_k: Option<usize>,

    /// Stream tokens from the model as they arrive.
    #[arg(long, global = true)]
    pub stream: bool,

    /// Prompt template name.
    #[arg(short = 't', long, global = true)]
    pub template: Option<String>,
}

impl ConfigOverrides {
    /// Layer the given overrides onto `config`.
    pub fn apply(&self, config: &mut SecureChatConfig) {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(api_base) = &self.api_base {
            config.api_base = api_base.clone();
        }
        if let Some(api_key) = &self.api_key {
            config.api_key = api_key.clone();
        }
        if let Some(temperature) = self.temperature {
            config.temperature = temperature;
        }
        if let Some(path) = &self.vector_db_path {
            config.vector_db_path = path.clone();
        }
        if let Some(model) = &self.embedding_model {
            config.embedding_model = Some(model.clone());
        }
        if let Some(k) = self.retrieval_k {
            config.retrieval_k = k;
        }
        if self.stream {
            config.stream = true;
        }
        if let Some(template) = &self.template {
            config.template = template.clone();
        }
    }
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Start an interactive chat session.
    #[clap(name = "chat", alias = "i", alias = "interactive")]
    Chat,

    /// Ask a single question and print the answer.
    #[clap(name = "ask", alias = "a")]
    Ask {
        /// The question to ask.
        question: String,
    },

    /// Write a default configuration file and prompt template.
    Init {
        /// Overwrite existing files.
        #[arg(long)]
        force: bool,
    },

    /// Delete every message from the encrypted vector store.
    #[clap(name = "clear-store")]
    ClearStore {
        /// Confirm the deletion.
        #[arg(long, short = 'y')]
        yes: bool,
    },
}
