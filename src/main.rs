//! Main module for the Secure Chat CLI application (schat).
//!
//! This module provides the main function and auxiliary functionalities for
//! the CLI application. It handles command parsing, configuration resolution,
//! logging initialization, and wiring the chat components together before
//! invoking the requested subcommand.
//!
//! # Examples
//!
//! Starting an interactive session against a local Ollama server:
//!
//! ```sh
//! schat chat
//! OLLAMA_MODEL=llama3.2:3b schat chat --stream
//! ```
//!
//! Initializing the application's configuration and templates:
//!
//! ```sh
//! schat init
//! ```

use std::{
    error::Error,
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
    sync::Mutex,
};

use clap::Parser;
use once_cell::sync::OnceCell;
use secure_chat::{
    api::{ChatAgent, OpenAiAgent},
    chat::ChatEngine,
    commands::{Cli, Commands},
    config::{self, SecureChatConfig},
    config_dir,
    embeddings::OllamaEmbedder,
    frontend::TerminalFrontend,
    pipeline::SecurePipeline,
    session::Session,
    template::{self, DEFAULT_TEMPLATE, PromptTemplate},
    vector_store::{SqliteVectorStore, VectorStore},
};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt, prelude::*};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(cli))
}

/// Main asynchronous function of the Secure Chat CLI application.
///
/// Resolves configuration, initializes logging, and executes the requested command.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, a required service cannot be
/// reached, or the command itself fails.
async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let (config, source) = resolve_config(&cli)?;
    TRACING.get_or_try_init(|| init_tracing(config.log_file.as_deref()))?;
    match &source {
        Some(path) => info!("Config loaded from {}", path.display()),
        None => info!("No config file found, using defaults"),
    }
    debug!("Config resolved: model={} api_base={}", config.model, config.api_base);

    match cli.command {
        Commands::Chat => {
            let mut engine = build_engine(&config).await?;
            let mut frontend = TerminalFrontend::stdio();
            engine.run(&mut frontend).await?;
        }
        Commands::Ask { question } => {
            debug!("Asking question of {} chars", question.chars().count());
            let mut engine = build_engine(&config).await?;
            let mut frontend = TerminalFrontend::stdio();
            engine.handle_turn(&mut frontend, &question).await?;
        }
        Commands::Init { force } => {
            debug!("Initializing configuration");
            init(&config_dir()?, force)?;
        }
        Commands::ClearStore { yes } => clear_store(&config, yes)?,
    }

    Ok(())
}

/// Defaults, then the YAML file, then environment variables and flags.
///
/// Runs before tracing is initialized (the log file is part of the config), so the
/// file that was read is returned for logging afterwards.
fn resolve_config(cli: &Cli) -> Result<(SecureChatConfig, Option<PathBuf>), Box<dyn Error>> {
    let (mut config, source) = match &cli.config {
        Some(path) => (config::load_config(path)?, Some(path.clone())),
        None => {
            let path = config_dir()?.join("config.yaml");
            let source = path.exists().then(|| path.clone());
            (config::load_config_or_default(&path)?, source)
        }
    };
    cli.overrides.apply(&mut config);
    config.validate()?;
    Ok((config, source))
}

/// Console logging on stderr (`RUST_LOG`, default `warn`) plus an optional `info` log file.
fn init_tracing(log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let console = fmt::layer().with_writer(std::io::stderr).with_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    );

    let file = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::INFO),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()?;
    Ok(())
}

/// Connects the agent, embedder and store, and starts a fresh session.
async fn build_engine(config: &SecureChatConfig) -> Result<ChatEngine, Box<dyn Error>> {
    let template = template::load_template(&config.template)?;
    let agent = OpenAiAgent::new(config, template)?;
    agent.check_connection().await.map_err(|e| {
        format!(
            "{e}\nIs the model server running at {}? Start it (e.g. `ollama serve`) or set OLLAMA_HOST.",
            config.api_base
        )
    })?;

    let embedder = OllamaEmbedder::from_config(config)?;
    let store = SqliteVectorStore::open(
        &config.vector_db_path,
        config.collection_name.clone(),
        config.vector_metric,
    )?;
    info!(
        "Vector store ready: {} ({} entries)",
        store.path().display(),
        store.len()?
    );

    let pipeline = SecurePipeline::new(Box::new(embedder), Box::new(store));
    let session = Session::new(config);
    info!(session = %session.id(), "starting session");
    Ok(ChatEngine::new(config, session, pipeline, Box::new(agent)))
}

/// Initializes the application's configuration and templates.
///
/// Creates `config.yaml` and `templates/default.yaml` under `dir`, leaving existing
/// files alone unless `force` is set.
fn init(dir: &Path, force: bool) -> Result<(), Box<dyn Error>> {
    let config_path = dir.join("config.yaml");
    if force || !config_path.exists() {
        info!("Creating config file: {}", config_path.display());
        config::save_config(&SecureChatConfig::default(), &config_path)?;
        println!("Wrote {}", config_path.display());
    } else {
        println!("Keeping existing {}", config_path.display());
    }

    let template_path = template::template_path(dir, DEFAULT_TEMPLATE);
    if force || !template_path.exists() {
        info!("Creating template file: {}", template_path.display());
        if let Some(parent) = template_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&template_path, serde_yaml::to_string(&PromptTemplate::default())?)?;
        println!("Wrote {}", template_path.display());
    } else {
        println!("Keeping existing {}", template_path.display());
    }
    Ok(())
}

fn clear_store(config: &SecureChatConfig, yes: bool) -> Result<(), Box<dyn Error>> {
    let mut store = SqliteVectorStore::open(
        &config.vector_db_path,
        config.collection_name.clone(),
        config.vector_metric,
    )?;
    let entries = store.len()?;
    if !yes {
        println!(
            "{} holds {entries} encrypted messages. Re-run with --yes to delete them.",
            store.path().display()
        );
        return Ok(());
    }
    store.clear()?;
    info!(entries, "vector store cleared");
    println!("Deleted {entries} encrypted messages.");
    Ok(())
}
