//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the [`SecureChatConfig`] struct, which holds every tunable with a documented
//! default, and a [`load_config`] function to load it from a YAML file. Environment variables
//! and command-line flags are layered on top by [`crate::commands::ConfigOverrides`].
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use secure_chat::config::load_config;
//!
//! let config = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config);
//! ```
//!
//! A minimal file only needs the fields you want to change:
//!
//! ```yaml
//! model: "llama3.2:3b"
//! api_base: "http://localhost:11434/v1"
//! temperature: 0.2
//! vector_db_path: "./vector_db"
//! ```

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ChatError, Result};
use crate::vector_store::Metric;

/// Collection every session writes to.
pub const DEFAULT_COLLECTION: &str = "encrypted_chat_history";

/// Represents the application's configuration.
///
/// Every field has a default (see [`SecureChatConfig::default`]), so a YAML file may set
/// any subset of them.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct SecureChatConfig {
    /// The API key sent to the OpenAI-compatible endpoint (local servers ignore it).
    pub api_key: String,

    /// Base URL of the OpenAI-compatible API, including `/v1`.
    pub api_base: String,

    /// Chat model name.
    pub model: String,

    /// Sampling temperature, `0.0..=2.0`.
    pub temperature: f32,

    /// Embedding model name; defaults to `model`.
    pub embedding_model: Option<String>,

    /// Expected embedding width; pinned from the first response when unset.
    pub embedding_dimension: Option<usize>,

    /// Directory holding the persistent vector collection.
    pub vector_db_path: PathBuf,

    /// Name of the vector collection.
    pub collection_name: String,

    /// Similarity metric used by the vector store.
    pub vector_metric: Metric,

    /// Number of past messages retrieved as context per turn.
    pub retrieval_k: usize,

    /// Token budget for the running conversation memory.
    pub memory_max_tokens: usize,

    /// Maximum number of messages kept in the session history.
    pub max_history: usize,

    /// Timeout for embedding and chat requests.
    pub request_timeout_secs: u64,

    /// Stream tokens from the model as they arrive.
    pub stream: bool,

    /// Words per chunk when replaying a complete response as a stream.
    pub stream_chunk_words: usize,

    /// Pause between replayed chunks.
    pub stream_delay_ms: u64,

    /// Optional log file, appended at `info` level.
    pub log_file: Option<PathBuf>,

    /// Prompt template name under `<config_dir>/templates/`.
    pub template: String,
}

impl Default for SecureChatConfig {
    fn default() -> Self {
        Self {
            api_key: "sk-no-key-required".to_string(),
            api_base: "http://localhost:11434/v1".to_string(),
            model: "deepseek-r1:1.5b".to_string(),
            temperature: 0.7,
            embedding_model: None,
            embedding_dimension: None,
            vector_db_path: PathBuf::from("./vector_db"),
            collection_name: DEFAULT_COLLECTION.to_string(),
            vector_metric: Metric::Cosine,
            retrieval_k: 5,
            memory_max_tokens: 2048,
            max_history: 100,
            request_timeout_secs: 60,
            stream: false,
            stream_chunk_words: 3,
            stream_delay_ms: 50,
            log_file: None,
            template: "default".to_string(),
        }
    }
}

impl SecureChatConfig {
    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    /// `Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(ChatError::config("model must not be empty"));
        }
        if self.api_base.trim().is_empty() {
            return Err(ChatError::config("api_base must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ChatError::config(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if self.retrieval_k == 0 {
            return Err(ChatError::config("retrieval_k must be greater than zero"));
        }
        if self.stream_chunk_words == 0 {
            return Err(ChatError::config("stream_chunk_words must be greater than zero"));
        }
        if self.max_history == 0 {
            return Err(ChatError::config("max_history must be greater than zero"));
        }
        if self.embedding_dimension == Some(0) {
            return Err(ChatError::config("embedding_dimension must be greater than zero"));
        }
        Ok(())
    }

    /// Embedding endpoint root: `api_base` without a trailing `/v1` segment.
    pub fn embedding_base_url(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        base.strip_suffix("/v1").unwrap_or(base).to_string()
    }

    /// Embedding model, falling back to the chat model.
    pub fn embedding_model(&self) -> String {
        self.embedding_model
            .clone()
            .unwrap_or_else(|| self.model.clone())
    }
}

/// Loads the application's configuration from a YAML file.
///
/// # Parameters
///
/// - `file`: The path to the YAML configuration file.
///
/// # Errors
///
/// `Io` if the file cannot be read, `Config` if the YAML is invalid.
pub fn load_config(file: impl AsRef<Path>) -> Result<SecureChatConfig> {
    let file = file.as_ref();
    debug!("Loading config from: {}", file.display());
    let content = fs::read_to_string(file)?;
    let config: SecureChatConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Load `file` when it exists, otherwise fall back to defaults.
pub fn load_config_or_default(file: impl AsRef<Path>) -> Result<SecureChatConfig> {
    let file = file.as_ref();
    if file.exists() {
        load_config(file)
    } else {
        debug!("No config at {}, using defaults", file.display());
        Ok(SecureChatConfig::default())
    }
}

/// Write `config` as YAML to `file`, creating parent directories.
pub fn save_config(config: &SecureChatConfig, file: impl AsRef<Path>) -> Result<()> {
    let file = file.as_ref();
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(config)?;
    fs::write(file, yaml)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_valid_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
api_key: "example_api_key"
api_base: "http://example.com/v1"
model: "example_model"
temperature: 0.2
vector_db_path: "/tmp/vectors"
retrieval_k: 3
vector_metric: euclidean
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.api_key, "example_api_key");
        assert_eq!(config.api_base, "http://example.com/v1");
        assert_eq!(config.model, "example_model");
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.vector_db_path, PathBuf::from("/tmp/vectors"));
        assert_eq!(config.retrieval_k, 3);
        assert_eq!(config.vector_metric, Metric::Euclidean);
        // untouched fields keep their defaults
        assert_eq!(config.collection_name, DEFAULT_COLLECTION);
        assert_eq!(config.max_history, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_invalid_file() {
        let config = load_config("non/existent/path");
        assert!(matches!(config, Err(ChatError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_format() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"invalid: config: format"#).unwrap();

        let config = load_config(temp_file.path());
        assert!(matches!(config, Err(ChatError::Config(_))));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_config_or_default("does/not/exist.yaml").unwrap();
        assert_eq!(config, SecureChatConfig::default());
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.yaml");
        let config = SecureChatConfig {
            model: "llama3".into(),
            stream: true,
            ..SecureChatConfig::default()
        };
        save_config(&config, &path).unwrap();
        assert_eq!(load_config(&path).unwrap(), config);
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let bad_temperature = SecureChatConfig {
            temperature: 2.5,
            ..SecureChatConfig::default()
        };
        assert!(bad_temperature.validate().is_err());

        let zero_k = SecureChatConfig {
            retrieval_k: 0,
            ..SecureChatConfig::default()
        };
        assert!(zero_k.validate().is_err());

        let empty_model = SecureChatConfig {
            model: " ".into(),
            ..SecureChatConfig::default()
        };
        assert!(empty_model.validate().is_err());
    }

    #[test]
    fn embedding_base_strips_only_version_segment() {
        let mut config = SecureChatConfig::default();
        assert_eq!(config.embedding_base_url(), "http://localhost:11434");

        config.api_base = "http://gpu-box:11434/v1/".into();
        assert_eq!(config.embedding_base_url(), "http://gpu-box:11434");

        config.api_base = "http://host/api1".into();
        assert_eq!(config.embedding_base_url(), "http://host/api1");
    }

    #[test]
    fn embedding_model_defaults_to_chat_model() {
        let mut config = SecureChatConfig::default();
        assert_eq!(config.embedding_model(), config.model);
        config.embedding_model = Some("nomic-embed-text".into());
        assert_eq!(config.embedding_model(), "nomic-embed-text");
    }
}
