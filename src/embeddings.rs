//! # Embedding provider
//!
//! Turns text into a fixed-width vector by calling an external embedding service.
//!
//! The default implementation, [`OllamaEmbedder`], talks to Ollama's native endpoint:
//!
//! ```text
//! POST {base}/api/embeddings   {"model": "<name>", "prompt": "<text>"}
//!   -> 200 {"embedding": [0.12, -0.03, ...]}
//! ```
//!
//! The vector width is pinned either from configuration or from the first successful
//! response; any later response of a different width is rejected as
//! [`ChatError::InvalidResponse`]. Identical text with the same model configuration must
//! yield the same vector, which is what lets tests replay recorded fixtures.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SecureChatConfig;
use crate::error::{ChatError, Result};

/// Maps text to a vector of floats.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `text`.
    ///
    /// # Errors
    /// - `ServiceUnavailable` if the service cannot be reached.
    /// - `ServiceError` if it answers with a non-success status.
    /// - `InvalidResponse` if the vector is malformed or has the wrong width.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// The pinned vector width, once known.
    fn dimension(&self) -> Option<usize>;
}

#[derive(Serialize, Debug)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// HTTP client for an Ollama-compatible embedding endpoint.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: OnceLock<usize>,
}

impl OllamaEmbedder {
    /// Build an embedder against `base_url` (scheme + host, no `/v1`) for `model`.
    ///
    /// `dimension` pins the expected vector width up front; `None` pins it on first use.
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        dimension: Option<usize>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::config(format!("failed to build HTTP client: {e}")))?;

        let pinned = OnceLock::new();
        if let Some(width) = dimension {
            let _ = pinned.set(width);
        }

        Ok(Self {
            client,
            endpoint: format!("{}/api/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
            dimension: pinned,
        })
    }

    /// Build from application configuration.
    pub fn from_config(config: &SecureChatConfig) -> Result<Self> {
        Self::new(
            &config.embedding_base_url(),
            config.embedding_model(),
            config.embedding_dimension,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn validate(&self, vector: Vec<f32>) -> Result<Vec<f32>> {
        if vector.is_empty() {
            return Err(ChatError::InvalidResponse("embedding is empty".into()));
        }
        if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
            return Err(ChatError::InvalidResponse(format!(
                "embedding has a non-finite value at index {pos}"
            )));
        }

        let expected = *self.dimension.get_or_init(|| vector.len());
        if vector.len() != expected {
            return Err(ChatError::InvalidResponse(format!(
                "embedding has {} dimensions, expected {expected}",
                vector.len()
            )));
        }
        Ok(vector)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::ServiceUnavailable(format!("embedding service: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::ServiceError(format!(
                "embedding service returned {status}: {body}"
            )));
        }

        let payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ChatError::InvalidResponse(format!("undecodable embedding: {e}")))?;

        let vector = self.validate(payload.embedding)?;
        debug!(dimension = vector.len(), chars = text.chars().count(), "embedded text");
        Ok(vector)
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn embedder_for(server: &MockServer, dimension: Option<usize>) -> OllamaEmbedder {
        OllamaEmbedder::new(
            &server.base_url(),
            "nomic-embed-text",
            dimension,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn embeds_text_and_pins_dimension() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embeddings");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({ "embedding": [0.25, -0.5, 1.0] }));
            })
            .await;

        let embedder = embedder_for(&server, None);
        assert_eq!(embedder.dimension(), None);

        let vector = embedder.embed("hello").await.unwrap();
        assert_eq!(vector, vec![0.25, -0.5, 1.0]);
        assert_eq!(embedder.dimension(), Some(3));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn wrong_width_is_invalid_response() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embeddings");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({ "embedding": [0.1, 0.2] }));
            })
            .await;

        let embedder = embedder_for(&server, Some(4));
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidResponse(_)), "{err:?}");
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_response() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embeddings");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({ "vectors": "nope" }));
            })
            .await;

        let err = embedder_for(&server, None).embed("x").await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidResponse(_)), "{err:?}");
    }

    #[tokio::test]
    async fn empty_vector_is_invalid_response() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embeddings");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({ "embedding": [] }));
            })
            .await;

        let err = embedder_for(&server, None).embed("x").await.unwrap_err();
        assert!(matches!(err, ChatError::InvalidResponse(_)), "{err:?}");
    }

    #[tokio::test]
    async fn server_error_is_service_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embeddings");
                then.status(500).body("model not loaded");
            })
            .await;

        let err = embedder_for(&server, None).embed("x").await.unwrap_err();
        assert!(matches!(err, ChatError::ServiceError(_)), "{err:?}");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_service_unavailable() {
        let embedder = OllamaEmbedder::new(
            "http://127.0.0.1:9",
            "nomic-embed-text",
            None,
            Duration::from_secs(2),
        )
        .unwrap();

        let err = embedder.embed("x").await.unwrap_err();
        assert!(matches!(err, ChatError::ServiceUnavailable(_)), "{err:?}");
    }
}
