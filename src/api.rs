//! # API Module
//!
//! Conversational agent adapter for OpenAI-compatible chat endpoints (Ollama, llama.cpp,
//! vLLM, OpenAI itself).
//!
//! The [`ChatAgent`] trait is the seam the chat engine talks to. [`OpenAiAgent`] implements
//! it over `async-openai`: it lays out the request with the session's
//! [`PromptTemplate`](crate::template::PromptTemplate), sends it to `/chat/completions`,
//! and returns the generated text.
//!
//! Failures are surfaced, never swallowed or retried:
//! - connection refused, DNS, timeout → [`ChatError::ServiceUnavailable`]
//! - API error, non-2xx, malformed or empty completion → [`ChatError::ServiceError`]
//!
//! # Example
//!
//! ```no_run
//! use secure_chat::api::{ChatAgent, OpenAiAgent};
//! use secure_chat::config::SecureChatConfig;
//! use secure_chat::template::PromptTemplate;
//!
//! # async fn run() -> secure_chat::error::Result<()> {
//! let agent = OpenAiAgent::new(&SecureChatConfig::default(), PromptTemplate::default())?;
//! agent.check_connection().await?;
//! let answer = agent.respond("How long should a passphrase be?", &[], &[]).await?;
//! println!("{answer}");
//! # Ok(()) }
//! ```

use std::time::Duration;

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, error};

use crate::brain::Memory;
use crate::config::SecureChatConfig;
use crate::error::{ChatError, Result};
use crate::template::{PromptMessage, PromptRole, PromptTemplate};

/// Sends a user turn plus retrieved context and running memory to a language model.
#[async_trait]
pub trait ChatAgent: Send + Sync {
    /// Generate a complete response.
    async fn respond(&self, user_text: &str, context: &[String], memory: &[Memory])
    -> Result<String>;

    /// Generate a response, forwarding text to `on_delta` as it arrives.
    ///
    /// Returns the full text. Agents without live streaming deliver it in one piece.
    async fn respond_streaming(
        &self,
        user_text: &str,
        context: &[String],
        memory: &[Memory],
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String> {
        let text = self.respond(user_text, context, memory).await?;
        on_delta(&text);
        Ok(text)
    }

    /// Verify the endpoint answers before a session starts.
    async fn check_connection(&self) -> Result<()>;
}

/// [`ChatAgent`] over an OpenAI-compatible HTTP API.
pub struct OpenAiAgent {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    template: PromptTemplate,
}

impl OpenAiAgent {
    /// Creates a client from configuration.
    ///
    /// Requests time out after `request_timeout_secs`; the client's built-in retry
    /// backoff is disabled.
    pub fn new(config: &SecureChatConfig, template: PromptTemplate) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ChatError::config(format!("failed to build HTTP client: {e}")))?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(config.api_key.clone())
            .with_api_base(config.api_base.trim_end_matches('/').to_string());
        debug!(api_base = %config.api_base, model = %config.model, "chat client created");

        let no_retry = backoff::ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::ZERO))
            .build();

        Ok(Self {
            client: Client::with_config(openai_config)
                .with_http_client(http)
                .with_backoff(no_retry),
            model: config.model.clone(),
            temperature: config.temperature,
            template,
        })
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    fn build_request(
        &self,
        user_text: &str,
        context: &[String],
        memory: &[Memory],
    ) -> Result<CreateChatCompletionRequest> {
        let messages = self
            .template
            .compose(user_text, context, memory)
            .iter()
            .map(to_request_message)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(map_openai_error)?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .temperature(self.temperature)
            .messages(messages)
            .build()
            .map_err(map_openai_error)?;

        debug!(
            messages = request.messages.len(),
            context = context.len(),
            "prepared chat request"
        );
        Ok(request)
    }
}

#[async_trait]
impl ChatAgent for OpenAiAgent {
    async fn respond(
        &self,
        user_text: &str,
        context: &[String],
        memory: &[Memory],
    ) -> Result<String> {
        let request = self.build_request(user_text, context, memory)?;
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(map_openai_error)?;

        let text: String = response
            .choices
            .into_iter()
            .filter_map(|choice| choice.message.content)
            .collect();

        if text.trim().is_empty() {
            return Err(ChatError::ServiceError("model returned an empty response".into()));
        }
        debug!(chars = text.chars().count(), "received response");
        Ok(text)
    }

    async fn respond_streaming(
        &self,
        user_text: &str,
        context: &[String],
        memory: &[Memory],
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String> {
        let request = self.build_request(user_text, context, memory)?;
        let mut stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(map_openai_error)?;

        let mut text = String::new();
        while let Some(result) = stream.next().await {
            match result {
                Ok(response) => {
                    for choice in response.choices {
                        if let Some(content) = choice.delta.content {
                            on_delta(&content);
                            text.push_str(&content);
                        }
                    }
                }
                // The connection is only opened once the stream is polled.
                Err(OpenAIError::StreamError(e)) if text.is_empty() => {
                    error!("Stream failed before any content: {e}");
                    return Err(ChatError::ServiceUnavailable(e));
                }
                Err(err) => {
                    error!("Received error: {}", err);
                    return Err(map_openai_error(err));
                }
            }
        }

        if text.trim().is_empty() {
            return Err(ChatError::ServiceError("model returned an empty response".into()));
        }
        debug!(chars = text.chars().count(), "streamed response");
        Ok(text)
    }

    async fn check_connection(&self) -> Result<()> {
        let models =
            self.client.models().list().await.map_err(|e| {
                ChatError::ServiceUnavailable(format!("chat service check failed: {e}"))
            })?;
        debug!(models = models.data.len(), "chat service reachable");
        Ok(())
    }
}

fn to_request_message(
    message: &PromptMessage,
) -> std::result::Result<ChatCompletionRequestMessage, OpenAIError> {
    let content = message.content.clone();
    Ok(match message.role {
        PromptRole::System => ChatCompletionRequestSystemMessageArgs::default()
            .content(content)
            .build()?
            .into(),
        PromptRole::User => ChatCompletionRequestUserMessageArgs::default()
            .content(content)
            .build()?
            .into(),
        PromptRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
            .content(content)
            .build()?
            .into(),
    })
}

/// Transport failures mean the service is unreachable; everything else is a bad answer.
fn map_openai_error(err: OpenAIError) -> ChatError {
    match err {
        OpenAIError::Reqwest(e) => ChatError::ServiceUnavailable(e.to_string()),
        OpenAIError::ApiError(api) => ChatError::ServiceError(api.message),
        other => ChatError::ServiceError(other.to_string()),
    }
}
