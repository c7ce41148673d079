//! Deterministic fakes shared by the pipeline and chat tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::api::ChatAgent;
use crate::brain::Memory;
use crate::embeddings::Embedder;
use crate::error::{ChatError, Result};
use crate::frontend::ChatFrontend;
use crate::session::{Message, Role};
use crate::vector_store::{EntryId, ScoredEntry, VectorStore};

pub const BOW_DIMENSION: usize = 64;

/// Hashes lowercase words into a fixed number of buckets.
pub struct BagOfWordsEmbedder {
    unavailable: bool,
}

impl BagOfWordsEmbedder {
    pub fn new() -> Self {
        Self { unavailable: false }
    }

    /// Every call fails as if the service were down.
    pub fn unavailable() -> Self {
        Self { unavailable: true }
    }
}

fn bucket(word: &str) -> usize {
    // FNV-1a
    let hash = word
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325u64, |h, b| {
            (h ^ b as u64).wrapping_mul(0x0100_0000_01b3)
        });
    (hash % BOW_DIMENSION as u64) as usize
}

#[async_trait]
impl Embedder for BagOfWordsEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.unavailable {
            return Err(ChatError::ServiceUnavailable("connection refused".into()));
        }
        let mut vector = vec![0.0f32; BOW_DIMENSION];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[bucket(&word.to_lowercase())] += 1.0;
        }
        Ok(vector)
    }

    fn dimension(&self) -> Option<usize> {
        Some(BOW_DIMENSION)
    }
}

/// A store whose writes always fail.
pub struct FailingStore;

impl VectorStore for FailingStore {
    fn insert(&mut self, _ciphertext: &str, _vector: &[f32]) -> Result<EntryId> {
        Err(ChatError::StoreUnavailable("disk full".into()))
    }

    fn query(&self, _vector: &[f32], _k: usize) -> Result<Vec<ScoredEntry>> {
        Ok(Vec::new())
    }

    fn clear(&mut self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(0)
    }

    fn dimension(&self) -> Result<Option<usize>> {
        Ok(None)
    }
}

/// What a [`ScriptedAgent`] was asked.
#[derive(Debug, Clone)]
pub struct AgentCall {
    pub user_text: String,
    pub context: Vec<String>,
    pub memory: Vec<Memory>,
}

/// Replays queued replies and records every request.
#[derive(Clone, Default)]
pub struct ScriptedAgent {
    replies: Arc<Mutex<VecDeque<Result<String>>>>,
    pub calls: Arc<Mutex<Vec<AgentCall>>>,
}

impl ScriptedAgent {
    pub fn replying(replies: impl IntoIterator<Item = Result<String>>) -> Self {
        Self {
            replies: Arc::new(Mutex::new(replies.into_iter().collect())),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<AgentCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatAgent for ScriptedAgent {
    async fn respond(&self, user_text: &str, context: &[String], memory: &[Memory]) -> Result<String> {
        self.calls.lock().unwrap().push(AgentCall {
            user_text: user_text.to_string(),
            context: context.to_vec(),
            memory: memory.to_vec(),
        });
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("ok".to_string()))
    }

    async fn check_connection(&self) -> Result<()> {
        Ok(())
    }
}

/// Everything a [`RecordingFrontend`] was asked to show.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontendEvent {
    Message(Role, String),
    Chunk(Role, String),
    EndStream,
    Notice(String),
    Error(String),
}

/// Feeds scripted input lines and records output.
#[derive(Default)]
pub struct RecordingFrontend {
    pub inputs: VecDeque<String>,
    pub events: Vec<FrontendEvent>,
}

impl RecordingFrontend {
    pub fn with_inputs<I, S>(inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            events: Vec::new(),
        }
    }

    /// Concatenated streamed chunks.
    pub fn streamed(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                FrontendEvent::Chunk(_, chunk) => Some(chunk.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                FrontendEvent::Error(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn notices(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                FrontendEvent::Notice(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

impl ChatFrontend for RecordingFrontend {
    fn display_message(&mut self, message: &Message) -> Result<()> {
        self.events
            .push(FrontendEvent::Message(message.role, message.content.clone()));
        Ok(())
    }

    fn stream_message(&mut self, role: Role, chunk: &str) -> Result<()> {
        self.events.push(FrontendEvent::Chunk(role, chunk.to_string()));
        Ok(())
    }

    fn end_stream(&mut self) -> Result<()> {
        self.events.push(FrontendEvent::EndStream);
        Ok(())
    }

    fn display_notice(&mut self, notice: &str) -> Result<()> {
        self.events.push(FrontendEvent::Notice(notice.to_string()));
        Ok(())
    }

    fn display_error(&mut self, error: &str) -> Result<()> {
        self.events.push(FrontendEvent::Error(error.to_string()));
        Ok(())
    }

    fn get_user_input(&mut self) -> Result<Option<String>> {
        Ok(self.inputs.pop_front())
    }
}
