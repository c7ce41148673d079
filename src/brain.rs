//! # Brain module (running conversation memory)
//!
//! The **brain** is the in-process memory of the current session: the ordered sequence of
//! prior turns that is replayed to the model on every request. It is intentionally simple:
//!
//! - Stores a queue (`VecDeque`) of [`Memory`] items (role + plaintext content).
//! - Enforces a token budget (`max_tokens`) by evicting the oldest turns.
//! - Never evicts the newest turn, even when that single turn is over budget.
//!
//! Long-term recall is not handled here; the encrypted vector store supplies that
//! through the pipeline's read flow.
//!
//! ## Notes on token limiting
//! Tokens are counted with `tiktoken_rs::cl100k_base` including special tokens. If the
//! BPE tables cannot be loaded, a rough 4-characters-per-token estimate is used instead.

use std::collections::VecDeque;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tiktoken_rs::{CoreBPE, cl100k_base};

use crate::session::Role;

static BPE: Lazy<Option<CoreBPE>> = Lazy::new(|| match cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::warn!("cl100k_base unavailable, estimating tokens: {e}");
        None
    }
});

/// Count tokens in `text` the way the memory budget sees them.
pub fn count_tokens(text: &str) -> usize {
    match BPE.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count().div_ceil(4),
    }
}

/// A single conversational memory item (role + content).
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Memory {
    /// Who said it.
    pub role: Role,
    /// The plaintext content.
    pub content: String,
}

impl Memory {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Token-budgeted running memory.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: VecDeque<(Memory, usize)>,
    max_tokens: usize,
    total_tokens: usize,
}

impl ConversationMemory {
    /// Create an empty memory with the given token budget.
    pub fn new(max_tokens: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_tokens,
            total_tokens: 0,
        }
    }

    /// Push a turn and evict the oldest turns until the budget is met.
    ///
    /// Returns how many turns were evicted.
    pub fn add(&mut self, memory: Memory) -> usize {
        let tokens = count_tokens(&memory.content);
        self.turns.push_back((memory, tokens));
        self.total_tokens += tokens;
        self.enforce_token_limit()
    }

    fn enforce_token_limit(&mut self) -> usize {
        let mut evicted = 0;
        while self.total_tokens > self.max_tokens && self.turns.len() > 1 {
            if let Some((_, tokens)) = self.turns.pop_front() {
                self.total_tokens -= tokens;
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.turns.len(), "memory over budget");
        }
        evicted
    }

    /// Prior turns, oldest first.
    pub fn turns(&self) -> Vec<Memory> {
        self.turns.iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Tokens currently held.
    pub fn token_count(&self) -> usize {
        self.total_tokens
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.total_tokens = 0;
    }
}
