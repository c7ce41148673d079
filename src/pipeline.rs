//! # Secure message pipeline
//!
//! Glue between the cipher, the embedding service and the vector store.
//!
//! **Write flow** (`Received → Encrypted → Embedded → Stored`): seal the plaintext under
//! the session key, embed the *plaintext*, then insert `(ciphertext, embedding)`. A failure
//! at any step abandons the write and is reported as
//! [`ChatError::PersistenceSkipped`] carrying the last stage reached. Nothing is retried or
//! rolled back; the caller decides whether the message is still shown.
//!
//! **Read flow** (`QueryReceived → QueryEmbedded → Searched → Decrypted`): embed the query,
//! fetch the `k` nearest ciphertexts, and open each one. Entries that fail to open are
//! collected in [`Retrieval::skipped`] and logged; they never abort the batch. Survivors
//! keep the store's ranking.

use tracing::{debug, warn};

use crate::cipher::{self, Ciphertext};
use crate::embeddings::Embedder;
use crate::error::{ChatError, Result, WriteStage};
use crate::session::Session;
use crate::vector_store::{EntryId, VectorStore};

/// A decrypted neighbour returned by the read flow.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedMessage {
    pub id: EntryId,
    pub content: String,
    pub score: f32,
}

/// A neighbour that could not be opened.
#[derive(Debug)]
pub struct SkippedEntry {
    pub id: EntryId,
    pub error: ChatError,
}

/// Result of the read flow.
#[derive(Debug, Default)]
pub struct Retrieval {
    /// Decrypted neighbours, most similar first.
    pub messages: Vec<RetrievedMessage>,
    /// Entries dropped during decryption.
    pub skipped: Vec<SkippedEntry>,
}

impl Retrieval {
    /// Plaintexts in ranking order.
    pub fn contents(&self) -> Vec<String> {
        self.messages.iter().map(|m| m.content.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Owns the embedding and store handles for a chat session.
pub struct SecurePipeline {
    embedder: Box<dyn Embedder>,
    store: Box<dyn VectorStore>,
}

impl SecurePipeline {
    pub fn new(embedder: Box<dyn Embedder>, store: Box<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Encrypt, embed and store `plaintext` under `session`'s key.
    ///
    /// # Errors
    /// Always `PersistenceSkipped`, with the stage the message reached and the cause.
    pub async fn write(&mut self, session: &Session, plaintext: &str) -> Result<EntryId> {
        let sealed = cipher::encrypt(plaintext, session.key())
            .map_err(|e| ChatError::persistence_skipped(WriteStage::Received, e))?;

        let vector = self
            .embedder
            .embed(plaintext)
            .await
            .map_err(|e| ChatError::persistence_skipped(WriteStage::Encrypted, e))?;

        let id = self
            .store
            .insert(sealed.as_str(), &vector)
            .map_err(|e| ChatError::persistence_skipped(WriteStage::Embedded, e))?;

        debug!(
            id,
            plaintext_bytes = plaintext.len(),
            ciphertext_bytes = sealed.len(),
            expansion = sealed.len() as f64 / plaintext.len().max(1) as f64,
            "stored encrypted message"
        );
        Ok(id)
    }

    /// Retrieve and decrypt up to `k` stored messages most similar to `query`.
    ///
    /// # Errors
    /// - `InvalidInput` if `k == 0`.
    /// - Embedding errors (`ServiceUnavailable`, `ServiceError`, `InvalidResponse`).
    /// - Store errors (`DimensionMismatch`, `StoreUnavailable`).
    pub async fn read(&self, session: &Session, query: &str, k: usize) -> Result<Retrieval> {
        if k == 0 {
            return Err(ChatError::invalid_input("k must be greater than zero"));
        }
        if self.store.is_empty()? {
            return Ok(Retrieval::default());
        }

        let vector = self.embedder.embed(query).await?;
        let hits = self.store.query(&vector, k)?;

        let mut retrieval = Retrieval::default();
        for hit in hits {
            let sealed = Ciphertext::from_stored(hit.ciphertext);
            match cipher::decrypt(sealed.as_str(), session.key()) {
                Ok(content) => retrieval.messages.push(RetrievedMessage {
                    id: hit.id,
                    content,
                    score: hit.score,
                }),
                Err(error) => {
                    warn!(id = hit.id, "skipping stored entry: {error}");
                    retrieval.skipped.push(SkippedEntry { id: hit.id, error });
                }
            }
        }

        debug!(
            found = retrieval.messages.len(),
            skipped = retrieval.skipped.len(),
            "retrieved context"
        );
        Ok(retrieval)
    }

    /// Remove every entry from the collection.
    pub fn clear_store(&mut self) -> Result<()> {
        self.store.clear()
    }

    /// Entries currently in the collection.
    pub fn stored_entries(&self) -> Result<usize> {
        self.store.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecureChatConfig;
    use crate::test_support::{BagOfWordsEmbedder, FailingStore};
    use crate::vector_store::{Metric, SqliteVectorStore};
    use tempfile::tempdir;

    const COLLECTION: &str = "test_history";

    fn pipeline_at(dir: &std::path::Path) -> SecurePipeline {
        let store = SqliteVectorStore::open(dir, COLLECTION, Metric::Cosine).unwrap();
        SecurePipeline::new(Box::new(BagOfWordsEmbedder::new()), Box::new(store))
    }

    fn session() -> Session {
        Session::new(&SecureChatConfig::default())
    }

    #[tokio::test]
    async fn stores_ciphertext_and_retrieves_plaintext() {
        let dir = tempdir().unwrap();
        let mut pipeline = pipeline_at(dir.path());
        let session = session();

        pipeline.write(&session, "my cat is called Miso").await.unwrap();
        pipeline.write(&session, "the router firmware is outdated").await.unwrap();
        assert_eq!(pipeline.stored_entries().unwrap(), 2);

        let retrieval = pipeline.read(&session, "what is my cat called", 1).await.unwrap();
        assert_eq!(retrieval.contents(), ["my cat is called Miso"]);
        assert!(retrieval.skipped.is_empty());

        // the database never holds plaintext
        let raw = SqliteVectorStore::open(dir.path(), COLLECTION, Metric::Cosine)
            .unwrap()
            .query(&BagOfWordsEmbedder::new().embed("cat").await.unwrap(), 5)
            .unwrap();
        assert!(raw.iter().all(|hit| !hit.ciphertext.contains("Miso")));
    }

    #[tokio::test]
    async fn one_corrupted_entry_is_skipped_among_five() {
        let dir = tempdir().unwrap();
        let mut pipeline = pipeline_at(dir.path());
        let session = session();

        for text in [
            "backup keys offline",
            "rotate backup passwords",
            "backup drives encrypted",
            "test backup restores",
        ] {
            pipeline.write(&session, text).await.unwrap();
        }

        // a second handle on the same collection writes a broken token
        let mut other = SqliteVectorStore::open(dir.path(), COLLECTION, Metric::Cosine).unwrap();
        let vector = BagOfWordsEmbedder::new().embed("backup").await.unwrap();
        let bad_id = other.insert("not-a-valid-token", &vector).unwrap();

        let retrieval = pipeline.read(&session, "backup", 5).await.unwrap();
        assert_eq!(retrieval.messages.len(), 4);
        assert_eq!(retrieval.skipped.len(), 1);
        assert_eq!(retrieval.skipped[0].id, bad_id);
        assert!(matches!(retrieval.skipped[0].error, ChatError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn entries_from_another_session_do_not_decrypt() {
        let dir = tempdir().unwrap();
        let mut pipeline = pipeline_at(dir.path());
        let earlier = session();
        let current = session();

        pipeline.write(&earlier, "old secret plan").await.unwrap();
        pipeline.write(&current, "new secret plan").await.unwrap();

        let retrieval = pipeline.read(&current, "secret plan", 5).await.unwrap();
        assert_eq!(retrieval.contents(), ["new secret plan"]);
        assert_eq!(retrieval.skipped.len(), 1);
        assert!(matches!(
            retrieval.skipped[0].error,
            ChatError::AuthenticationFailure
        ));
    }

    #[tokio::test]
    async fn read_keeps_store_ranking() {
        let dir = tempdir().unwrap();
        let mut pipeline = pipeline_at(dir.path());
        let session = session();

        pipeline.write(&session, "firewall").await.unwrap();
        pipeline.write(&session, "firewall rules").await.unwrap();
        pipeline.write(&session, "unrelated gardening").await.unwrap();

        let retrieval = pipeline.read(&session, "firewall", 3).await.unwrap();
        assert_eq!(retrieval.messages[0].content, "firewall");
        let scores: Vec<f32> = retrieval.messages.iter().map(|m| m.score).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[tokio::test]
    async fn store_failure_is_reported_as_persistence_skipped() {
        let mut pipeline = SecurePipeline::new(
            Box::new(BagOfWordsEmbedder::new()),
            Box::new(FailingStore),
        );
        let err = pipeline.write(&session(), "hello").await.unwrap_err();
        match err {
            ChatError::PersistenceSkipped { stage, source } => {
                assert_eq!(stage, WriteStage::Embedded);
                assert!(matches!(*source, ChatError::StoreUnavailable(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn embedding_failure_is_reported_after_encryption() {
        let dir = tempdir().unwrap();
        let store = SqliteVectorStore::open(dir.path(), COLLECTION, Metric::Cosine).unwrap();
        let mut pipeline = SecurePipeline::new(
            Box::new(BagOfWordsEmbedder::unavailable()),
            Box::new(store),
        );

        let err = pipeline.write(&session(), "hello").await.unwrap_err();
        assert!(matches!(
            err,
            ChatError::PersistenceSkipped {
                stage: WriteStage::Encrypted,
                ..
            }
        ));
        assert_eq!(pipeline.stored_entries().unwrap(), 0);
    }

    #[tokio::test]
    async fn read_on_empty_store_skips_embedding() {
        let dir = tempdir().unwrap();
        let store = SqliteVectorStore::open(dir.path(), COLLECTION, Metric::Cosine).unwrap();
        let pipeline = SecurePipeline::new(
            Box::new(BagOfWordsEmbedder::unavailable()),
            Box::new(store),
        );

        let retrieval = pipeline.read(&session(), "anything", 5).await.unwrap();
        assert!(retrieval.is_empty());
        assert!(matches!(
            pipeline.read(&session(), "anything", 0).await,
            Err(ChatError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn clear_store_empties_the_collection() {
        let dir = tempdir().unwrap();
        let mut pipeline = pipeline_at(dir.path());
        let session = session();
        pipeline.write(&session, "forget me").await.unwrap();

        pipeline.clear_store().unwrap();
        assert_eq!(pipeline.stored_entries().unwrap(), 0);
        assert!(pipeline.read(&session, "forget", 5).await.unwrap().is_empty());
    }
}
