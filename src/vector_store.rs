//! # VectorStore
//!
//! Persistent similarity-search collection for encrypted chat history.
//!
//! Each entry pairs a **ciphertext** with the **embedding of its plaintext**. The store
//! never sees plaintext: it only ranks vectors and hands ciphertext back.
//!
//! ## Responsibilities
//! - **Persistence**: entries live in a SQLite file under the configured persist
//!   directory (created if absent). Every `insert`/`clear` is one IMMEDIATE transaction,
//!   committed with `synchronous=FULL` before the call returns.
//! - **Dimensionality**: the first insert fixes the collection's vector width; later
//!   inserts and queries of another width fail with `DimensionMismatch`. `clear` resets it.
//! - **Search**: exact scan scored by cosine similarity (or negative Euclidean distance),
//!   highest score first, equal scores in insertion order.
//!
//! ## Layout
//! ```text
//! <persist_dir>/vectors.sqlite3
//!   collections(name PK, dimension NULL)
//!   entries(id PK AUTOINCREMENT, collection, ciphertext, embedding BLOB(f32 LE), created_at)
//! ```
//!
//! ## Quick Example
//! ```no_run
//! use secure_chat::vector_store::{SqliteVectorStore, VectorStore, Metric};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = SqliteVectorStore::open("./vector_db", "encrypted_chat_history", Metric::Cosine)?;
//! let id = store.insert("gAAAA...", &[0.1, 0.9, 0.0])?;
//! let hits = store.query(&[0.1, 0.8, 0.1], 5)?;
//! assert_eq!(hits[0].id, id);
//! # Ok(()) }
//! ```

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ChatError, Result};

/// File name of the collection database inside the persist directory.
pub const DATABASE_FILE: &str = "vectors.sqlite3";

/// How long a writer waits for another session holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Store-assigned entry identifier (monotonic per database).
pub type EntryId = i64;

/// Similarity metric used to rank entries. Higher score = more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity in `[-1, 1]`; a zero vector scores `0`.
    #[default]
    Cosine,
    /// Negative Euclidean distance, so nearer vectors score higher.
    Euclidean,
}

impl Metric {
    /// Score `candidate` against `query`. Both slices must have equal length.
    pub fn score(self, query: &[f32], candidate: &[f32]) -> f32 {
        match self {
            Metric::Cosine => cosine_similarity(query, candidate),
            Metric::Euclidean => -euclidean_distance(query, candidate),
        }
    }
}

/// A ranked hit from [`VectorStore::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub id: EntryId,
    pub ciphertext: String,
    pub score: f32,
}

/// Insert-and-rank collection of (ciphertext, embedding) pairs.
pub trait VectorStore: Send {
    /// Append an entry and return its id.
    ///
    /// # Errors
    /// - `DimensionMismatch` if `vector` disagrees with the collection's width.
    /// - `StoreUnavailable` if the entry could not be durably committed.
    fn insert(&mut self, ciphertext: &str, vector: &[f32]) -> Result<EntryId>;

    /// Return at most `k` entries, most similar first; ties keep insertion order.
    ///
    /// # Errors
    /// - `InvalidInput` if `k == 0`.
    /// - `DimensionMismatch` if `vector` disagrees with the collection's width.
    /// - `StoreUnavailable` on read failure.
    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>>;

    /// Remove every entry. Idempotent.
    fn clear(&mut self) -> Result<()>;

    /// Number of stored entries.
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Width fixed by the first insert, if any.
    fn dimension(&self) -> Result<Option<usize>>;
}

/// SQLite-backed [`VectorStore`] for one named collection.
pub struct SqliteVectorStore {
    connection: Connection,
    collection: String,
    metric: Metric,
    path: PathBuf,
}

impl SqliteVectorStore {
    /// Open (or create) `collection` inside `persist_dir`.
    ///
    /// The directory is created if absent.
    ///
    /// # Errors
    /// `StoreUnavailable` if the directory or database cannot be created or opened.
    pub fn open(
        persist_dir: impl AsRef<Path>,
        collection: impl Into<String>,
        metric: Metric,
    ) -> Result<Self> {
        let dir = persist_dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| {
            ChatError::StoreUnavailable(format!("cannot create {}: {e}", dir.display()))
        })?;

        let path = dir.join(DATABASE_FILE);
        let connection = Connection::open(&path)?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        connection.pragma_update(None, "synchronous", "FULL")?;
        connection.execute_batch(
            "CREATE TABLE IF NOT EXISTS collections (
                 name      TEXT PRIMARY KEY,
                 dimension INTEGER
             );
             CREATE TABLE IF NOT EXISTS entries (
                 id         INTEGER PRIMARY KEY AUTOINCREMENT,
                 collection TEXT NOT NULL REFERENCES collections(name),
                 ciphertext TEXT NOT NULL,
                 embedding  BLOB NOT NULL,
                 created_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS entries_by_collection ON entries(collection, id);",
        )?;

        let collection = collection.into();
        connection.execute(
            "INSERT OR IGNORE INTO collections (name, dimension) VALUES (?1, NULL)",
            params![collection],
        )?;

        info!(path = %path.display(), %collection, ?metric, "vector store opened");

        Ok(Self {
            connection,
            collection,
            metric,
            path,
        })
    }

    /// Location of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn read_dimension(conn: &Connection, collection: &str) -> Result<Option<usize>> {
        let dimension: Option<i64> = conn
            .query_row(
                "SELECT dimension FROM collections WHERE name = ?1",
                params![collection],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(dimension.map(|d| d as usize))
    }
}

impl VectorStore for SqliteVectorStore {
    fn insert(&mut self, ciphertext: &str, vector: &[f32]) -> Result<EntryId> {
        if vector.is_empty() {
            return Err(ChatError::invalid_input("cannot store an empty vector"));
        }

        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        match Self::read_dimension(&tx, &self.collection)? {
            Some(expected) if expected != vector.len() => {
                return Err(ChatError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            Some(_) => {}
            None => {
                tx.execute(
                    "UPDATE collections SET dimension = ?1 WHERE name = ?2",
                    params![vector.len() as i64, self.collection],
                )?;
            }
        }

        tx.execute(
            "INSERT INTO entries (collection, ciphertext, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                self.collection,
                ciphertext,
                encode_vector(vector),
                chrono::Utc::now().to_rfc3339()
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        debug!(id, dimension = vector.len(), "entry committed");
        Ok(id)
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredEntry>> {
        if k == 0 {
            return Err(ChatError::invalid_input("k must be greater than zero"));
        }

        let Some(expected) = Self::read_dimension(&self.connection, &self.collection)? else {
            return Ok(Vec::new());
        };
        if expected != vector.len() {
            return Err(ChatError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        let mut stmt = self.connection.prepare(
            "SELECT id, ciphertext, embedding FROM entries WHERE collection = ?1 ORDER BY id ASC",
        )?;
        let mut rows = stmt.query(params![self.collection])?;

        let mut scored = Vec::new();
        while let Some(row) = rows.next()? {
            let id: EntryId = row.get(0)?;
            let ciphertext: String = row.get(1)?;
            let blob: Vec<u8> = row.get(2)?;
            let candidate = decode_vector(&blob).ok_or_else(|| {
                ChatError::StoreUnavailable(format!("entry {id} has a corrupt embedding"))
            })?;
            if candidate.len() != expected {
                return Err(ChatError::StoreUnavailable(format!(
                    "entry {id} has {} dimensions in a {expected}-dimension collection",
                    candidate.len()
                )));
            }

            let score = self.metric.score(vector, &candidate);
            scored.push(ScoredEntry {
                id,
                ciphertext,
                score,
            });
        }

        rank(&mut scored);
        scored.truncate(k);
        Ok(scored)
    }

    fn clear(&mut self) -> Result<()> {
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = tx.execute(
            "DELETE FROM entries WHERE collection = ?1",
            params![self.collection],
        )?;
        tx.execute(
            "UPDATE collections SET dimension = NULL WHERE name = ?1",
            params![self.collection],
        )?;
        tx.commit()?;

        info!(removed, collection = %self.collection, "vector store cleared");
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self.connection.query_row(
            "SELECT COUNT(*) FROM entries WHERE collection = ?1",
            params![self.collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn dimension(&self) -> Result<Option<usize>> {
        Self::read_dimension(&self.connection, &self.collection)
    }
}

/// Sort highest score first; equal (or incomparable) scores keep ascending id order.
fn rank(entries: &mut [ScoredEntry]) {
    entries.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Cosine similarity of two equal-length vectors; `0.0` if either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Euclidean distance: `sqrt(Σ (a[i] - b[i])^2)`.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &Path) -> SqliteVectorStore {
        SqliteVectorStore::open(dir, "test_collection", Metric::Cosine).unwrap()
    }

    #[test]
    fn creates_persist_directory() {
        let root = tempdir().unwrap();
        let nested = root.path().join("a/b/vector_db");
        let store = open(&nested);
        assert!(nested.join(DATABASE_FILE).exists());
        assert_eq!(store.len().unwrap(), 0);
        assert_eq!(store.dimension().unwrap(), None);
    }

    #[test]
    fn query_orders_by_similarity_then_insertion() {
        let dir = tempdir().unwrap();
        let mut store = open(dir.path());

        let far = store.insert("far", &[0.0, 1.0]).unwrap();
        let tie_first = store.insert("tie-1", &[1.0, 1.0]).unwrap();
        let exact = store.insert("exact", &[1.0, 0.0]).unwrap();
        let tie_second = store.insert("tie-2", &[2.0, 2.0]).unwrap();

        let hits = store.query(&[1.0, 0.0], 10).unwrap();
        let ids: Vec<EntryId> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![exact, tie_first, tie_second, far]);
        assert!(hits[0].score > hits[1].score);
        assert_eq!(hits[1].score, hits[2].score);
        assert_eq!(hits[0].ciphertext, "exact");
    }

    #[test]
    fn query_respects_k() {
        let dir = tempdir().unwrap();
        let mut store = open(dir.path());
        for i in 0..5 {
            store.insert(&format!("c{i}"), &[1.0, i as f32]).unwrap();
        }
        assert_eq!(store.query(&[1.0, 0.0], 2).unwrap().len(), 2);
        assert!(matches!(
            store.query(&[1.0, 0.0], 0),
            Err(ChatError::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let dir = tempdir().unwrap();
        let mut store = open(dir.path());
        store.insert("first", &[0.1, 0.2, 0.3]).unwrap();

        let err = store.insert("second", &[0.1, 0.2]).unwrap_err();
        assert!(matches!(
            err,
            ChatError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert!(matches!(
            store.query(&[1.0], 1),
            Err(ChatError::DimensionMismatch { .. })
        ));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn clear_is_idempotent_and_resets_dimension() {
        let dir = tempdir().unwrap();
        let mut store = open(dir.path());
        store.insert("a", &[1.0, 0.0]).unwrap();
        store.clear().unwrap();
        store.clear().unwrap();

        assert!(store.is_empty().unwrap());
        assert_eq!(store.dimension().unwrap(), None);
        assert!(store.query(&[1.0, 0.0], 3).unwrap().is_empty());
        store.insert("b", &[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(store.dimension().unwrap(), Some(3));
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let id = {
            let mut store = open(dir.path());
            store.insert("durable", &[0.5, 0.5]).unwrap()
        };

        let reopened = open(dir.path());
        let hits = reopened.query(&[0.5, 0.5], 1).unwrap();
        assert_eq!(hits[0].id, id);
        assert_eq!(hits[0].ciphertext, "durable");
    }

    #[test]
    fn collections_are_isolated() {
        let dir = tempdir().unwrap();
        let mut a = SqliteVectorStore::open(dir.path(), "a", Metric::Cosine).unwrap();
        let b = SqliteVectorStore::open(dir.path(), "b", Metric::Cosine).unwrap();
        a.insert("only in a", &[1.0]).unwrap();
        assert_eq!(a.len().unwrap(), 1);
        assert_eq!(b.len().unwrap(), 0);
    }

    #[test]
    fn euclidean_metric_prefers_nearest() {
        let dir = tempdir().unwrap();
        let mut store = SqliteVectorStore::open(dir.path(), "l2", Metric::Euclidean).unwrap();
        let near = store.insert("near", &[1.0, 1.0]).unwrap();
        store.insert("far", &[10.0, 10.0]).unwrap();
        let hits = store.query(&[0.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].id, near);
    }

    #[test]
    fn similarity_helpers() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
        assert_eq!(decode_vector(&encode_vector(&[1.5, -2.0])).unwrap(), vec![1.5, -2.0]);
        assert!(decode_vector(&[0, 1, 2]).is_none());
    }
}
