//! # SQLite Document Store
//!
//! This crate provides an SQLite-based implementation of the `DocumentStore` trait.
//!
//! ## SQLiteDocumentStore
//!
//! Persistent storage for turn and summary documents with their embeddings. Each collection
//! is one table, so the turn store and the summary store can share a database file.
//!
//! **Advantages**:
//! - Persistent storage (data survives restarts)
//! - `put_batch` runs in a single transaction, so a turn pair is written all-or-nothing
//! - No external database required
//!
//! **Limitations**:
//! - Similarity search loads every embedding and scores in process
//!
//! ## Example
//!
//! ```rust,no_run
//! use memory_sqlite::SQLiteDocumentStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), anyhow::Error> {
//!     let turns = SQLiteDocumentStore::new("memory.db", "turns").await?;
//!     let summaries = SQLiteDocumentStore::from_pool(turns.pool().clone(), "summaries").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE {collection} (
//!     id TEXT PRIMARY KEY,        -- string-encoded integer
//!     seq INTEGER NOT NULL,       -- same integer, for ordering
//!     content TEXT NOT NULL,
//!     metadata TEXT NOT NULL,     -- JSON
//!     embedding BLOB NOT NULL     -- little-endian f32
//! );
//! ```

use anyhow::Context as _;
use async_trait::async_trait;
use memory_core::{rank_by_distance, Document, DocumentStore, ScoredDocument};
use sqlx::{sqlite::SqliteConnectOptions, sqlite::SqliteRow, Row, SqlitePool};
use tracing::{debug, info};

/// SQLite binds at most 999 parameters per statement on older builds.
const MAX_IDS_PER_QUERY: usize = 500;

/// SQLite-based document store for one collection.
#[derive(Clone)]
pub struct SQLiteDocumentStore {
    pool: SqlitePool,
    collection: String,
}

impl SQLiteDocumentStore {
    /// Opens (creating if missing) the database file and the collection table.
    ///
    /// # Errors
    ///
    /// Returns an error if the collection name is not `[A-Za-z0-9_]+`, or if the database
    /// connection or schema initialization fails.
    pub async fn new(database_url: &str, collection: &str) -> Result<Self, anyhow::Error> {
        info!(database_url, collection, "Opening SQLite document store");
        let options = SqliteConnectOptions::new()
            .create_if_missing(true)
            .filename(database_url);

        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("failed to open SQLite database {database_url}"))?;

        Self::from_pool(pool, collection).await
    }

    /// Uses an existing pool, e.g. to keep the turn and summary collections in one file.
    pub async fn from_pool(pool: SqlitePool, collection: &str) -> Result<Self, anyhow::Error> {
        validate_collection(collection)?;
        let store = Self {
            pool,
            collection: collection.to_string(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Initializes the collection table and its ordering index.
    async fn init_schema(&self) -> Result<(), anyhow::Error> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
            self.collection
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{0}_seq ON {0}(seq)",
            self.collection
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn insert_sql(&self) -> String {
        format!(
            "INSERT OR REPLACE INTO {} (id, seq, content, metadata, embedding) VALUES (?1, ?2, ?3, ?4, ?5)",
            self.collection
        )
    }

    /// Converts a database row to a Document.
    ///
    /// Embeddings are read as little-endian f32 (4 bytes per float).
    fn row_to_document(row: &SqliteRow) -> Result<Document, anyhow::Error> {
        let id: String = row.try_get("id")?;
        let content: String = row.try_get("content")?;
        let metadata: String = row.try_get("metadata")?;
        let embedding_blob: Vec<u8> = row.try_get("embedding")?;

        let id: u64 = id
            .parse()
            .with_context(|| format!("non-numeric document id {id:?}"))?;
        let metadata: serde_json::Value = serde_json::from_str(&metadata)
            .with_context(|| format!("invalid metadata JSON for document {id}"))?;

        Ok(Document {
            id,
            content,
            embedding: decode_embedding(&embedding_blob),
            metadata,
        })
    }
}

#[async_trait]
impl DocumentStore for SQLiteDocumentStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn put(&self, document: Document) -> Result<(), anyhow::Error> {
        sqlx::query(&self.insert_sql())
            .bind(document.id.to_string())
            .bind(document.id as i64)
            .bind(&document.content)
            .bind(document.metadata.to_string())
            .bind(encode_embedding(&document.embedding))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All documents are written in one transaction; on error nothing is committed.
    async fn put_batch(&self, documents: Vec<Document>) -> Result<(), anyhow::Error> {
        let sql = self.insert_sql();
        let mut tx = self.pool.begin().await?;
        for document in &documents {
            sqlx::query(&sql)
                .bind(document.id.to_string())
                .bind(document.id as i64)
                .bind(&document.content)
                .bind(document.metadata.to_string())
                .bind(encode_embedding(&document.embedding))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        debug!(collection = %self.collection, count = documents.len(), "put_batch committed");
        Ok(())
    }

    async fn get_by_ids(&self, ids: &[u64]) -> Result<Vec<Document>, anyhow::Error> {
        let mut documents = Vec::new();
        for chunk in ids.chunks(MAX_IDS_PER_QUERY) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT id, content, metadata, embedding FROM {} WHERE id IN ({}) ORDER BY seq",
                self.collection, placeholders
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(id.to_string());
            }
            for row in query.fetch_all(&self.pool).await? {
                documents.push(Self::row_to_document(&row)?);
            }
        }
        documents.sort_by_key(|d| d.id);
        documents.dedup_by_key(|d| d.id);
        Ok(documents)
    }

    /// Loads every embedding and ranks in process: O(n * d).
    async fn nearest_neighbors(
        &self,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredDocument>, anyhow::Error> {
        let rows = sqlx::query(&format!(
            "SELECT id, content, metadata, embedding FROM {}",
            self.collection
        ))
        .fetch_all(&self.pool)
        .await?;

        let documents = rows
            .iter()
            .map(Self::row_to_document)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rank_by_distance(documents, query_embedding, k))
    }

    async fn delete(&self, id: u64) -> Result<(), anyhow::Error> {
        sqlx::query(&format!("DELETE FROM {} WHERE id = ?1", self.collection))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize, anyhow::Error> {
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", self.collection))
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as usize)
    }

    async fn clear(&self) -> Result<(), anyhow::Error> {
        sqlx::query(&format!("DELETE FROM {}", self.collection))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Collection names are interpolated into SQL, so only `[A-Za-z0-9_]+` is accepted.
fn validate_collection(name: &str) -> Result<(), anyhow::Error> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!("invalid collection name {name:?}: expected [A-Za-z0-9_]+");
    }
    Ok(())
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
