//! SQLite-backed document and chunk metadata.
//!
//! The metadata store is the system of record: a document exists once its
//! row exists, whatever state the vector store is in. Content hashes drive
//! no-op detection on re-ingestion, and the hash column is only advanced by
//! [`MetadataStore::finalize_document`] after the new chunk set has been
//! written, so an import that failed halfway is re-run rather than skipped.

use crate::storage::{ChunkRecord, DocumentId, DocumentRecord};
use anyhow::{Context, Result, anyhow};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;
use strata_splitter::Tier;

/// Document/chunk metadata operations on a shared SQLite pool.
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open (creating if missing) the metadata database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("opening metadata store at {}", path.display()))?;

        let store = Self { pool };
        store.create_tables().await?;
        Ok(store)
    }

    /// Open an in-memory database, used by tests.
    pub async fn open_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        // One connection: each in-memory connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("opening in-memory metadata store")?;

        let store = Self { pool };
        store.create_tables().await?;
        Ok(store)
    }

    /// The underlying pool, shared with the vector store and task queue.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                content_hash BLOB NOT NULL,
                size INTEGER NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                document_id INTEGER NOT NULL,
                tier TEXT NOT NULL,
                seq INTEGER NOT NULL,
                content TEXT NOT NULL,
                hash BLOB NOT NULL,
                parent_heading TEXT,
                section_path TEXT,
                model_id TEXT,
                PRIMARY KEY (document_id, tier, seq),
                FOREIGN KEY (document_id) REFERENCES documents(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunks_section ON chunks(document_id, section_path)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or update the document row for `path`, returning its ID.
    ///
    /// Content, title and size are written immediately and the row is
    /// un-deleted, but `content_hash` is left untouched on update: the
    /// caller advances it with [`Self::finalize_document`] only once the
    /// chunk set matching the new content exists.
    pub async fn upsert_document(
        &self,
        path: &str,
        title: &str,
        content: &str,
        size: i64,
    ) -> Result<DocumentId> {
        let now = chrono::Utc::now().timestamp();
        let row = sqlx::query(
            r#"
            INSERT INTO documents (path, title, content, content_hash, size, deleted, created_at, updated_at)
            VALUES (?, ?, ?, zeroblob(32), ?, 0, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                size = excluded.size,
                deleted = 0,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(path)
        .bind(title)
        .bind(content)
        .bind(size)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("id"))
    }

    /// Record that the chunk set matching `content_hash` is fully written.
    pub async fn finalize_document(&self, id: DocumentId, content_hash: &[u8; 32]) -> Result<()> {
        sqlx::query("UPDATE documents SET content_hash = ?, updated_at = ? WHERE id = ?")
            .bind(content_hash.as_slice())
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_document(&self, id: DocumentId) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_document).transpose()
    }

    pub async fn get_document_by_path(&self, path: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query("SELECT * FROM documents WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_document).transpose()
    }

    /// Mark a document deleted without removing its row. Returns `false`
    /// when no document exists at `path`.
    pub async fn soft_delete(&self, path: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE documents SET deleted = 1, updated_at = ? WHERE path = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace every chunk of a document in one transaction.
    ///
    /// Delete-before-insert: the previous chunk set is removed wholesale so
    /// the three tiers can never mix generations.
    pub async fn replace_chunks(
        &self,
        document_id: DocumentId,
        chunks: &[ChunkRecord],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (document_id, tier, seq, content, hash, parent_heading, section_path, model_id)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(document_id)
            .bind(chunk.tier.as_str())
            .bind(chunk.seq as i64)
            .bind(&chunk.content)
            .bind(chunk.hash.as_slice())
            .bind(&chunk.parent_heading)
            .bind(&chunk.section_path)
            .bind(&chunk.model_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Remove every chunk of a document. Used both by deletion and by the
    /// cleanup path of a failed import.
    pub async fn delete_chunks(&self, document_id: DocumentId) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    /// Chunks of one document, optionally restricted to a tier, in
    /// `(tier, seq)` order.
    pub async fn get_chunks(
        &self,
        document_id: DocumentId,
        tier: Option<Tier>,
    ) -> Result<Vec<ChunkRecord>> {
        let rows = match tier {
            Some(tier) => {
                sqlx::query(
                    "SELECT * FROM chunks WHERE document_id = ? AND tier = ? ORDER BY seq ASC",
                )
                .bind(document_id)
                .bind(tier.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM chunks WHERE document_id = ? ORDER BY tier ASC, seq ASC")
                    .bind(document_id)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(row_to_chunk).collect()
    }

    /// Content-tier chunks of one document whose section path matches,
    /// ordered by `seq`. Drives context expansion of outline hits.
    pub async fn get_content_chunks_by_section(
        &self,
        document_id: DocumentId,
        section_path: &str,
        limit: usize,
    ) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM chunks
            WHERE document_id = ? AND tier = ? AND section_path = ?
            ORDER BY seq ASC LIMIT ?
            "#,
        )
        .bind(document_id)
        .bind(Tier::Content.as_str())
        .bind(section_path)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_chunk).collect()
    }

    /// Number of live (non-deleted) documents.
    pub async fn document_count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM documents WHERE deleted = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as usize)
    }

    pub async fn chunk_count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as usize)
    }
}

fn row_to_document(row: SqliteRow) -> Result<DocumentRecord> {
    let hash: Vec<u8> = row.get("content_hash");
    let content_hash: [u8; 32] = hash
        .try_into()
        .map_err(|_| anyhow!("content_hash column is not 32 bytes"))?;
    Ok(DocumentRecord {
        id: row.get("id"),
        path: row.get("path"),
        title: row.get("title"),
        content: row.get("content"),
        content_hash,
        size: row.get("size"),
        deleted: row.get::<i64, _>("deleted") != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_chunk(row: SqliteRow) -> Result<ChunkRecord> {
    let tier_text: String = row.get("tier");
    let tier = Tier::parse(&tier_text)
        .ok_or_else(|| anyhow!("unknown tier {tier_text:?} in chunks table"))?;
    let hash: Vec<u8> = row.get("hash");
    let hash: [u8; 32] = hash
        .try_into()
        .map_err(|_| anyhow!("chunk hash column is not 32 bytes"))?;
    Ok(ChunkRecord {
        document_id: row.get("document_id"),
        tier,
        seq: row.get::<i64, _>("seq") as usize,
        content: row.get("content"),
        hash,
        parent_heading: row.get("parent_heading"),
        section_path: row.get("section_path"),
        model_id: row.get("model_id"),
    })
}
