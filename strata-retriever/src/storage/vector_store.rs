//! SQLite-backed vector store adapter.
//!
//! Embeddings are stored half-precision as raw little-endian blobs and
//! searched with a brute-force cosine scan, filtered to one tier per query.
//! Fine for the corpus sizes this targets; the [`VectorStore`] trait is the
//! seam for swapping in an ANN index later.

use crate::storage::{DocumentId, VectorHit, VectorRecord, VectorStore};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use half::f16;
use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use strata_splitter::Tier;

/// Vector storage on a shared SQLite pool.
#[derive(Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Attach to an existing pool and ensure the vectors table exists.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.create_tables().await?;
        Ok(store)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vectors (
                key TEXT PRIMARY KEY,
                document_id INTEGER NOT NULL,
                tier TEXT NOT NULL,
                seq INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                model_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_tier ON vectors(tier)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_document ON vectors(document_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            let blob = embedding_to_blob(&record.embedding);
            sqlx::query(
                r#"
                INSERT INTO vectors (key, document_id, tier, seq, content, embedding, model_id)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    content = excluded.content,
                    embedding = excluded.embedding,
                    model_id = excluded.model_id
                "#,
            )
            .bind(record.key())
            .bind(record.document_id)
            .bind(record.tier.as_str())
            .bind(record.seq as i64)
            .bind(&record.content)
            .bind(blob)
            .bind(&record.model_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn search(&self, query: &[f16], tier: Tier, limit: usize) -> Result<Vec<VectorHit>> {
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT document_id, tier, seq, content, embedding FROM vectors WHERE tier = ?",
        )
        .bind(tier.as_str())
        .fetch_all(&self.pool)
        .await
        .context("scanning vectors")?;

        let mut hits = Vec::new();
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            let embedding = blob_to_embedding(&blob)?;
            if embedding.len() != query.len() {
                // Stale generation from a different model; skip rather than fail.
                continue;
            }
            let distance = cosine_distance(query, &embedding);
            hits.push(VectorHit {
                document_id: row.get("document_id"),
                tier,
                seq: row.get::<i64, _>("seq") as usize,
                content: row.get("content"),
                distance,
            });
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete_document(&self, document_id: DocumentId) -> Result<usize> {
        let result = sqlx::query("DELETE FROM vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as usize)
    }
}

fn embedding_to_blob(embedding: &[f16]) -> Vec<u8> {
    bytemuck::cast_slice(embedding).to_vec()
}

fn blob_to_embedding(blob: &[u8]) -> Result<Vec<f16>> {
    if blob.len() % 2 != 0 {
        return Err(anyhow!("embedding blob has odd length {}", blob.len()));
    }
    // Bytewise decode: the blob may not be 2-byte aligned.
    Ok(blob
        .chunks_exact(2)
        .map(|pair| f16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// `1 - cosine_similarity`, computed in f32. Zero-norm inputs get the
/// maximum distance instead of a NaN.
fn cosine_distance(a: &[f16], b: &[f16]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = x.to_f32();
        let y = y.to_f32();
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}
