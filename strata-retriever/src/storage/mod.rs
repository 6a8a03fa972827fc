//! Storage layer: document/chunk metadata and the vector store adapter.
//!
//! Two stores back the pipeline:
//!
//! - **MetadataStore**: relational record per document (path, content hash,
//!   size, soft-delete flag) and per chunk (tier, tier-local index, hash,
//!   section path). Used to detect no-op re-ingestion and to reverse-map a
//!   vector hit back to its parent document.
//! - **VectorStore**: embeddings keyed by the composite
//!   `{document_id}_{seq}_{tier}`, with tier-filtered similarity search and
//!   bulk delete by document. Treated as eventually consistent — the
//!   retrieval engine's reverse-lookup filter compensates for lag.
//!
//! Both concrete implementations share one SQLite pool (WAL mode, busy
//! timeout, foreign keys). Re-ingestion is always delete-before-insert,
//! never an incremental patch, so the three tiers stay mutually consistent.

use anyhow::Result;
use async_trait::async_trait;
use half::f16;
use strata_splitter::Tier;

pub mod metadata_store;
pub mod vector_store;

pub use metadata_store::MetadataStore;
pub use vector_store::SqliteVectorStore;

/// Database ID for a document.
pub type DocumentId = i64;

/// One document row in the metadata store.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: DocumentId,
    /// Stable logical path, the unique external key
    pub path: String,
    pub title: String,
    /// Raw text content; kept so re-chunking never re-reads the source
    pub content: String,
    /// blake3 hash of the content, for no-op re-ingestion detection
    pub content_hash: [u8; 32],
    pub size: i64,
    pub deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl DocumentRecord {
    pub fn is_live(&self) -> bool {
        !self.deleted
    }
}

/// One chunk row in the metadata store: the non-vector fields mirrored from
/// the vector store, plus the linking metadata the retrieval engine expands
/// context with.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub document_id: DocumentId,
    pub tier: Tier,
    /// Tier-local index; `(document_id, tier, seq)` is unique
    pub seq: usize,
    pub content: String,
    /// blake3 hash of the chunk text
    pub hash: [u8; 32],
    pub parent_heading: Option<String>,
    pub section_path: Option<String>,
    /// Identifier of the embedding model that vectorized this chunk
    pub model_id: Option<String>,
}

/// Composite vector-store key for one chunk.
pub fn vector_key(document_id: DocumentId, seq: usize, tier: Tier) -> String {
    format!("{document_id}_{seq}_{tier}")
}

/// One entry written to the vector store.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub document_id: DocumentId,
    pub tier: Tier,
    pub seq: usize,
    pub content: String,
    pub embedding: Vec<f16>,
    pub model_id: String,
}

impl VectorRecord {
    pub fn key(&self) -> String {
        vector_key(self.document_id, self.seq, self.tier)
    }
}

/// One similarity-search hit out of the vector store. Distance is
/// `1 - cosine_similarity`: smaller is more similar.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub document_id: DocumentId,
    pub tier: Tier,
    pub seq: usize,
    pub content: String,
    pub distance: f32,
}

/// Vector storage operations, behind a trait so the SQLite adapter can be
/// swapped for a dedicated vector database.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert a batch of entries under their composite keys.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Similarity search filtered to one tier, best `limit` hits by
    /// ascending distance.
    async fn search(&self, query: &[f16], tier: Tier, limit: usize) -> Result<Vec<VectorHit>>;

    /// Delete every entry belonging to a document; returns the count.
    async fn delete_document(&self, document_id: DocumentId) -> Result<usize>;

    /// Total number of stored vectors.
    async fn count(&self) -> Result<usize>;
}
