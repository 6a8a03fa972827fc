//! # strata-retriever
//!
//! Document ingestion and multi-tier semantic retrieval on SQLite.
//!
//! Documents flow in through a durable, prioritized task queue drained by a
//! single-owner processor: content is hashed for no-op detection, split
//! into three tiers (summary, outline, content) by `strata-splitter`,
//! embedded through a `strata-gateway` provider, and written to a metadata
//! store and a vector store sharing one database. Retrieval searches all
//! three tiers, filters hits whose documents are gone, expands coarse hits
//! with finer-grained context from the same document, and ranks by cosine
//! distance.
//!
//! [`StrataEngine`] is the single entry point; the submodules are public
//! for callers that need to compose the parts differently.

pub mod cache;
pub mod config;
pub mod engine;
pub mod ingest;
pub mod search;
pub mod storage;

pub use config::StrataConfig;
pub use engine::{EngineStats, StrataEngine};
pub use ingest::{
    ContentSource, DrainStats, FsContentSource, IngestProcessor, TaskKind, TaskStatus,
};
pub use search::{DocumentOverview, RetrievalEngine, SearchHit};
pub use storage::{
    ChunkRecord, DocumentId, DocumentRecord, MetadataStore, SqliteVectorStore, VectorHit,
    VectorRecord, VectorStore,
};
