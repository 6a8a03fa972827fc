//! The engine facade wiring stores, queue, processor and retrieval into one
//! handle.
//!
//! Writes are asynchronous: callers enqueue work and a background drain
//! picks it up. Reads go straight to the stores. The facade also runs the
//! startup recovery pass (taking over a stale lock and resetting stranded
//! tasks) before handing the engine out.

use crate::config::StrataConfig;
use crate::ingest::lock::{OwnerLiveness, PidLiveness};
use crate::ingest::processor::{DrainStats, IngestProcessor};
use crate::ingest::source::ContentSource;
use crate::ingest::task_queue::{QueueStats, TaskKind, TaskQueue};
use crate::search::{DocumentOverview, RetrievalEngine, SearchHit};
use crate::storage::{MetadataStore, SqliteVectorStore, VectorStore};
use anyhow::Result;
use half::f16;
use std::sync::Arc;
use strata_gateway::{CompletionProvider, EmbeddingProvider};
use tracing::{error, info};

/// Engine-wide counters, for the stats surface.
#[derive(Debug, Clone, Copy)]
pub struct EngineStats {
    pub documents: usize,
    pub chunks: usize,
    pub vectors: usize,
    pub queue: QueueStats,
}

/// One handle over the whole pipeline.
pub struct StrataEngine {
    config: StrataConfig,
    metadata: MetadataStore,
    vectors: Arc<dyn VectorStore>,
    queue: TaskQueue,
    processor: Arc<IngestProcessor>,
    retrieval: RetrievalEngine,
    embedding: Arc<dyn EmbeddingProvider>,
}

impl StrataEngine {
    /// Open the engine against the database named in the config.
    pub async fn open(
        config: StrataConfig,
        source: Arc<dyn ContentSource>,
        completion: Option<Arc<dyn CompletionProvider>>,
        embedding: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let metadata = MetadataStore::open(&config.db_path).await?;
        Self::from_parts(config, metadata, source, completion, embedding).await
    }

    /// In-memory variant for tests.
    pub async fn open_memory(
        config: StrataConfig,
        source: Arc<dyn ContentSource>,
        completion: Option<Arc<dyn CompletionProvider>>,
        embedding: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let metadata = MetadataStore::open_memory().await?;
        Self::from_parts(config, metadata, source, completion, embedding).await
    }

    async fn from_parts(
        config: StrataConfig,
        metadata: MetadataStore,
        source: Arc<dyn ContentSource>,
        completion: Option<Arc<dyn CompletionProvider>>,
        embedding: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let vectors: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::new(metadata.pool().clone()).await?);
        let queue = TaskQueue::new(metadata.pool().clone()).await?;
        let liveness: Arc<dyn OwnerLiveness> = Arc::new(PidLiveness);

        let processor = Arc::new(IngestProcessor::new(
            config.clone(),
            metadata.clone(),
            vectors.clone(),
            queue.clone(),
            source,
            completion,
            embedding.clone(),
            liveness,
        ));
        let retrieval = RetrievalEngine::new(
            metadata.clone(),
            vectors.clone(),
            config.search_threshold,
            config.cache_ttl(),
        );

        let reset = processor.recover_on_startup().await?;
        if reset > 0 {
            info!(reset, "startup recovery reset stranded tasks");
        }

        Ok(Self {
            config,
            metadata,
            vectors,
            queue,
            processor,
            retrieval,
            embedding,
        })
    }

    /// Queue a document import and kick off a background drain. Returns the
    /// task ID; the import itself completes asynchronously.
    pub async fn enqueue_import(self: &Arc<Self>, path: &str, priority: i64) -> Result<i64> {
        let id = self.queue.enqueue(path, TaskKind::FileImport, priority).await?;
        self.spawn_drain();
        Ok(id)
    }

    /// Queue a re-vectorization of stored content, e.g. after an embedding
    /// model change.
    pub async fn enqueue_reindex(self: &Arc<Self>, path: &str, priority: i64) -> Result<i64> {
        let id = self.queue.enqueue(path, TaskKind::VectorIndex, priority).await?;
        self.spawn_drain();
        Ok(id)
    }

    fn spawn_drain(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.processor.drain_all().await {
                error!("background drain failed: {e:#}");
            }
        });
    }

    /// Run one drain pass inline. The deterministic alternative to the
    /// background drain, used by the CLI and by tests.
    pub async fn drain_now(&self) -> Result<DrainStats> {
        self.processor.drain_all().await
    }

    /// Embed the query and run multi-tier retrieval.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        self.retrieval
            .search(query, self.embedding.as_ref(), limit)
            .await
    }

    /// Multi-tier retrieval with a per-call distance threshold instead of
    /// the configured one.
    pub async fn search_with_threshold(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        self.retrieval
            .search_with_threshold(query, self.embedding.as_ref(), limit, threshold)
            .await
    }

    /// Retrieval from a precomputed query embedding.
    pub async fn search_embedding(&self, query: &[f16], limit: usize) -> Result<Vec<SearchHit>> {
        self.retrieval.search_embedding(query, limit).await
    }

    /// Retrieval from a precomputed query embedding with a per-call
    /// distance threshold.
    pub async fn search_embedding_with_threshold(
        &self,
        query: &[f16],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        self.retrieval
            .search_embedding_with_threshold(query, limit, threshold)
            .await
    }

    pub async fn document_overview(&self, path: &str) -> Result<Option<DocumentOverview>> {
        self.retrieval.document_overview(path).await
    }

    pub async fn document_overview_by_id(
        &self,
        id: crate::storage::DocumentId,
    ) -> Result<Option<DocumentOverview>> {
        self.retrieval.document_overview_by_id(id).await
    }

    /// Soft-delete a document and purge its chunks and vectors. The row
    /// stays so a later re-import revives the same ID. Returns `false` when
    /// no document exists at `path`.
    pub async fn delete_document(&self, path: &str) -> Result<bool> {
        let Some(document) = self.metadata.get_document_by_path(path).await? else {
            return Ok(false);
        };
        self.metadata.soft_delete(path).await?;
        self.vectors.delete_document(document.id).await?;
        self.metadata.delete_chunks(document.id).await?;
        self.retrieval.invalidate(document.id);
        info!(path, document = document.id, "document deleted");
        Ok(true)
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            documents: self.metadata.document_count().await?,
            chunks: self.metadata.chunk_count().await?,
            vectors: self.vectors.count().await?,
            queue: self.queue.stats().await?,
        })
    }

    /// Drop terminal tasks past the configured retention window.
    pub async fn prune_tasks(&self) -> Result<usize> {
        self.queue.prune_finished(self.config.task_retention_days).await
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }
}
