//! The ingestion processor: claims tasks under the single-owner lock and
//! runs documents through split, embed and store.
//!
//! Write ordering keeps retries honest: chunks and vectors are written
//! first and the document's content hash is finalized last, so a drain that
//! dies mid-import leaves a hash mismatch and the next attempt redoes the
//! work instead of skipping it.

use crate::config::StrataConfig;
use crate::ingest::lock::{OwnerLiveness, ProcessorLock};
use crate::ingest::source::ContentSource;
use crate::ingest::task_queue::{TaskKind, TaskQueue, TaskRecord};
use crate::storage::{ChunkRecord, DocumentId, MetadataStore, VectorRecord, VectorStore};
use anyhow::{Context, Result, bail};
use std::sync::Arc;
use std::time::Instant;
use strata_gateway::{CompletionProvider, EmbeddingProvider, TimedCompletion, TimedEmbedding};
use strata_splitter::{HierarchicalSplitter, TierSet};
use tracing::{debug, info, warn};

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Tasks claimed this pass
    pub processed: usize,
    pub completed: usize,
    /// Failed attempts (the task may still retry on a later pass)
    pub failed: usize,
    /// The pass was a no-op because another owner holds the lock
    pub lock_contended: bool,
}

/// Single-owner queue processor.
pub struct IngestProcessor {
    config: StrataConfig,
    metadata: MetadataStore,
    vectors: Arc<dyn VectorStore>,
    queue: TaskQueue,
    source: Arc<dyn ContentSource>,
    splitter: HierarchicalSplitter,
    completion: Option<Arc<dyn CompletionProvider>>,
    embedding: Arc<dyn EmbeddingProvider>,
    lock: ProcessorLock,
}

impl IngestProcessor {
    /// Wire up a processor. Providers are wrapped with per-call deadlines
    /// from the gateway config; `completion: None` selects the LLM-free
    /// fallback tiers.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: StrataConfig,
        metadata: MetadataStore,
        vectors: Arc<dyn VectorStore>,
        queue: TaskQueue,
        source: Arc<dyn ContentSource>,
        completion: Option<Arc<dyn CompletionProvider>>,
        embedding: Arc<dyn EmbeddingProvider>,
        liveness: Arc<dyn OwnerLiveness>,
    ) -> Self {
        let deadline = config.gateway.call_timeout;
        let completion = completion
            .map(|inner| Arc::new(TimedCompletion::new(inner, deadline)) as Arc<dyn CompletionProvider>);
        let embedding =
            Arc::new(TimedEmbedding::new(embedding, deadline)) as Arc<dyn EmbeddingProvider>;
        let splitter = HierarchicalSplitter::new(config.splitter.clone());
        let lock = ProcessorLock::new(config.lock_path.clone(), liveness, config.lock_staleness());
        Self {
            config,
            metadata,
            vectors,
            queue,
            source,
            splitter,
            completion,
            embedding,
            lock,
        }
    }

    /// Startup recovery: clear a stale lock left by a dead owner and return
    /// stranded processing tasks to pending. A lock held by a live owner is
    /// left alone, and so are its tasks. Returns the count of tasks reset.
    pub async fn recover_on_startup(&self) -> Result<usize> {
        // Acquiring usurps stale locks; failing means a live owner exists.
        if !self.lock.acquire()? {
            return Ok(0);
        }
        let result = self.queue.reset_stranded().await;
        if let Err(e) = self.lock.release() {
            warn!("failed to release processor lock: {e:#}");
        }
        let reset = result?;
        if reset > 0 {
            info!(reset, "returned stranded tasks to pending");
        }
        Ok(reset)
    }

    /// Drain the queue until it is empty or the wall-clock budget is spent.
    ///
    /// When another live owner holds the lock this is a silent no-op with
    /// `lock_contended` set; tasks stay queued for that owner. The lock is
    /// released on every exit path, including task errors.
    pub async fn drain_all(&self) -> Result<DrainStats> {
        if !self.lock.acquire()? {
            debug!("drain skipped, processor lock held elsewhere");
            return Ok(DrainStats {
                lock_contended: true,
                ..DrainStats::default()
            });
        }

        let result = self.drain_locked().await;
        if let Err(e) = self.lock.release() {
            warn!("failed to release processor lock: {e:#}");
        }
        result
    }

    async fn drain_locked(&self) -> Result<DrainStats> {
        let started = Instant::now();
        let budget = self.config.drain_budget();
        let mut stats = DrainStats::default();

        loop {
            if started.elapsed() >= budget {
                info!(
                    processed = stats.processed,
                    "drain budget exhausted, leaving remaining tasks queued"
                );
                break;
            }

            let batch = self.queue.next_batch(self.config.drain_batch_size).await?;
            if batch.is_empty() {
                break;
            }

            for task in batch {
                stats.processed += 1;
                match self.run_task(&task).await {
                    Ok(()) => {
                        self.queue.mark_completed(task.id).await?;
                        stats.completed += 1;
                    }
                    Err(e) => {
                        warn!(task = task.id, path = %task.path, "task failed: {e:#}");
                        self.queue
                            .mark_failed(task.id, &format!("{e:#}"), self.config.max_retries)
                            .await?;
                        stats.failed += 1;
                    }
                }
            }
        }

        info!(
            processed = stats.processed,
            completed = stats.completed,
            failed = stats.failed,
            "drain finished"
        );
        Ok(stats)
    }

    async fn run_task(&self, task: &TaskRecord) -> Result<()> {
        match task.kind {
            TaskKind::FileImport => self.import_document(&task.path).await,
            TaskKind::VectorIndex => self.reindex_document(&task.path).await,
        }
    }

    /// Import one document: fetch, detect no-ops by content hash, split
    /// into tiers, embed and store.
    pub async fn import_document(&self, path: &str) -> Result<()> {
        let content = self.source.fetch(path).await?;
        if content.trim().is_empty() {
            bail!("document {path} is empty");
        }

        let hash = *blake3::hash(content.as_bytes()).as_bytes();
        if let Some(existing) = self.metadata.get_document_by_path(path).await?
            && existing.content_hash == hash
            && existing.is_live()
        {
            debug!(path, "content unchanged, skipping import");
            return Ok(());
        }

        let title = document_title(path, &content);
        let size = content.len() as i64;
        let id = self
            .metadata
            .upsert_document(path, &title, &content, size)
            .await?;

        let tiers = self.split(&title, &content).await;
        self.write_tiers(id, &tiers).await?;
        self.metadata.finalize_document(id, &hash).await?;

        info!(
            path,
            document = id,
            chunks = tiers.len(),
            partial = tiers.partial,
            "document imported"
        );
        Ok(())
    }

    /// Rebuild tiers and vectors from stored content, without touching the
    /// source. Used after embedding-model changes.
    pub async fn reindex_document(&self, path: &str) -> Result<()> {
        let doc = self
            .metadata
            .get_document_by_path(path)
            .await?
            .with_context(|| format!("no stored document at {path}"))?;
        if doc.deleted {
            bail!("document {path} is deleted");
        }

        let hash = *blake3::hash(doc.content.as_bytes()).as_bytes();
        let tiers = self.split(&doc.title, &doc.content).await;
        self.write_tiers(doc.id, &tiers).await?;
        self.metadata.finalize_document(doc.id, &hash).await?;

        info!(path, document = doc.id, "document reindexed");
        Ok(())
    }

    async fn split(&self, title: &str, content: &str) -> TierSet {
        let progress = |stage: &str, message: &str| {
            debug!(stage, "{message}");
        };
        self.splitter
            .split(title, content, self.completion.as_deref(), &progress)
            .await
    }

    /// Write a document's full chunk generation: vectors deleted first,
    /// chunks replaced, fresh vectors upserted in batches. A failure rolls
    /// back to "no chunks, no vectors" so the document is never served from
    /// a half-written generation.
    async fn write_tiers(&self, id: DocumentId, tiers: &TierSet) -> Result<()> {
        match self.write_tiers_inner(id, tiers).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(cleanup) = self.vectors.delete_document(id).await {
                    warn!(document = id, "vector cleanup failed: {cleanup:#}");
                }
                if let Err(cleanup) = self.metadata.delete_chunks(id).await {
                    warn!(document = id, "chunk cleanup failed: {cleanup:#}");
                }
                Err(e)
            }
        }
    }

    async fn write_tiers_inner(&self, id: DocumentId, tiers: &TierSet) -> Result<()> {
        let model_id = self.embedding.model_id().to_string();

        let chunks: Vec<ChunkRecord> = tiers
            .iter()
            .map(|chunk| ChunkRecord {
                document_id: id,
                tier: chunk.tier,
                seq: chunk.seq,
                content: chunk.text.clone(),
                hash: chunk.hash,
                parent_heading: chunk.parent_heading.clone(),
                section_path: chunk.section_path.clone(),
                model_id: Some(model_id.clone()),
            })
            .collect();

        self.vectors.delete_document(id).await?;
        self.metadata.replace_chunks(id, &chunks).await?;

        let batch_size = self.config.embed_batch_size.max(1);
        for (index, batch) in chunks.chunks(batch_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.embed_batch_pause()).await;
            }
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let result = self
                .embedding
                .embed_texts(&texts)
                .await
                .context("embedding chunk batch")?;
            if result.len() != batch.len() {
                bail!(
                    "embedding batch returned {} vectors for {} texts",
                    result.len(),
                    batch.len()
                );
            }

            let records: Vec<VectorRecord> = batch
                .iter()
                .zip(result.embeddings)
                .map(|(chunk, embedding)| VectorRecord {
                    document_id: id,
                    tier: chunk.tier,
                    seq: chunk.seq,
                    content: chunk.content.clone(),
                    embedding,
                    model_id: model_id.clone(),
                })
                .collect();
            self.vectors.upsert(&records).await?;
        }

        Ok(())
    }
}

/// Title for a document: its first markdown heading when one exists,
/// otherwise the file stem of its path.
fn document_title(path: &str, content: &str) -> String {
    for line in content.lines() {
        let line = line.trim();
        if let Some(heading) = line.strip_prefix('#') {
            let heading = heading.trim_start_matches('#').trim();
            if !heading.is_empty() {
                return heading.to_string();
            }
        }
        if !line.is_empty() {
            break;
        }
    }
    std::path::Path::new(path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
