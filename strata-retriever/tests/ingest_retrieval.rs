//! End-to-end tests: enqueue, drain, retrieve against in-memory stores with
//! stub gateway providers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use half::f16;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use strata_gateway::{CompletionProvider, EmbeddingProvider, EmbeddingResult};
use strata_retriever::ingest::ContentSource;
use strata_retriever::{StrataConfig, StrataEngine, TaskStatus};
use strata_splitter::Tier;
use tempfile::TempDir;

/// In-memory content source whose documents can change between imports.
#[derive(Default)]
struct MapSource {
    docs: Mutex<HashMap<String, String>>,
}

impl MapSource {
    fn set(&self, path: &str, content: &str) {
        self.docs
            .lock()
            .unwrap()
            .insert(path.to_string(), content.to_string());
    }
}

#[async_trait]
impl ContentSource for MapSource {
    async fn fetch(&self, path: &str) -> Result<String> {
        self.docs
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .with_context(|| format!("no document at {path}"))
    }
}

/// Normalized bag-of-words embedding; deterministic and topical enough for
/// retrieval assertions.
struct BagEmbedding;

const DIMENSION: usize = 64;

#[async_trait]
impl EmbeddingProvider for BagEmbedding {
    async fn embed_texts(&self, texts: &[String]) -> strata_gateway::Result<EmbeddingResult> {
        let embeddings = texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; DIMENSION];
                for token in text.split(|c: char| !c.is_alphanumeric()) {
                    if token.is_empty() {
                        continue;
                    }
                    let digest = blake3::hash(token.to_lowercase().as_bytes());
                    let bucket =
                        u32::from_le_bytes(digest.as_bytes()[..4].try_into().unwrap_or([0; 4]));
                    v[bucket as usize % DIMENSION] += 1.0;
                }
                let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for x in &mut v {
                        *x /= norm;
                    }
                }
                v.into_iter().map(f16::from_f32).collect()
            })
            .collect();
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        DIMENSION
    }

    fn model_id(&self) -> &str {
        "bag-64"
    }
}

/// Canned language model: one summary, one outline, for every document.
struct ScriptedCompletion;

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    async fn complete(&self, prompt: &str) -> strata_gateway::Result<String> {
        if prompt.contains("outline") {
            Ok("1. Greetings\n2. Farewells".to_string())
        } else {
            Ok("An overview of common greetings and farewells.".to_string())
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Language model that echoes the prompt back verbatim.
struct EchoCompletion;

#[async_trait]
impl CompletionProvider for EchoCompletion {
    async fn complete(&self, prompt: &str) -> strata_gateway::Result<String> {
        Ok(prompt.to_string())
    }

    fn model_name(&self) -> &str {
        "echo"
    }
}

struct Harness {
    engine: Arc<StrataEngine>,
    source: Arc<MapSource>,
    _dir: TempDir,
}

async fn harness_with(completion: Option<Arc<dyn CompletionProvider>>) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = StrataConfig::default();
    config.lock_path = dir.path().join("strata.lock");
    config.embed_batch_pause_ms = 0;
    config.search_threshold = 0.95;

    let source = Arc::new(MapSource::default());
    let engine = StrataEngine::open_memory(config, source.clone(), completion, Arc::new(BagEmbedding))
        .await
        .unwrap();

    Harness {
        engine: Arc::new(engine),
        source,
        _dir: dir,
    }
}

async fn harness(with_llm: bool) -> Harness {
    let completion: Option<Arc<dyn CompletionProvider>> = if with_llm {
        Some(Arc::new(ScriptedCompletion))
    } else {
        None
    };
    harness_with(completion).await
}

/// Drive the queue to quiescence regardless of which drain (inline or the
/// background one spawned by enqueue) wins the lock.
async fn drain_until_idle(engine: &Arc<StrataEngine>) {
    for _ in 0..200 {
        let stats = engine.stats().await.unwrap();
        if stats.queue.pending == 0 && stats.queue.processing == 0 {
            return;
        }
        let _ = engine.drain_now().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("queue did not reach quiescence");
}

const GREETINGS: &str = "# Greetings\n\n\
    Hello world. A greeting opens a conversation politely.\n\n\
    ## Farewells\n\n\
    Goodbye for now, see you tomorrow after the meeting.\n";

#[tokio::test]
async fn test_ingest_then_search_finds_document() {
    let hx = harness(false).await;
    hx.source.set("notes/a.md", GREETINGS);

    hx.engine.enqueue_import("notes/a.md", 0).await.unwrap();
    drain_until_idle(&hx.engine).await;

    let stats = hx.engine.stats().await.unwrap();
    assert_eq!(stats.documents, 1);
    assert!(stats.chunks > 0);
    assert_eq!(stats.vectors, stats.chunks);
    assert_eq!(stats.queue.completed, 1);

    let hits = hx.engine.search("Hello greeting conversation", 10).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].path, "notes/a.md");
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[tokio::test]
async fn test_llm_tiers_feed_overview_and_expansion() {
    let hx = harness(true).await;
    hx.source.set("notes/a.md", GREETINGS);

    hx.engine.enqueue_import("notes/a.md", 0).await.unwrap();
    drain_until_idle(&hx.engine).await;

    let overview = hx
        .engine
        .document_overview("notes/a.md")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        overview.summary.as_deref(),
        Some("An overview of common greetings and farewells.")
    );
    assert_eq!(overview.outline.len(), 2);
    assert!(overview.outline[0].contains("Greetings"));

    // A query aimed at the summary tier surfaces the summary hit plus its
    // outline context. A hash-bucket collision in the embedding stub can
    // also produce a direct outline hit, which then shadows the expanded
    // entry for the same chunk, so assert on the expanded subset rather
    // than requiring every outline hit to be an expansion.
    let hits = hx.engine.search("an overview of common", 10).await.unwrap();
    let summary_hits: Vec<_> = hits.iter().filter(|h| h.tier == Tier::Summary).collect();
    assert_eq!(summary_hits.len(), 1);
    assert!(!summary_hits[0].expanded);

    let outline_hits: Vec<_> = hits.iter().filter(|h| h.tier == Tier::Outline).collect();
    assert_eq!(outline_hits.len(), 2);
    let expanded: Vec<_> = outline_hits.iter().filter(|h| h.expanded).collect();
    assert!(!expanded.is_empty());
    // Expanded hits inherit the distance of the summary hit they came from.
    assert!(
        expanded
            .iter()
            .all(|h| h.distance == summary_hits[0].distance)
    );
}

#[tokio::test]
async fn test_unchanged_reimport_completes_without_rework() {
    let hx = harness(false).await;
    hx.source.set("notes/a.md", GREETINGS);

    hx.engine.enqueue_import("notes/a.md", 0).await.unwrap();
    drain_until_idle(&hx.engine).await;
    let before = hx.engine.stats().await.unwrap();

    hx.engine.enqueue_import("notes/a.md", 0).await.unwrap();
    drain_until_idle(&hx.engine).await;
    let after = hx.engine.stats().await.unwrap();

    assert_eq!(after.queue.completed, 2);
    assert_eq!(after.chunks, before.chunks);
    assert_eq!(after.vectors, before.vectors);
}

#[tokio::test]
async fn test_changed_content_replaces_previous_generation() {
    let hx = harness(false).await;
    hx.source.set("notes/a.md", "# Old\n\nzanzibar is the only topic here.\n");

    hx.engine.enqueue_import("notes/a.md", 0).await.unwrap();
    drain_until_idle(&hx.engine).await;
    assert!(!hx.engine.search("zanzibar", 10).await.unwrap().is_empty());

    hx.source.set("notes/a.md", "# New\n\nquasar physics replaced everything.\n");
    hx.engine.enqueue_import("notes/a.md", 0).await.unwrap();
    drain_until_idle(&hx.engine).await;

    // Old generation is gone from both stores.
    assert!(hx.engine.search("zanzibar", 10).await.unwrap().is_empty());
    assert!(!hx.engine.search("quasar physics", 10).await.unwrap().is_empty());
    let stats = hx.engine.stats().await.unwrap();
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.vectors, stats.chunks);
}

#[tokio::test]
async fn test_duplicate_enqueue_keeps_one_task_with_max_priority() {
    let hx = harness(false).await;
    hx.source.set("notes/a.md", GREETINGS);

    // Hold the processor lock as a live foreign owner so the background
    // drains no-op between the two enqueues.
    let lock_path = hx.engine.config().lock_path.clone();
    let token = serde_json::json!({
        "pid": std::process::id(),
        "acquired_at": chrono::Utc::now().timestamp(),
    });
    std::fs::write(&lock_path, token.to_string()).unwrap();

    let first = hx.engine.enqueue_import("notes/a.md", 1).await.unwrap();
    let second = hx.engine.enqueue_import("notes/a.md", 9).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(hx.engine.stats().await.unwrap().queue.pending, 1);

    std::fs::remove_file(&lock_path).unwrap();
    drain_until_idle(&hx.engine).await;
    assert_eq!(hx.engine.stats().await.unwrap().queue.completed, 1);
}

#[tokio::test]
async fn test_missing_source_exhausts_retries_and_fails() {
    let hx = harness(false).await;

    hx.engine.enqueue_import("ghost.md", 0).await.unwrap();
    drain_until_idle(&hx.engine).await;

    let stats = hx.engine.stats().await.unwrap();
    assert_eq!(stats.queue.failed, 1);
    assert_eq!(stats.queue.pending, 0);
    assert_eq!(stats.documents, 0);
}

#[tokio::test]
async fn test_failed_task_retries_after_source_recovers() {
    let hx = harness(false).await;

    hx.engine.enqueue_import("late.md", 0).await.unwrap();
    drain_until_idle(&hx.engine).await;
    assert_eq!(hx.engine.stats().await.unwrap().queue.failed, 1);

    // The failed task is terminal; a fresh enqueue starts a new attempt.
    hx.source.set("late.md", GREETINGS);
    hx.engine.enqueue_import("late.md", 0).await.unwrap();
    drain_until_idle(&hx.engine).await;

    let stats = hx.engine.stats().await.unwrap();
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.queue.completed, 1);
    assert_eq!(stats.queue.failed, 1);
}

#[tokio::test]
async fn test_delete_hides_document_from_search() {
    let hx = harness(false).await;
    hx.source.set("notes/a.md", GREETINGS);

    hx.engine.enqueue_import("notes/a.md", 0).await.unwrap();
    drain_until_idle(&hx.engine).await;
    assert!(!hx.engine.search("Hello greeting", 10).await.unwrap().is_empty());

    assert!(hx.engine.delete_document("notes/a.md").await.unwrap());
    assert!(hx.engine.search("Hello greeting", 10).await.unwrap().is_empty());
    assert!(hx.engine.document_overview("notes/a.md").await.unwrap().is_none());

    let stats = hx.engine.stats().await.unwrap();
    assert_eq!(stats.documents, 0);
    assert_eq!(stats.vectors, 0);

    // Deleting twice is not an error, just a no-op.
    assert!(hx.engine.delete_document("notes/a.md").await.unwrap());
}

#[tokio::test]
async fn test_reimport_after_delete_revives_document() {
    let hx = harness(false).await;
    hx.source.set("notes/a.md", GREETINGS);

    hx.engine.enqueue_import("notes/a.md", 0).await.unwrap();
    drain_until_idle(&hx.engine).await;
    hx.engine.delete_document("notes/a.md").await.unwrap();

    // Content is unchanged, but the document was deleted, so the import
    // must rebuild rather than no-op.
    hx.engine.enqueue_import("notes/a.md", 0).await.unwrap();
    drain_until_idle(&hx.engine).await;

    assert!(!hx.engine.search("Hello greeting", 10).await.unwrap().is_empty());
    assert_eq!(hx.engine.stats().await.unwrap().documents, 1);
}

#[tokio::test]
async fn test_reindex_task_rebuilds_vectors() {
    let hx = harness(false).await;
    hx.source.set("notes/a.md", GREETINGS);

    hx.engine.enqueue_import("notes/a.md", 0).await.unwrap();
    drain_until_idle(&hx.engine).await;
    let before = hx.engine.stats().await.unwrap();

    hx.engine.enqueue_reindex("notes/a.md", 0).await.unwrap();
    drain_until_idle(&hx.engine).await;

    let after = hx.engine.stats().await.unwrap();
    assert_eq!(after.vectors, before.vectors);
    assert_eq!(after.queue.completed, 2);
    assert!(!hx.engine.search("Hello greeting", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_query_and_prune() {
    let hx = harness(false).await;
    hx.source.set("notes/a.md", GREETINGS);
    hx.engine.enqueue_import("notes/a.md", 0).await.unwrap();
    drain_until_idle(&hx.engine).await;

    assert!(hx.engine.search("", 10).await.unwrap().is_empty());
    assert!(hx.engine.search("   ", 10).await.unwrap().is_empty());
    assert!(hx.engine.search("hello", 0).await.unwrap().is_empty());

    // Default retention keeps the fresh completed task around.
    assert_eq!(hx.engine.prune_tasks().await.unwrap(), 0);
}

#[tokio::test]
async fn test_echo_model_markdown_document_round_trip() {
    let hx = harness_with(Some(Arc::new(EchoCompletion))).await;
    hx.source
        .set("notes/a.md", "# Intro\nHello world. ## Details\nMore text.");

    hx.engine.enqueue_import("notes/a.md", 0).await.unwrap();
    drain_until_idle(&hx.engine).await;

    // Exactly one summary, at least one outline item parsed out of the
    // echoed text, content covering the body.
    let overview = hx
        .engine
        .document_overview("notes/a.md")
        .await
        .unwrap()
        .unwrap();
    assert!(overview.summary.is_some());
    assert!(!overview.outline.is_empty());
    assert!(overview.outline.iter().any(|item| item.contains("Intro")));

    let hits = hx.engine.search("Hello", 10).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.path == "notes/a.md"));
    assert!(hits.iter().any(|h| h.content.contains("Hello world")));
}

#[tokio::test]
async fn test_per_call_threshold_overrides_configured() {
    let hx = harness(false).await;
    hx.source.set("notes/a.md", GREETINGS);
    hx.engine.enqueue_import("notes/a.md", 0).await.unwrap();
    drain_until_idle(&hx.engine).await;

    // Permissive configured threshold finds hits; a zero per-call
    // threshold filters everything.
    assert!(!hx.engine.search("Hello greeting", 10).await.unwrap().is_empty());
    assert!(
        hx.engine
            .search_with_threshold("Hello greeting", 10, 0.0)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_task_status_vocabulary_round_trips() {
    for status in [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ] {
        assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
    }
    assert!(TaskStatus::Failed.is_terminal());
    assert!(!TaskStatus::Pending.is_terminal());
}
