//! Multi-tier retrieval.
//!
//! A query embedding is matched against all three tiers, hits below the
//! relevance threshold are dropped, and every surviving hit is
//! reverse-mapped to its parent document. Hits whose document is missing or
//! soft-deleted are filtered out here, which is what makes stale vectors
//! harmless. Coarse-tier hits are then expanded with a little finer-grained
//! context from the same document before ranking.

use crate::cache::TtlCache;
use crate::storage::{DocumentId, DocumentRecord, MetadataStore, VectorHit, VectorStore};
use anyhow::Result;
use half::f16;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use strata_gateway::EmbeddingProvider;
use strata_splitter::Tier;
use tracing::debug;

/// Outline chunks added per summary hit, and content chunks added per
/// outline hit.
const EXPANSION_FANOUT: usize = 2;

/// One ranked retrieval result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document_id: DocumentId,
    pub path: String,
    pub title: String,
    pub tier: Tier,
    pub seq: usize,
    pub content: String,
    /// Cosine distance of the matched vector; expansion hits inherit the
    /// distance of the hit that pulled them in
    pub distance: f32,
    pub section_path: Option<String>,
    /// `true` when this hit was added by context expansion rather than
    /// matched directly
    pub expanded: bool,
}

/// A document's coarse tiers, for overview-style lookups.
#[derive(Debug, Clone)]
pub struct DocumentOverview {
    pub document: DocumentRecord,
    pub summary: Option<String>,
    pub outline: Vec<String>,
}

/// Read-side engine over the two stores.
pub struct RetrievalEngine {
    metadata: MetadataStore,
    vectors: Arc<dyn VectorStore>,
    threshold: f32,
    documents: TtlCache<DocumentId, Option<DocumentRecord>>,
}

impl RetrievalEngine {
    pub fn new(
        metadata: MetadataStore,
        vectors: Arc<dyn VectorStore>,
        threshold: f32,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            metadata,
            vectors,
            threshold,
            documents: TtlCache::new(cache_ttl),
        }
    }

    /// Embed a query string and search with the configured threshold.
    /// Empty queries and a zero limit short-circuit to no hits.
    pub async fn search(
        &self,
        query: &str,
        embedding: &dyn EmbeddingProvider,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.search_with_threshold(query, embedding, limit, self.threshold)
            .await
    }

    /// Embed a query string and search with a per-call distance threshold.
    pub async fn search_with_threshold(
        &self,
        query: &str,
        embedding: &dyn EmbeddingProvider,
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let vector = embedding.embed_text(query).await?;
        self.search_embedding_with_threshold(&vector, limit, threshold)
            .await
    }

    /// Search with a precomputed query embedding and the configured
    /// threshold.
    pub async fn search_embedding(&self, query: &[f16], limit: usize) -> Result<Vec<SearchHit>> {
        self.search_embedding_with_threshold(query, limit, self.threshold)
            .await
    }

    /// Search with a precomputed query embedding and a per-call threshold.
    pub async fn search_embedding_with_threshold(
        &self,
        query: &[f16],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        // Coarse tiers get a fraction of the candidate budget; content
        // carries the bulk.
        let coarse = (limit / 3).max(1);
        let mut candidates = Vec::new();
        candidates.extend(self.vectors.search(query, Tier::Summary, coarse).await?);
        candidates.extend(self.vectors.search(query, Tier::Outline, coarse).await?);
        candidates.extend(self.vectors.search(query, Tier::Content, limit).await?);

        let mut hits = Vec::new();
        let mut chunk_memo: HashMap<(DocumentId, Tier), Vec<crate::storage::ChunkRecord>> =
            HashMap::new();

        for candidate in candidates {
            if candidate.distance > threshold {
                continue;
            }
            let Some(document) = self.live_document(candidate.document_id).await? else {
                debug!(
                    document = candidate.document_id,
                    "dropping hit for missing or deleted document"
                );
                continue;
            };

            let section_path = self
                .chunk_field(&mut chunk_memo, &candidate)
                .await?
                .and_then(|chunk| chunk.section_path);

            hits.push(SearchHit {
                document_id: document.id,
                path: document.path.clone(),
                title: document.title.clone(),
                tier: candidate.tier,
                seq: candidate.seq,
                content: candidate.content.clone(),
                distance: candidate.distance,
                section_path,
                expanded: false,
            });
        }

        // Expand after every direct hit is known, so a chunk that matched
        // directly is never demoted to an expansion of an earlier hit.
        let mut expansions = Vec::new();
        for hit in &hits {
            if let Some(document) = self.live_document(hit.document_id).await? {
                expansions.extend(
                    self.expand(&document, hit, hit.section_path.as_deref())
                        .await?,
                );
            }
        }
        hits.extend(expansions);

        // First occurrence wins, so direct hits shadow their expansions.
        let mut seen = HashSet::new();
        hits.retain(|hit| seen.insert((hit.document_id, hit.tier, hit.seq)));

        // Stable: equal distances keep insertion order, which keeps an
        // expansion right after the hit that pulled it in.
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Summary and outline of one document, by path.
    pub async fn document_overview(&self, path: &str) -> Result<Option<DocumentOverview>> {
        let Some(document) = self.metadata.get_document_by_path(path).await? else {
            return Ok(None);
        };
        self.overview_of(document).await
    }

    /// Summary and outline of one document, by ID.
    pub async fn document_overview_by_id(
        &self,
        id: DocumentId,
    ) -> Result<Option<DocumentOverview>> {
        let Some(document) = self.metadata.get_document(id).await? else {
            return Ok(None);
        };
        self.overview_of(document).await
    }

    async fn overview_of(&self, document: DocumentRecord) -> Result<Option<DocumentOverview>> {
        if document.deleted {
            return Ok(None);
        }

        let summary = self
            .metadata
            .get_chunks(document.id, Some(Tier::Summary))
            .await?
            .into_iter()
            .next()
            .map(|chunk| chunk.content);
        let outline = self
            .metadata
            .get_chunks(document.id, Some(Tier::Outline))
            .await?
            .into_iter()
            .map(|chunk| chunk.content)
            .collect();

        Ok(Some(DocumentOverview {
            document,
            summary,
            outline,
        }))
    }

    /// Drop a document from the reverse-lookup cache, e.g. after deletion.
    pub fn invalidate(&self, id: DocumentId) {
        self.documents.invalidate(&id);
    }

    async fn live_document(&self, id: DocumentId) -> Result<Option<DocumentRecord>> {
        let record = match self.documents.get(&id) {
            Some(cached) => cached,
            None => {
                let fetched = self.metadata.get_document(id).await?;
                self.documents.insert(id, fetched.clone());
                fetched
            }
        };
        Ok(record.filter(|doc| doc.is_live()))
    }

    /// Pull finer-grained context for a coarse hit: outline entries for a
    /// summary hit, same-section content chunks for an outline hit.
    /// Expansions inherit the parent's distance.
    async fn expand(
        &self,
        document: &DocumentRecord,
        parent: &SearchHit,
        section_path: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let chunks = match parent.tier {
            Tier::Summary => {
                let mut outline = self
                    .metadata
                    .get_chunks(document.id, Some(Tier::Outline))
                    .await?;
                outline.truncate(EXPANSION_FANOUT);
                outline
            }
            Tier::Outline => match section_path {
                Some(section) => {
                    self.metadata
                        .get_content_chunks_by_section(document.id, section, EXPANSION_FANOUT)
                        .await?
                }
                None => Vec::new(),
            },
            Tier::Content => Vec::new(),
        };

        Ok(chunks
            .into_iter()
            .map(|chunk| SearchHit {
                document_id: document.id,
                path: document.path.clone(),
                title: document.title.clone(),
                tier: chunk.tier,
                seq: chunk.seq,
                content: chunk.content,
                distance: parent.distance,
                section_path: chunk.section_path,
                expanded: true,
            })
            .collect())
    }

    async fn chunk_field(
        &self,
        memo: &mut HashMap<(DocumentId, Tier), Vec<crate::storage::ChunkRecord>>,
        hit: &VectorHit,
    ) -> Result<Option<crate::storage::ChunkRecord>> {
        let key = (hit.document_id, hit.tier);
        if !memo.contains_key(&key) {
            let chunks = self.metadata.get_chunks(hit.document_id, Some(hit.tier)).await?;
            memo.insert(key, chunks);
        }
        Ok(memo
            .get(&key)
            .and_then(|chunks| chunks.iter().find(|c| c.seq == hit.seq))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ChunkRecord, SqliteVectorStore, VectorRecord};

    fn vecf(values: &[f32]) -> Vec<f16> {
        values.iter().map(|v| f16::from_f32(*v)).collect()
    }

    struct Fixture {
        engine: RetrievalEngine,
        metadata: MetadataStore,
        vectors: Arc<dyn VectorStore>,
    }

    async fn fixture(threshold: f32) -> Fixture {
        let metadata = MetadataStore::open_memory().await.unwrap();
        let vectors: Arc<dyn VectorStore> = Arc::new(
            SqliteVectorStore::new(metadata.pool().clone())
                .await
                .unwrap(),
        );
        let engine = RetrievalEngine::new(
            metadata.clone(),
            vectors.clone(),
            threshold,
            Duration::from_secs(60),
        );
        Fixture {
            engine,
            metadata,
            vectors,
        }
    }

    async fn seed_document(
        fx: &Fixture,
        path: &str,
        chunks: &[(Tier, usize, &str, Option<&str>, &[f32])],
    ) -> DocumentId {
        let id = fx
            .metadata
            .upsert_document(path, path, "content", 7)
            .await
            .unwrap();

        let records: Vec<ChunkRecord> = chunks
            .iter()
            .map(|(tier, seq, text, section, _)| ChunkRecord {
                document_id: id,
                tier: *tier,
                seq: *seq,
                content: text.to_string(),
                hash: *blake3::hash(text.as_bytes()).as_bytes(),
                parent_heading: None,
                section_path: section.map(|s| s.to_string()),
                model_id: Some("test-embed".to_string()),
            })
            .collect();
        fx.metadata.replace_chunks(id, &records).await.unwrap();

        let vectors: Vec<VectorRecord> = chunks
            .iter()
            .map(|(tier, seq, text, _, embedding)| VectorRecord {
                document_id: id,
                tier: *tier,
                seq: *seq,
                content: text.to_string(),
                embedding: vecf(embedding),
                model_id: "test-embed".to_string(),
            })
            .collect();
        fx.vectors.upsert(&vectors).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_empty_query_and_zero_limit() {
        let fx = fixture(0.75).await;
        assert!(fx.engine.search_embedding(&[], 10).await.unwrap().is_empty());
        assert!(
            fx.engine
                .search_embedding(&vecf(&[1.0, 0.0]), 0)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_threshold_filters_distant_hits() {
        let fx = fixture(0.3).await;
        seed_document(
            &fx,
            "near.md",
            &[(Tier::Content, 0, "near", None, &[1.0, 0.0])],
        )
        .await;
        seed_document(
            &fx,
            "far.md",
            &[(Tier::Content, 0, "far", None, &[0.0, 1.0])],
        )
        .await;

        let hits = fx
            .engine
            .search_embedding(&vecf(&[1.0, 0.0]), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "near.md");
    }

    #[tokio::test]
    async fn test_deleted_document_hits_are_dropped() {
        let fx = fixture(0.75).await;
        seed_document(
            &fx,
            "gone.md",
            &[(Tier::Content, 0, "text", None, &[1.0, 0.0])],
        )
        .await;
        fx.metadata.soft_delete("gone.md").await.unwrap();

        // The stale vector is still in the store.
        assert_eq!(fx.vectors.count().await.unwrap(), 1);
        let hits = fx
            .engine
            .search_embedding(&vecf(&[1.0, 0.0]), 10)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_summary_hit_expands_to_outline() {
        let fx = fixture(0.75).await;
        let id = seed_document(
            &fx,
            "doc.md",
            &[
                (Tier::Summary, 0, "the summary", None, &[1.0, 0.0]),
                (Tier::Outline, 0, "1. Intro", Some("Intro"), &[0.0, 1.0]),
                (Tier::Outline, 1, "2. Body", Some("Body"), &[0.0, 1.0]),
                (Tier::Outline, 2, "3. End", Some("End"), &[0.0, 1.0]),
            ],
        )
        .await;

        let hits = fx
            .engine
            .search_embedding(&vecf(&[1.0, 0.0]), 10)
            .await
            .unwrap();

        let direct: Vec<_> = hits.iter().filter(|h| !h.expanded).collect();
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].tier, Tier::Summary);

        let expanded: Vec<_> = hits.iter().filter(|h| h.expanded).collect();
        assert_eq!(expanded.len(), EXPANSION_FANOUT);
        assert!(expanded.iter().all(|h| h.tier == Tier::Outline));
        assert!(expanded.iter().all(|h| h.document_id == id));
        // Expansions inherit the parent distance.
        assert!(expanded.iter().all(|h| h.distance == direct[0].distance));
    }

    #[tokio::test]
    async fn test_outline_hit_expands_same_section_content() {
        let fx = fixture(0.75).await;
        seed_document(
            &fx,
            "doc.md",
            &[
                (Tier::Outline, 0, "1. Intro", Some("Intro"), &[1.0, 0.0]),
                (Tier::Content, 0, "intro text a", Some("Intro"), &[0.0, 1.0]),
                (Tier::Content, 1, "intro text b", Some("Intro"), &[0.0, 1.0]),
                (Tier::Content, 2, "other text", Some("Body"), &[0.0, 1.0]),
            ],
        )
        .await;

        let hits = fx
            .engine
            .search_embedding(&vecf(&[1.0, 0.0]), 10)
            .await
            .unwrap();

        let expanded: Vec<_> = hits.iter().filter(|h| h.expanded).collect();
        assert_eq!(expanded.len(), 2);
        assert!(
            expanded
                .iter()
                .all(|h| h.section_path.as_deref() == Some("Intro"))
        );
    }

    #[tokio::test]
    async fn test_direct_hit_shadows_its_expansion() {
        let fx = fixture(0.75).await;
        seed_document(
            &fx,
            "doc.md",
            &[
                (Tier::Summary, 0, "summary", None, &[1.0, 0.0]),
                // Outline chunk that both matches directly and would be
                // pulled in by the summary expansion.
                (Tier::Outline, 0, "1. Intro", Some("Intro"), &[0.9, 0.1]),
            ],
        )
        .await;

        let hits = fx
            .engine
            .search_embedding(&vecf(&[1.0, 0.0]), 10)
            .await
            .unwrap();

        let outline_hits: Vec<_> = hits.iter().filter(|h| h.tier == Tier::Outline).collect();
        assert_eq!(outline_hits.len(), 1);
        assert!(!outline_hits[0].expanded);
    }

    #[tokio::test]
    async fn test_results_sorted_and_truncated() {
        let fx = fixture(1.0).await;
        seed_document(
            &fx,
            "a.md",
            &[
                (Tier::Content, 0, "exact", None, &[1.0, 0.0]),
                (Tier::Content, 1, "close", None, &[0.9, 0.4]),
                (Tier::Content, 2, "far", None, &[0.1, 1.0]),
            ],
        )
        .await;

        let hits = fx
            .engine
            .search_embedding(&vecf(&[1.0, 0.0]), 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "exact");
        assert_eq!(hits[1].content, "close");
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[tokio::test]
    async fn test_document_overview() {
        let fx = fixture(0.75).await;
        seed_document(
            &fx,
            "doc.md",
            &[
                (Tier::Summary, 0, "the summary", None, &[1.0, 0.0]),
                (Tier::Outline, 0, "1. Intro", Some("Intro"), &[0.0, 1.0]),
                (Tier::Outline, 1, "2. Body", Some("Body"), &[0.0, 1.0]),
            ],
        )
        .await;

        let overview = fx.engine.document_overview("doc.md").await.unwrap().unwrap();
        assert_eq!(overview.summary.as_deref(), Some("the summary"));
        assert_eq!(overview.outline, vec!["1. Intro", "2. Body"]);

        assert!(fx.engine.document_overview("nope.md").await.unwrap().is_none());

        fx.metadata.soft_delete("doc.md").await.unwrap();
        fx.engine.invalidate(overview.document.id);
        assert!(fx.engine.document_overview("doc.md").await.unwrap().is_none());
    }
}
