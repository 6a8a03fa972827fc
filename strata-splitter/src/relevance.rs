//! Pluggable relevance scoring for best-effort outline linking.
//!
//! Content chunks are associated with the outline item whose text they
//! overlap most. The exact heuristic is not load-bearing for correctness —
//! the link only aids retrieval context — so it sits behind a trait.

use std::collections::HashSet;

/// Scores how related two pieces of text are; higher is more related.
pub trait RelevanceScorer: Send + Sync {
    fn score(&self, a: &str, b: &str) -> f32;
}

/// Default scorer: Jaccard overlap of lowercase alphanumeric tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenOverlapScorer;

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

impl RelevanceScorer for TokenOverlapScorer {
    fn score(&self, a: &str, b: &str) -> f32 {
        let ta = tokens(a);
        let tb = tokens(b);
        if ta.is_empty() || tb.is_empty() {
            return 0.0;
        }
        let shared = ta.intersection(&tb).count();
        let union = ta.len() + tb.len() - shared;
        shared as f32 / union as f32
    }
}
