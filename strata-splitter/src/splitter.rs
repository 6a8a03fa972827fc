//! The hierarchical splitter: one document in, three chunk tiers out.
//!
//! Tier 1 is a single abstractive summary, tier 2 is one chunk per detected
//! section, tier 3 is fixed-size overlapping windows over the raw text.
//! Summary and outline come from the injected language-model capability;
//! when the text exceeds the model's context budget they are built with a
//! divide-and-conquer Refine pass over bounded windows, merged strictly in
//! document order. If no model is configured, or any model step fails, the
//! splitter degrades to a deterministic fallback — ingestion never fails
//! solely because hierarchical analysis failed.

use crate::chunk::{Tier, TierChunk, TierSet};
use crate::outline::{OutlineItem, parse_outline};
use crate::relevance::{RelevanceScorer, TokenOverlapScorer};
use crate::window::{WindowSpec, window_texts};
use serde::{Deserialize, Serialize};
use strata_gateway::{CompletionProvider, GatewayError, Result as GatewayResult};
use tracing::{debug, warn};

/// Sizing knobs for the splitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitterConfig {
    /// Model context budget in characters; the direct path is used while
    /// the text stays under 80% of it
    pub context_budget: usize,
    /// Window size for divide-and-conquer model calls
    pub llm_window_size: usize,
    /// Overlap between consecutive model windows
    pub llm_window_overlap: usize,
    /// Cap on refine windows per document; text beyond the cap is excluded
    /// from the derived tiers and the result is flagged partial
    pub max_llm_windows: usize,
    /// Target size of a tier-3 content chunk
    pub content_target: usize,
    /// Hard cap on a tier-3 content chunk
    pub content_max: usize,
    /// Overlap between consecutive content chunks
    pub content_overlap: usize,
    /// Preview length for the synthetic fallback summary
    pub fallback_preview: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            context_budget: 128_000,
            llm_window_size: 30_000,
            llm_window_overlap: 200,
            max_llm_windows: 16,
            content_target: 1000,
            content_max: 1500,
            content_overlap: 100,
            fallback_preview: 500,
        }
    }
}

impl SplitterConfig {
    fn llm_window_spec(&self) -> WindowSpec {
        WindowSpec::new(
            self.llm_window_size,
            self.llm_window_size + self.llm_window_overlap,
            self.llm_window_overlap,
        )
    }

    fn content_window_spec(&self) -> WindowSpec {
        WindowSpec::new(self.content_target, self.content_max, self.content_overlap)
    }
}

/// Structured progress callback: `(stage, message)`.
pub type Progress<'a> = &'a (dyn Fn(&str, &str) + Send + Sync);

/// No-op progress sink for callers that do not observe stages.
pub fn silent_progress() -> impl Fn(&str, &str) + Send + Sync {
    |_: &str, _: &str| {}
}

fn direct_summary_prompt(text: &str) -> String {
    format!(
        "Write a concise summary (at most 300 words) of the following document. \
         Respond with the summary only.\n\n{text}"
    )
}

fn refine_summary_prompt(running: &str, window: &str) -> String {
    format!(
        "Below is a running summary of a document, followed by the next part of \
         the document. Merge any new information from the next part into the \
         summary and respond with the updated summary only (at most 300 words).\n\n\
         Running summary:\n{running}\n\nNext part:\n{window}"
    )
}

fn direct_outline_prompt(text: &str) -> String {
    format!(
        "Extract the section structure of the following document as a numbered \
         outline, using nested numbering for sub-sections. Respond with the \
         outline only, one item per line.\n\n{text}"
    )
}

fn refine_outline_prompt(running: &str, window: &str) -> String {
    format!(
        "Below is a partial outline of a document, followed by the next part of \
         the document. Extend the outline with any new sections found in the next \
         part, keeping the numbering consistent. Respond with the full updated \
         outline only, one item per line.\n\n\
         Outline so far:\n{running}\n\nNext part:\n{window}"
    )
}

/// Turns raw document text into the three chunk tiers.
pub struct HierarchicalSplitter {
    config: SplitterConfig,
    scorer: Box<dyn RelevanceScorer>,
}

impl HierarchicalSplitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self {
            config,
            scorer: Box::new(TokenOverlapScorer),
        }
    }

    /// Replace the outline-linking heuristic.
    pub fn with_scorer(mut self, scorer: Box<dyn RelevanceScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn config(&self) -> &SplitterConfig {
        &self.config
    }

    /// Produce the three tiers for one document.
    ///
    /// Model calls go through `llm` when present. Any model failure falls
    /// back to the synthetic summary plus pure content chunking, so this
    /// never returns an error.
    pub async fn split(
        &self,
        title: &str,
        text: &str,
        llm: Option<&dyn CompletionProvider>,
        progress: Progress<'_>,
    ) -> TierSet {
        let content = self.content_chunks(text, &[]);

        let analyzed = match llm {
            Some(llm) => match self.analyze(text, llm, progress).await {
                Ok(analyzed) => Some(analyzed),
                Err(e) => {
                    warn!("hierarchical analysis failed, degrading: {e}");
                    progress("fallback", &format!("analysis failed: {e}"));
                    None
                }
            },
            None => {
                debug!("no language model configured, using fallback tiers");
                progress("fallback", "no language model configured");
                None
            }
        };

        match analyzed {
            Some((summary_text, items, partial)) => {
                let summary = vec![TierChunk::new(Tier::Summary, 0, summary_text)];
                let outline = items
                    .iter()
                    .enumerate()
                    .map(|(seq, item)| {
                        let mut chunk = TierChunk::new(Tier::Outline, seq, item.label.clone())
                            .with_section_path(item.section_path.clone());
                        if let Some(parent) = &item.parent_heading {
                            chunk = chunk.with_parent_heading(parent.clone());
                        }
                        chunk
                    })
                    .collect();
                // Re-cut content now that outline items exist to link against.
                let content = self.content_chunks(text, &items);
                TierSet {
                    summary,
                    outline,
                    content,
                    partial,
                }
            }
            None => TierSet {
                summary: vec![self.fallback_summary(title, text)],
                outline: Vec::new(),
                content,
                partial: false,
            },
        }
    }

    /// Summary + outline via the model; `Ok((summary, items, partial))`.
    async fn analyze(
        &self,
        text: &str,
        llm: &dyn CompletionProvider,
        progress: Progress<'_>,
    ) -> GatewayResult<(String, Vec<OutlineItem>, bool)> {
        let direct = text.len() <= self.config.context_budget * 8 / 10;

        let (summary, outline_text, partial) = if direct {
            progress("summary", "direct summary");
            let summary = completion(llm, &direct_summary_prompt(text)).await?;

            progress("outline", "direct outline extraction");
            let outline_text = completion(llm, &direct_outline_prompt(text)).await?;
            (summary, outline_text, false)
        } else {
            let spec = self.config.llm_window_spec();
            let mut windows = window_texts(text, &spec);
            let partial = windows.len() > self.config.max_llm_windows;
            if partial {
                warn!(
                    "document needs {} refine windows, capping at {}; summary and \
                     outline will be partial",
                    windows.len(),
                    self.config.max_llm_windows
                );
                progress("summary", "window cap reached, derived tiers are partial");
                windows.truncate(self.config.max_llm_windows);
            }

            progress(
                "summary",
                &format!("refine summary over {} windows", windows.len()),
            );
            let summary = self
                .refine(llm, &windows, direct_summary_prompt, refine_summary_prompt)
                .await?;

            progress(
                "outline",
                &format!("refine outline over {} windows", windows.len()),
            );
            let outline_text = self
                .refine(llm, &windows, direct_outline_prompt, refine_outline_prompt)
                .await?;
            (summary, outline_text, partial)
        };

        let items = parse_outline(&outline_text);
        progress("outline", &format!("{} outline items detected", items.len()));
        Ok((summary, items, partial))
    }

    /// Divide-and-conquer Refine: seed from the first window, then merge
    /// each subsequent window into the running result. Windows are
    /// processed strictly in document order — merge order changes results.
    async fn refine(
        &self,
        llm: &dyn CompletionProvider,
        windows: &[&str],
        seed_prompt: fn(&str) -> String,
        merge_prompt: fn(&str, &str) -> String,
    ) -> GatewayResult<String> {
        let first = windows
            .first()
            .ok_or_else(|| GatewayError::bad_response("no windows to refine"))?;
        let mut running = completion(llm, &seed_prompt(first)).await?;

        for window in &windows[1..] {
            running = completion(llm, &merge_prompt(&running, window)).await?;
        }
        Ok(running)
    }

    /// Tier-3 chunks: fixed overlapping windows over the full original
    /// text, each linked to the best-overlap outline item when one exists.
    fn content_chunks(&self, text: &str, items: &[OutlineItem]) -> Vec<TierChunk> {
        let spec = self.config.content_window_spec();
        window_texts(text, &spec)
            .into_iter()
            .enumerate()
            .map(|(seq, window)| {
                let mut chunk = TierChunk::new(Tier::Content, seq, window.to_string());
                if let Some(best) = self.best_outline_match(window, items) {
                    chunk = chunk
                        .with_parent_heading(best.label.clone())
                        .with_section_path(best.section_path.clone());
                }
                chunk
            })
            .collect()
    }

    fn best_outline_match<'a>(
        &self,
        window: &str,
        items: &'a [OutlineItem],
    ) -> Option<&'a OutlineItem> {
        items
            .iter()
            .map(|item| (self.scorer.score(&item.label, window), item))
            .filter(|(score, _)| *score > 0.0)
            .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, item)| item)
    }

    /// Synthetic tier-1 chunk used when hierarchical analysis is
    /// unavailable: title plus a truncated preview of the text.
    fn fallback_summary(&self, title: &str, text: &str) -> TierChunk {
        let mut cut = self.config.fallback_preview.min(text.len());
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        let preview = text[..cut].trim();
        let summary = if title.is_empty() {
            preview.to_string()
        } else {
            format!("{title}\n\n{preview}")
        };
        TierChunk::new(Tier::Summary, 0, summary)
    }
}

async fn completion(llm: &dyn CompletionProvider, prompt: &str) -> GatewayResult<String> {
    let response = llm.complete(prompt).await?;
    let trimmed = response.trim();
    if trimmed.is_empty() {
        return Err(GatewayError::bad_response("empty completion"));
    }
    Ok(trimmed.to_string())
}
