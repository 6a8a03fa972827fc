//! # strata-splitter
//!
//! Turns one document's raw text into a three-tier semantic representation:
//!
//! - **summary** (tier 1): exactly one abstractive summary chunk
//! - **outline** (tier 2): one chunk per detected section, with parent
//!   headings and section-path breadcrumbs
//! - **content** (tier 3): fixed-size overlapping windows over the full text
//!
//! Summary and outline come from an injected language-model capability
//! ([`strata_gateway::CompletionProvider`]). Documents that exceed the
//! model's context budget are handled with a divide-and-conquer Refine pass:
//! the text is pre-split into bounded overlapping windows and the running
//! summary (or outline) is merged with each successive window, strictly in
//! document order. When no model is available, or any model step fails, the
//! splitter degrades to a deterministic fallback so that ingestion always
//! produces at least the summary and content tiers.
//!
//! Every emitted chunk carries a blake3 content hash for idempotence checks
//! downstream.

pub mod chunk;
pub mod outline;
pub mod relevance;
pub mod splitter;
pub mod window;

pub use chunk::{Tier, TierChunk, TierSet};
pub use outline::{OutlineItem, parse_outline};
pub use relevance::{RelevanceScorer, TokenOverlapScorer};
pub use splitter::{HierarchicalSplitter, Progress, SplitterConfig, silent_progress};
pub use window::{WindowSpec, split_windows, window_texts};
