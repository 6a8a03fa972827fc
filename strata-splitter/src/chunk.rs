//! Tier model: the three granularities of a document's derived
//! representation and the chunk records the splitter emits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three granularities of a document's derived representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Tier 1: exactly one abstractive summary per document
    Summary,
    /// Tier 2: zero or more structural items, one per detected section
    Outline,
    /// Tier 3: one or more token-bounded windows over the raw text
    Content,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Summary, Tier::Outline, Tier::Content];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Summary => "summary",
            Tier::Outline => "outline",
            Tier::Content => "content",
        }
    }

    pub fn parse(s: &str) -> Option<Tier> {
        match s {
            "summary" => Some(Tier::Summary),
            "outline" => Some(Tier::Outline),
            "content" => Some(Tier::Content),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single chunk of one tier, ready for the vector and metadata stores.
///
/// `(tier, seq)` is unique within a document; `hash` is the blake3 hash of
/// the chunk text and gives the stores a deterministic idempotence check.
#[derive(Debug, Clone)]
pub struct TierChunk {
    pub tier: Tier,
    /// Tier-local index, 0-based
    pub seq: usize,
    pub text: String,
    /// blake3 hash of `text`
    pub hash: [u8; 32],
    /// Heading this chunk sits under, when known
    pub parent_heading: Option<String>,
    /// Hierarchical breadcrumb, e.g. "1. Intro / 1.1 Background"
    pub section_path: Option<String>,
}

impl TierChunk {
    pub fn new(tier: Tier, seq: usize, text: String) -> Self {
        let hash = *blake3::hash(text.as_bytes()).as_bytes();
        Self {
            tier,
            seq,
            text,
            hash,
            parent_heading: None,
            section_path: None,
        }
    }

    pub fn with_parent_heading(mut self, heading: impl Into<String>) -> Self {
        self.parent_heading = Some(heading.into());
        self
    }

    pub fn with_section_path(mut self, path: impl Into<String>) -> Self {
        self.section_path = Some(path.into());
        self
    }
}

/// Output contract of the hierarchical splitter: an ordered chunk list per
/// tier, plus a flag for documents whose derived tiers were computed from a
/// capped window prefix.
#[derive(Debug, Clone, Default)]
pub struct TierSet {
    pub summary: Vec<TierChunk>,
    pub outline: Vec<TierChunk>,
    pub content: Vec<TierChunk>,
    /// True when the document exceeded the refine window cap, so summary and
    /// outline reflect only a prefix of the text. Content chunks always
    /// cover the full text.
    pub partial: bool,
}

impl TierSet {
    pub fn tier(&self, tier: Tier) -> &[TierChunk] {
        match tier {
            Tier::Summary => &self.summary,
            Tier::Outline => &self.outline,
            Tier::Content => &self.content,
        }
    }

    pub fn len(&self) -> usize {
        self.summary.len() + self.outline.len() + self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All chunks in tier order, for bulk store writes.
    pub fn iter(&self) -> impl Iterator<Item = &TierChunk> {
        self.summary
            .iter()
            .chain(self.outline.iter())
            .chain(self.content.iter())
    }
}
