//! Parses model-produced outline text into discrete structural items.
//!
//! The language model is asked for a numbered outline, but real responses
//! mix numbering styles, markdown headings, and stray prose. The parser
//! accepts numbered items ("1. Intro", "1.1 Background", "2) Methods") and
//! markdown headings ("# Intro", "## Background"); every recognized item
//! becomes one tier-2 chunk carrying its parent heading and a synthesized
//! section-path breadcrumb.

use regex::Regex;
use std::sync::OnceLock;

/// One structural item recovered from outline text.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlineItem {
    /// The item's own label, numbering included when present
    /// (e.g. "1.1 Background")
    pub label: String,
    /// Nesting depth, 0 for top-level items
    pub depth: usize,
    /// Label of the nearest enclosing item, None at the top level
    pub parent_heading: Option<String>,
    /// Breadcrumb from the top level down to this item,
    /// e.g. "1. Intro / 1.1 Background"
    pub section_path: String,
}

fn numbered_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d+(?:\.\d+)*)[.):]?\s+(.+)$").unwrap())
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(#{1,6})\s+(.+)$").unwrap())
}

fn bullet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[-*+]\s+(.+)$").unwrap())
}

/// Parse outline text into items, in document order.
///
/// Lines that match no recognized shape are ignored; they are usually the
/// model narrating around the outline. An empty result is valid — the
/// document simply has no detected sections.
pub fn parse_outline(text: &str) -> Vec<OutlineItem> {
    let mut items: Vec<OutlineItem> = Vec::new();
    // Stack of (depth, label) for the current ancestor chain.
    let mut stack: Vec<(usize, String)> = Vec::new();

    for line in text.lines() {
        let (depth, label) = if let Some(caps) = numbered_re().captures(line) {
            let numbering = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let depth = numbering.matches('.').count();
            let title = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
            (depth, format!("{numbering}. {title}"))
        } else if let Some(caps) = heading_re().captures(line) {
            let depth = caps.get(1).map(|m| m.as_str().len()).unwrap_or(1) - 1;
            let title = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
            (depth, title.to_string())
        } else if let Some(caps) = bullet_re().captures(line) {
            // Bullets nest one level under whatever item came before them.
            let depth = stack.last().map(|(d, _)| d + 1).unwrap_or(0);
            let title = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
            (depth, title.to_string())
        } else {
            continue;
        };

        if label.trim().is_empty() {
            continue;
        }

        while stack.last().is_some_and(|(d, _)| *d >= depth) {
            stack.pop();
        }

        let parent_heading = stack.last().map(|(_, l)| l.clone());
        let mut path_parts: Vec<&str> = stack.iter().map(|(_, l)| l.as_str()).collect();
        path_parts.push(label.as_str());
        let section_path = path_parts.join(" / ");

        stack.push((depth, label.clone()));
        items.push(OutlineItem {
            label,
            depth,
            parent_heading,
            section_path,
        });
    }

    items
}
