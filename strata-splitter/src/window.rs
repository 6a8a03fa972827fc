//! Fixed-size overlapping windowing over raw text.
//!
//! Both window consumers use this module: the refine loop feeds ~30K-char
//! windows to the language model, and the content tier cuts ~1K-char chunks
//! for embedding. Windows are byte ranges over the original text, snapped to
//! char boundaries, and windowing is fully deterministic: the same text and
//! spec always produce the same ranges, in document order.

use std::ops::Range;

/// Sizing for one windowing pass, in bytes of UTF-8 text.
#[derive(Debug, Clone, Copy)]
pub struct WindowSpec {
    /// Preferred window size
    pub target: usize,
    /// Hard cap; a window may grow past `target` only to reach a natural
    /// break (whitespace), never past `max`
    pub max: usize,
    /// How far each window reaches back into its predecessor
    pub overlap: usize,
}

impl WindowSpec {
    pub fn new(target: usize, max: usize, overlap: usize) -> Self {
        debug_assert!(target > 0 && max >= target && overlap < target);
        Self {
            target,
            max,
            overlap,
        }
    }
}

/// Snap a byte index down to the nearest char boundary.
fn snap_down(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Split `text` into overlapping windows in document order.
///
/// Each window ends at the first whitespace at or after `target` (so words
/// stay intact) but never past `max`. The next window starts `overlap` bytes
/// before the previous one ended. The final window always reaches the end of
/// the text, and concatenating the non-overlapping prefixes reconstructs the
/// whole input.
pub fn split_windows(text: &str, spec: &WindowSpec) -> Vec<Range<usize>> {
    let mut windows = Vec::new();
    if text.is_empty() {
        return windows;
    }

    let len = text.len();
    let mut start = 0usize;

    loop {
        let mut end = snap_down(text, (start + spec.target).min(len));

        // Grow to the next whitespace so we do not cut mid-word, bounded
        // by the hard cap.
        let cap = snap_down(text, (start + spec.max).min(len));
        while end < cap && !text[end..].starts_with(char::is_whitespace) {
            end += 1;
            while end < cap && !text.is_char_boundary(end) {
                end += 1;
            }
        }

        if end <= start {
            end = cap.max(snap_down(text, (start + 1).min(len)));
        }

        windows.push(start..end);
        if end >= len {
            break;
        }

        start = snap_down(text, end.saturating_sub(spec.overlap).max(start + 1));
    }

    windows
}

/// Convenience wrapper returning the window texts, borrowed from `text`,
/// in document order.
pub fn window_texts<'a>(text: &'a str, spec: &WindowSpec) -> Vec<&'a str> {
    split_windows(text, spec)
        .into_iter()
        .map(|range| &text[range])
        .collect()
}
