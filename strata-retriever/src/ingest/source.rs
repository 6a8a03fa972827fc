//! Where document content comes from.
//!
//! The processor resolves a task's logical path through a [`ContentSource`]
//! rather than hitting the filesystem directly, so tests (and non-file
//! backends) can supply content in memory.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::path::PathBuf;

/// Resolves a logical document path to its current text content.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch the content at `path`. Fails on missing documents and on
    /// content that is not valid UTF-8.
    async fn fetch(&self, path: &str) -> Result<String>;
}

/// Filesystem-backed source rooted at a directory; logical paths are
/// resolved relative to the root.
pub struct FsContentSource {
    root: PathBuf,
}

impl FsContentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ContentSource for FsContentSource {
    async fn fetch(&self, path: &str) -> Result<String> {
        let full = self.root.join(path);
        let bytes = tokio::fs::read(&full)
            .await
            .with_context(|| format!("reading {}", full.display()))?;
        String::from_utf8(bytes).map_err(|_| anyhow!("{} is not valid UTF-8", full.display()))
    }
}
