//! Capability traits for the embedding and language models

use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use half::f16;
use std::future::Future;
use std::time::{Duration, Instant};

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result; the dimension is inferred from the
    /// first vector and defaults to 0 when empty.
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate fixed-length vectors
/// from text.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let result = self.embed_texts(&[text.to_string()]).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::bad_response("no embedding generated for text"))
    }

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Name/identifier of this provider, recorded on every stored chunk
    fn model_id(&self) -> &str;
}

/// Trait for language-model providers: prompt in, text completion out.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Run one prompt through the model and return its text completion
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Name/identifier of the underlying model
    fn model_name(&self) -> &str;
}

/// Apply a per-call deadline to a gateway future.
///
/// Every external call carries its own timeout so the caller never holds
/// shared resources across an unbounded wait; an elapsed deadline surfaces
/// as [`GatewayError::Timeout`], which is transient and therefore eligible
/// for task-level retry.
pub async fn timed<T, F>(deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout {
            elapsed: started.elapsed(),
        }),
    }
}

/// Deadline-enforcing wrapper around any completion provider.
pub struct TimedCompletion {
    inner: std::sync::Arc<dyn CompletionProvider>,
    deadline: Duration,
}

impl TimedCompletion {
    pub fn new(inner: std::sync::Arc<dyn CompletionProvider>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

#[async_trait]
impl CompletionProvider for TimedCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        timed(self.deadline, self.inner.complete(prompt)).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Deadline-enforcing wrapper around any embedding provider.
pub struct TimedEmbedding {
    inner: std::sync::Arc<dyn EmbeddingProvider>,
    deadline: Duration,
}

impl TimedEmbedding {
    pub fn new(inner: std::sync::Arc<dyn EmbeddingProvider>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

#[async_trait]
impl EmbeddingProvider for TimedEmbedding {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        timed(self.deadline, self.inner.embed_texts(texts)).await
    }

    fn embedding_dimension(&self) -> usize {
        self.inner.embedding_dimension()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}
