//! # strata-gateway
//!
//! Capability traits for the two external models the strata pipeline
//! depends on: a language model (prompt in, text out) and an embedding
//! model (text in, fixed-length vector out).
//!
//! The concrete gateway — HTTP transport, model hosting, authentication —
//! is owned by an external collaborator and is deliberately not implemented
//! here. This crate defines the seam:
//!
//! - [`CompletionProvider`]: synchronous-from-the-caller's-view text
//!   completion, used by the hierarchical splitter
//! - [`EmbeddingProvider`]: batch embedding generation, used by the vector
//!   store adapter
//! - [`timed`]: per-call deadline enforcement so no caller holds shared
//!   resources across an unbounded wait
//! - [`GatewayError`]: failure taxonomy with a transient/permanent split
//!   that drives task-level retry decisions downstream
//!
//! Embeddings are half-precision ([`half::f16`]) end to end to keep stored
//! vectors compact.

pub mod config;
pub mod error;
pub mod provider;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use provider::{
    CompletionProvider, EmbeddingProvider, EmbeddingResult, TimedCompletion, TimedEmbedding, timed,
};
