//! Configuration for gateway capabilities

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by the language-model and embedding-model
/// capabilities.
///
/// The gateway itself (HTTP transport, authentication, model hosting) is an
/// external collaborator; this struct only carries what callers of the
/// capability traits need to know: which models are in play, how large a
/// prompt the completion model accepts, and how long any single call may
/// take before it is treated as a transient failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Name of the completion model (informational, recorded in logs)
    pub completion_model: String,
    /// Name of the embedding model, stored alongside every chunk so stale
    /// vectors can be detected after a model change
    pub embedding_model: String,
    /// Prompt size budget for one completion call, in characters
    /// (a character-equivalent of the model's token context window)
    pub context_budget: usize,
    /// Deadline applied to every individual gateway call
    #[serde(with = "timeout_secs")]
    pub call_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            completion_model: "default-completion".to_string(),
            embedding_model: "default-embedding".to_string(),
            context_budget: 128_000,
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl GatewayConfig {
    pub fn new(completion_model: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        Self {
            completion_model: completion_model.into(),
            embedding_model: embedding_model.into(),
            ..Self::default()
        }
    }

    pub fn with_context_budget(mut self, budget: usize) -> Self {
        self.context_budget = budget;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// Serialize the call timeout as whole seconds so it round-trips through
/// TOML config files.
mod timeout_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
