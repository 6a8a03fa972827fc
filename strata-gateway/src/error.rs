//! Error types for the model gateway capabilities

use std::time::Duration;

/// Result type for gateway operations.
///
/// Convenience alias using [`GatewayError`] as the error type, used
/// throughout the crate for operations that can fail.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Error type for language-model and embedding-model calls.
///
/// The gateway is a remote capability from the caller's point of view, so
/// most variants describe transient external failures. Task-level retry
/// decisions are made by the caller; this type only classifies the failure.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The call exceeded its configured deadline
    #[error("gateway call timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    /// No provider is configured for the requested capability
    #[error("gateway capability unavailable: {message}")]
    Unavailable { message: String },

    /// The provider configuration is invalid
    #[error("invalid gateway configuration: {message}")]
    InvalidConfig { message: String },

    /// The provider returned a malformed or unusable response
    #[error("bad gateway response: {message}")]
    BadResponse { message: String },

    /// Async task join errors
    #[error("async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },

    /// Generic errors from provider implementations
    #[error("provider error: {source}")]
    Provider {
        #[from]
        source: anyhow::Error,
    },
}

impl GatewayError {
    /// Create an unavailable-capability error with a custom message.
    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a bad-response error with a custom message.
    pub fn bad_response<S: Into<String>>(message: S) -> Self {
        Self::BadResponse {
            message: message.into(),
        }
    }

    /// Whether a task built on this call should go back to pending for
    /// another attempt. Timeouts and provider failures are transient;
    /// configuration problems are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::BadResponse { .. } | Self::Provider { .. }
        )
    }
}
