//! Error types for model inference calls.

use thiserror::Error;

/// Model inference error
#[derive(Debug, Error)]
pub enum Error {
    /// Backend is unreachable or overloaded
    #[error("model unavailable: {0}")]
    Unavailable(String),

    /// Inference call exceeded its deadline
    #[error("model call timed out after {timeout_ms}ms")]
    Timeout {
        /// Deadline that was exceeded
        timeout_ms: u64,
    },

    /// Backend rejected the request
    #[error("model api error: {0}")]
    Api(String),
}

impl Error {
    /// Whether the caller may retry this error.
    ///
    /// `Unavailable` and `Timeout` are transient; `Api` indicates a request
    /// the backend will keep rejecting.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout { .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
