//! Error types for maestro-core
//!
//! One taxonomy covers the whole engine: registration and routing problems
//! are fatal for the enclosing operation, policy violations and external
//! call failures are recoverable locally, and cancellation is terminal but
//! never retried.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// An agent with this name is already registered
    #[error("agent already registered: {name}")]
    DuplicateAgent {
        /// Conflicting agent name
        name: String,
    },

    /// An exclusive tool was combined with other tools
    #[error("invalid tool configuration for agent '{agent}': {reason}")]
    InvalidToolConfiguration {
        /// Agent name
        agent: String,
        /// What is wrong with the configuration
        reason: String,
    },

    /// The sub-agent graph contains a cycle
    #[error("cyclic sub-agent graph involving agent '{agent}'")]
    CyclicAgentGraph {
        /// Agent on the cycle
        agent: String,
    },

    /// No agent registered under this name
    #[error("unknown agent: {name}")]
    UnknownAgent {
        /// Requested agent name
        name: String,
    },

    /// A callback handler blocked the call
    #[error("policy violation: {reason}")]
    PolicyViolation {
        /// Why the call was blocked
        reason: String,
    },

    /// A workflow spec failed validation
    #[error("invalid workflow spec: {0}")]
    InvalidWorkflowSpec(String),

    /// No artifact stored under this name/version pair
    #[error("artifact not found: {name} (version {version:?})")]
    ArtifactNotFound {
        /// Artifact name
        name: String,
        /// Requested version, if any
        version: Option<u64>,
    },

    /// Model inference failure
    #[error("model error: {0}")]
    Model(#[from] maestro_llm::Error),

    /// Tool execution failure
    #[error("tool error: {0}")]
    Tool(#[from] maestro_tools::Error),

    /// The operation was cancelled by timeout or explicit request
    #[error("operation cancelled")]
    Cancelled,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Machine-readable reason code for terminal events.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Error::DuplicateAgent { .. }
            | Error::InvalidToolConfiguration { .. }
            | Error::CyclicAgentGraph { .. } => "registration_error",
            Error::UnknownAgent { .. } => "routing_error",
            Error::PolicyViolation { .. } => "policy_violation",
            Error::InvalidWorkflowSpec(_) => "workflow_spec_error",
            Error::ArtifactNotFound { .. } => "artifact_not_found",
            Error::Model(_) | Error::Tool(_) => "external_call_error",
            Error::Cancelled => "cancelled",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Whether the error aborts the enclosing operation with no recovery.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DuplicateAgent { .. }
                | Error::InvalidToolConfiguration { .. }
                | Error::CyclicAgentGraph { .. }
                | Error::UnknownAgent { .. }
                | Error::InvalidWorkflowSpec(_)
        )
    }

    /// Whether the caller may retry the failed call.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Model(e) => e.is_retryable(),
            Error::Tool(e) => matches!(e, maestro_tools::Error::Timeout { .. }),
            _ => false,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        assert_eq!(
            Error::DuplicateAgent { name: "a".into() }.code(),
            "registration_error"
        );
        assert_eq!(
            Error::UnknownAgent { name: "a".into() }.code(),
            "routing_error"
        );
        assert_eq!(
            Error::PolicyViolation { reason: "x".into() }.code(),
            "policy_violation"
        );
        assert_eq!(Error::Cancelled.code(), "cancelled");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::InvalidWorkflowSpec("max_iterations is 0".into()).is_fatal());
        assert!(Error::UnknownAgent { name: "a".into() }.is_fatal());
        assert!(!Error::PolicyViolation { reason: "x".into() }.is_fatal());
        assert!(!Error::Cancelled.is_fatal());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Model(maestro_llm::Error::Unavailable("down".into())).is_retryable());
        assert!(!Error::Model(maestro_llm::Error::Api("bad".into())).is_retryable());
        assert!(Error::Tool(maestro_tools::Error::Timeout {
            tool: "exec".into(),
            timeout_ms: 100
        })
        .is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }
}
