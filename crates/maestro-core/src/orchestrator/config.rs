//! Orchestrator configuration
//!
//! The recognized options plus the model-call knobs the router derives its
//! own configuration from.

use crate::error::{Error, Result};
use crate::router::RouterConfig;
use crate::util::RetryConfig;
use crate::workflow::EngineConfig;
use serde::Deserialize;

/// Configuration for the orchestrator
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum model/tool passes per agent turn
    pub max_iterations_default: usize,
    /// Deadline per agent turn (loop/sequential) or parallel group
    pub workflow_timeout_ms: u64,
    /// Cancel remaining parallel branches on the first failure
    pub parallel_cancel_on_first_failure: bool,
    /// Deadline per model call in milliseconds
    pub model_timeout_ms: u64,
    /// Attempts per model call for transient failures
    pub model_retry_attempts: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations_default: 10,
            workflow_timeout_ms: 120_000,
            parallel_cancel_on_first_failure: false,
            model_timeout_ms: 60_000,
            model_retry_attempts: 3,
        }
    }
}

impl OrchestratorConfig {
    /// Create a new configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from a TOML document; missing keys keep their
    /// defaults
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| Error::Internal(format!("invalid configuration: {e}")))
    }

    /// Set the per-turn iteration bound
    #[must_use]
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations_default = max;
        self
    }

    /// Set the workflow timeout
    #[must_use]
    pub fn with_workflow_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.workflow_timeout_ms = timeout_ms;
        self
    }

    /// Set whether a parallel failure cancels its siblings
    #[must_use]
    pub fn with_parallel_cancel_on_first_failure(mut self, cancel: bool) -> Self {
        self.parallel_cancel_on_first_failure = cancel;
        self
    }

    /// Set the model call deadline
    #[must_use]
    pub fn with_model_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.model_timeout_ms = timeout_ms;
        self
    }

    /// Set the model retry attempt count
    #[must_use]
    pub fn with_model_retry_attempts(mut self, attempts: usize) -> Self {
        self.model_retry_attempts = attempts;
        self
    }

    /// Router configuration derived from these options
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            max_iterations: self.max_iterations_default,
            model_timeout_ms: self.model_timeout_ms,
            retry: RetryConfig {
                max_attempts: self.model_retry_attempts,
                ..RetryConfig::default()
            },
            ..RouterConfig::default()
        }
    }

    /// Engine configuration derived from these options
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            workflow_timeout_ms: self.workflow_timeout_ms,
            parallel_cancel_on_first_failure: self.parallel_cancel_on_first_failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_iterations_default, 10);
        assert_eq!(config.workflow_timeout_ms, 120_000);
        assert!(!config.parallel_cancel_on_first_failure);
    }

    #[test]
    fn test_builders() {
        let config = OrchestratorConfig::new()
            .with_max_iterations(5)
            .with_workflow_timeout_ms(10_000)
            .with_parallel_cancel_on_first_failure(true);
        assert_eq!(config.max_iterations_default, 5);
        assert_eq!(config.router_config().max_iterations, 5);
        assert_eq!(config.engine_config().workflow_timeout_ms, 10_000);
        assert!(config.engine_config().parallel_cancel_on_first_failure);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = OrchestratorConfig::from_toml_str(
            "max_iterations_default = 4\nparallel_cancel_on_first_failure = true\n",
        )
        .unwrap();
        assert_eq!(config.max_iterations_default, 4);
        assert!(config.parallel_cancel_on_first_failure);
        // untouched keys keep defaults
        assert_eq!(config.model_retry_attempts, 3);
    }

    #[test]
    fn test_from_toml_invalid() {
        assert!(OrchestratorConfig::from_toml_str("max_iterations_default = \"many\"").is_err());
    }
}
