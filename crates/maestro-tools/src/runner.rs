//! Runner - timeout-bounded tool execution
//!
//! Wraps registry lookups and dispatch with a per-call deadline and
//! duration tracking so the orchestrator only deals with one entry point.

use crate::error::{Error, Result};
use crate::registry::ToolRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Per-call deadline in milliseconds
    pub timeout_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000 }
    }
}

/// Record of one tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecution {
    /// Tool name
    pub tool_name: String,
    /// Tool output
    pub output: serde_json::Value,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

/// Executes registered tools under a deadline
pub struct ToolRunner {
    registry: Arc<ToolRegistry>,
    config: RunnerConfig,
}

impl ToolRunner {
    /// Create a runner over a registry
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, config: RunnerConfig) -> Self {
        Self { registry, config }
    }

    /// Get the underlying registry
    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute a tool by name
    pub async fn execute(&self, name: &str, arguments: serde_json::Value) -> Result<ToolExecution> {
        let tool = self.registry.get(name)?;
        let start = Instant::now();

        let result = tokio::time::timeout(
            Duration::from_millis(self.config.timeout_ms),
            tool.execute(arguments),
        )
        .await;

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(Ok(output)) => {
                debug!(tool = %name, duration_ms, "Tool executed");
                Ok(ToolExecution {
                    tool_name: name.to_string(),
                    output,
                    duration_ms,
                })
            }
            Ok(Err(e)) => {
                warn!(tool = %name, error = %e, "Tool failed");
                Err(e)
            }
            Err(_) => {
                warn!(tool = %name, timeout_ms = self.config.timeout_ms, "Tool timed out");
                Err(Error::Timeout {
                    tool: name.to_string(),
                    timeout_ms: self.config.timeout_ms,
                })
            }
        }
    }
}
