//! Registry - Tool registration and discovery
//!
//! Tools are registered once at startup with their metadata and queried by
//! name during execution. The registry also renders the schemas handed to
//! the model layer.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Tool metadata and argument schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON schema for arguments
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Create a new tool definition with an empty object schema
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        }
    }

    /// Set the argument schema
    #[must_use]
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Trait implemented by executable tools
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool metadata
    fn definition(&self) -> ToolDefinition;

    /// Execute with the given arguments
    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value>;
}

/// In-memory tool registry, populated at startup
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.definition().name;
        if self.tools.contains_key(&name) {
            return Err(Error::Duplicate { name });
        }
        debug!(tool = %name, "Tool registered");
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.tools.get(name).cloned().ok_or_else(|| Error::NotFound {
            name: name.to_string(),
        })
    }

    /// Whether a tool with this name exists
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List registered tool names
    #[must_use]
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Render schemas for the model layer, restricted to the given names.
    ///
    /// Unknown names are skipped rather than erroring; the caller validates
    /// tool assignments at registration time.
    #[must_use]
    pub fn schemas_for(&self, names: &[String]) -> Vec<maestro_llm::ToolSchema> {
        names
            .iter()
            .filter_map(|n| self.tools.get(n))
            .map(|t| {
                let def = t.definition();
                maestro_llm::ToolSchema::new(def.name, def.description)
                    .with_parameters(def.parameters)
            })
            .collect()
    }
}
