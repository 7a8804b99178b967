//! Provider trait and request/response contract.

use crate::error::Result;
use crate::message::{Message, ToolCall, ToolSchema};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An outbound model inference request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// System instruction for this invocation
    pub instructions: Option<String>,
    /// Conversation context, oldest first
    pub messages: Vec<Message>,
    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,
}

impl ModelRequest {
    /// Create a request from a conversation
    #[must_use]
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            instructions: None,
            messages,
            tools: Vec::new(),
        }
    }

    /// Set the system instruction
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Set the available tools
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }
}

/// A model inference response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Text content, if any
    pub content: Option<String>,
    /// Tool calls the model wants executed
    #[serde(default)]
    pub requested_tool_calls: Vec<ToolCall>,
    /// Model that produced the response
    pub model: String,
}

impl ModelResponse {
    /// Create a plain text response
    #[must_use]
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            requested_tool_calls: Vec::new(),
            model: model.into(),
        }
    }

    /// Create a response that requests tool calls
    #[must_use]
    pub fn tool_calls(calls: Vec<ToolCall>, model: impl Into<String>) -> Self {
        Self {
            content: None,
            requested_tool_calls: calls,
            model: model.into(),
        }
    }

    /// Whether this response ends the turn (no tool calls requested)
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.requested_tool_calls.is_empty()
    }
}

/// Trait implemented by model inference backends
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Get the provider name
    fn name(&self) -> &str;

    /// Run one inference call
    async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse>;
}
