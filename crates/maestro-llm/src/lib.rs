//! Maestro LLM - Model Inference Abstraction
//!
//! This crate defines the contract between the Maestro orchestration core and
//! whatever model inference backend hosts it:
//! - Provider: the `ModelProvider` trait every backend implements
//! - Message: conversation message and tool-call types
//! - Error: failure modes the orchestrator is expected to handle
//!
//! The core treats inference as an opaque call; no concrete provider ships
//! with this crate.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod message;
pub mod provider;

pub use error::{Error, Result};
pub use message::{Message, MessageRole, ToolCall, ToolSchema};
pub use provider::{ModelProvider, ModelRequest, ModelResponse};
