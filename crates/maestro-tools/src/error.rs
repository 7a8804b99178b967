//! Error types for tool execution.

use thiserror::Error;

/// Tool layer error
#[derive(Debug, Error)]
pub enum Error {
    /// No tool registered under this name
    #[error("tool not found: {name}")]
    NotFound {
        /// Requested tool name
        name: String,
    },

    /// A tool with this name is already registered
    #[error("tool already registered: {name}")]
    Duplicate {
        /// Conflicting tool name
        name: String,
    },

    /// The tool ran and failed
    #[error("tool '{tool}' failed: {message}")]
    Execution {
        /// Tool name
        tool: String,
        /// Failure description
        message: String,
    },

    /// The tool exceeded its deadline
    #[error("tool '{tool}' timed out after {timeout_ms}ms")]
    Timeout {
        /// Tool name
        tool: String,
        /// Deadline that was exceeded
        timeout_ms: u64,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
