//! Error types for the agent executor

use relay_core::CoreError;
use relay_runtime::{RuntimeError, ToolError};
use thiserror::Error;

/// Result type alias for executor operations
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Errors raised on the executor entry path
///
/// Errors that can be attached to a task surface as `failed` status
/// updates on that task's bus instead; only entry-path errors propagate to
/// the caller.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The request targets a terminal or otherwise unusable task
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The LLM provider stream failed
    #[error("stream error: {message}")]
    Stream { message: String },

    /// Configuration could not be loaded or parsed
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ExecutorError {
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}
