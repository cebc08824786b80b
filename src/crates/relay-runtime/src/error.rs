//! Error types for the workflow runtime

use relay_core::CoreError;
use thiserror::Error;

use crate::schema::SchemaError;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors raised by runtime operations
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No plugin registered under the given id
    #[error("plugin not found: {plugin_id}")]
    PluginNotFound { plugin_id: String },

    /// A plugin id is already registered with a different version
    #[error("plugin {plugin_id} already registered with version {registered}, refusing {offered}")]
    PluginVersionConflict {
        plugin_id: String,
        registered: String,
        offered: String,
    },

    /// The request targets a task in a state that cannot accept it
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Dispatch parameters were rejected by the plugin's input schema
    #[error("invalid parameters for plugin {plugin_id}")]
    InvalidParameters {
        plugin_id: String,
        errors: Vec<SchemaError>,
    },

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl RuntimeError {
    /// Shorthand for an `InvalidRequest`
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}

/// Error returned from a workflow plugin body
///
/// Carried into the owning task's `failed` record as `{message, code}`.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct WorkflowError {
    pub message: String,
    pub code: Option<String>,
}

impl WorkflowError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// The workflow was cancelled while suspended
    pub fn cancelled() -> Self {
        Self::new("workflow cancelled").with_code("cancelled")
    }
}

impl From<anyhow::Error> for WorkflowError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string()).with_code("serde")
    }
}

impl From<String> for WorkflowError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for WorkflowError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
