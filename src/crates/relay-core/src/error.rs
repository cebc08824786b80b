//! Error types shared across the relay core.

use crate::task::TaskState;
use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the core data model and event plumbing
#[derive(Debug, Error)]
pub enum CoreError {
    /// A task attempted a lifecycle transition the state machine forbids
    #[error("invalid task transition: {from} -> {to}")]
    InvalidTransition { from: TaskState, to: TaskState },

    /// The referenced task does not exist in the store
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },
}
