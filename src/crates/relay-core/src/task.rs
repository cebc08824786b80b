//! Task lifecycle state machine and task records
//!
//! A task is the unit of asynchronous work observed by external clients.
//! Every task is in exactly one [`TaskState`] at a time; the allowed
//! transitions form a fixed graph and every applied transition is recorded
//! with a timestamp. Invalid transitions raise
//! [`CoreError::InvalidTransition`](crate::error::CoreError).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoreError, Result};

/// Lifecycle states of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Task has been accepted but not yet started
    Submitted,
    /// Task is actively executing
    Working,
    /// Task is paused awaiting user input
    InputRequired,
    /// Task is paused awaiting an authorization step
    AuthRequired,
    /// Task finished successfully (terminal)
    Completed,
    /// Task finished with an error (terminal)
    Failed,
    /// Task was cancelled (terminal)
    Canceled,
    /// Task rejected itself or was rejected (terminal)
    Rejected,
    /// Read-only fallback for tasks in an unrecognized state; never a
    /// transition destination
    Unknown,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Working => "working",
            Self::InputRequired => "input-required",
            Self::AuthRequired => "auth-required",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Rejected => "rejected",
            Self::Unknown => "unknown",
        }
    }

    /// Whether this state has no outgoing transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Canceled | Self::Rejected
        )
    }

    /// Whether this state represents a paused workflow awaiting input
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::InputRequired | Self::AuthRequired)
    }

    /// Whether a transition from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        match self {
            Self::Submitted => matches!(
                next,
                Self::Working | Self::Failed | Self::Canceled | Self::Rejected
            ),
            Self::Working => matches!(
                next,
                Self::InputRequired
                    | Self::AuthRequired
                    | Self::Completed
                    | Self::Failed
                    | Self::Canceled
                    | Self::Rejected
            ),
            Self::InputRequired | Self::AuthRequired => {
                matches!(next, Self::Working | Self::Canceled | Self::Rejected)
            }
            Self::Completed | Self::Failed | Self::Canceled | Self::Rejected => false,
            // Unknown is read-only: no outgoing edges, and it is never a
            // destination either (enforced by the check below).
            Self::Unknown => false,
        }
    }

    /// Validate a transition, returning `InvalidTransition` when forbidden
    pub fn validate_transition(from: TaskState, to: TaskState) -> Result<()> {
        if to == Self::Unknown || !from.can_transition_to(to) {
            return Err(CoreError::InvalidTransition { from, to });
        }
        Ok(())
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reason a workflow paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PauseReason {
    InputRequired,
    AuthRequired,
}

impl PauseReason {
    /// The task state this pause reason maps to
    pub fn task_state(&self) -> TaskState {
        match self {
            Self::InputRequired => TaskState::InputRequired,
            Self::AuthRequired => TaskState::AuthRequired,
        }
    }
}

/// Pause bookkeeping held while a workflow awaits input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseInfo {
    /// Why the workflow paused
    pub reason: PauseReason,

    /// Prompt shown to the user
    pub prompt: String,

    /// Schema the resume input must satisfy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// Error captured on a failed task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl TaskError {
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
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

/// One recorded state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: TaskState,
    pub to: TaskState,
    pub at: DateTime<Utc>,
}

/// A task record held by the task store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique task identifier
    pub id: String,

    /// Conversation this task belongs to
    pub context_id: String,

    /// Current lifecycle state
    pub state: TaskState,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Timestamp of the terminal transition, once one occurred
    pub completed_at: Option<DateTime<Utc>>,

    /// Result value recorded on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error recorded on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,

    /// Pause bookkeeping while awaiting input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_info: Option<PauseInfo>,

    /// Ordered log of applied transitions
    pub transitions: Vec<TransitionRecord>,
}

impl TaskRecord {
    /// Create a new record in `submitted` state
    pub fn new(id: impl Into<String>, context_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context_id: context_id.into(),
            state: TaskState::Submitted,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
            pause_info: None,
            transitions: Vec::new(),
        }
    }

    /// Apply a validated transition, recording it in the log
    pub fn transition(&mut self, to: TaskState) -> Result<TaskState> {
        TaskState::validate_transition(self.state, to)?;
        let from = self.state;
        let now = Utc::now();
        self.state = to;
        self.transitions.push(TransitionRecord { from, to, at: now });
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(from)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused()
    }
}
