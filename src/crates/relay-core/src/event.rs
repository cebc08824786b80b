//! Protocol events published on task event buses
//!
//! These shapes are the contract with external subscribers; the `kind` tag
//! and camelCase field names are normative. Events dispatch on the tag, not
//! on an inheritance hierarchy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::part::{Message, Part, Role};
use crate::task::TaskState;

/// Status snapshot carried by `task` and `status-update` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Lifecycle state at the time of the event
    pub state: TaskState,

    /// Optional agent message accompanying the status (pause prompts,
    /// dispatch references)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,

    /// Event timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TaskStatus {
    pub fn new(state: TaskState) -> Self {
        Self {
            state,
            message: None,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }
}

/// A named, structured output attached to a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact identity; streamed chunks of the same artifact share it
    #[serde(rename = "artifactId")]
    pub artifact_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Ordered content parts
    pub parts: Vec<Part>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Artifact {
    pub fn new(artifact_id: impl Into<String>) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            name: None,
            description: None,
            parts: Vec::new(),
            metadata: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parts(mut self, parts: Vec<Part>) -> Self {
        self.parts = parts;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Protocol event union published to bus subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AgentEvent {
    /// A task came into existence
    Task {
        id: String,
        #[serde(rename = "contextId")]
        context_id: String,
        status: TaskStatus,
    },

    /// A task changed state or reported progress
    StatusUpdate {
        #[serde(rename = "taskId")]
        task_id: String,
        #[serde(rename = "contextId")]
        context_id: String,
        status: TaskStatus,
        /// Terminal marker; no further status updates follow a final one
        #[serde(rename = "final")]
        is_final: bool,
    },

    /// A task produced or extended an artifact
    ArtifactUpdate {
        #[serde(rename = "taskId")]
        task_id: String,
        #[serde(rename = "contextId")]
        context_id: String,
        artifact: Artifact,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        append: Option<bool>,
        #[serde(
            rename = "lastChunk",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        last_chunk: Option<bool>,
    },

    /// A standalone protocol message
    Message {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "contextId")]
        context_id: String,
        role: Role,
        parts: Vec<Part>,
        #[serde(
            rename = "referenceTaskIds",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        reference_task_ids: Option<Vec<String>>,
    },
}

impl AgentEvent {
    /// Create a `task` event
    pub fn task(id: impl Into<String>, context_id: impl Into<String>, state: TaskState) -> Self {
        Self::Task {
            id: id.into(),
            context_id: context_id.into(),
            status: TaskStatus::new(state),
        }
    }

    /// Create a `status-update` event
    pub fn status(
        task_id: impl Into<String>,
        context_id: impl Into<String>,
        state: TaskState,
        is_final: bool,
    ) -> Self {
        Self::StatusUpdate {
            task_id: task_id.into(),
            context_id: context_id.into(),
            status: TaskStatus::new(state),
            is_final,
        }
    }

    /// Create a `status-update` event carrying an agent message
    pub fn status_with_message(
        task_id: impl Into<String>,
        context_id: impl Into<String>,
        state: TaskState,
        is_final: bool,
        message: Message,
    ) -> Self {
        Self::StatusUpdate {
            task_id: task_id.into(),
            context_id: context_id.into(),
            status: TaskStatus::new(state).with_message(message),
            is_final,
        }
    }

    /// Create an `artifact-update` event
    pub fn artifact(
        task_id: impl Into<String>,
        context_id: impl Into<String>,
        artifact: Artifact,
        append: Option<bool>,
        last_chunk: Option<bool>,
    ) -> Self {
        Self::ArtifactUpdate {
            task_id: task_id.into(),
            context_id: context_id.into(),
            artifact,
            append,
            last_chunk,
        }
    }

    /// Create a `message` event from a protocol message
    pub fn message(message: Message) -> Self {
        Self::Message {
            message_id: message.message_id,
            context_id: message.context_id,
            role: message.role,
            parts: message.parts,
            reference_task_ids: message.reference_task_ids,
        }
    }

    /// Task id this event pertains to
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Task { id, .. } => Some(id),
            Self::StatusUpdate { task_id, .. } | Self::ArtifactUpdate { task_id, .. } => {
                Some(task_id)
            }
            Self::Message { .. } => None,
        }
    }

    /// State carried by this event, when it is a status-bearing kind
    pub fn state(&self) -> Option<TaskState> {
        match self {
            Self::Task { status, .. } | Self::StatusUpdate { status, .. } => Some(status.state),
            _ => None,
        }
    }

    /// Whether this is a terminal `status-update`
    pub fn is_final(&self) -> bool {
        matches!(self, Self::StatusUpdate { is_final: true, .. })
    }
}
