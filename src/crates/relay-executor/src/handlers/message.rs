//! Message handler: resume a paused workflow or start a fresh AI turn
//!
//! Classification order: terminal tasks reject the message outright, paused
//! tasks receive it as resume input, a `working` task with an empty-text
//! data payload is treated as a resume attempt that falls back to a fresh
//! turn, and everything else starts a new AI turn.

use std::sync::Arc;

use relay_core::EventBus;
use relay_runtime::WorkflowRuntime;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ExecutorError, Result};
use crate::handlers::{AiHandler, WorkflowHandler};

/// Decoded inbound message
#[derive(Debug, Clone, Default)]
pub struct IncomingMessage {
    /// Targeted task, when the client named one
    pub task_id: Option<String>,

    pub context_id: String,

    /// First text part (or legacy content)
    pub content: Option<String>,

    /// First data part
    pub data: Option<Value>,
}

impl IncomingMessage {
    fn is_data_only(&self) -> bool {
        self.data.is_some() && self.content.as_deref().map_or(true, str::is_empty)
    }
}

pub struct MessageHandler {
    runtime: Arc<WorkflowRuntime>,
    workflows: Arc<WorkflowHandler>,
    ai: Arc<AiHandler>,
}

impl MessageHandler {
    pub fn new(
        runtime: Arc<WorkflowRuntime>,
        workflows: Arc<WorkflowHandler>,
        ai: Arc<AiHandler>,
    ) -> Self {
        Self {
            runtime,
            workflows,
            ai,
        }
    }

    pub async fn handle(&self, message: IncomingMessage, bus: Arc<EventBus>) -> Result<()> {
        let record = message
            .task_id
            .as_deref()
            .and_then(|id| self.runtime.task_state(id));

        if let Some(record) = record {
            if record.state.is_terminal() {
                tracing::debug!(task_id = %record.id, state = %record.state, "message targets terminal task");
                bus.finished().await;
                return Err(ExecutorError::invalid_request(format!(
                    "task {} is already {}",
                    record.id, record.state
                )));
            }

            if record.state.is_paused() {
                return self
                    .workflows
                    .resume_workflow(
                        &record.id,
                        &message.context_id,
                        message.content,
                        message.data,
                        &bus,
                    )
                    .await;
            }

            // A data-only payload against a working task is treated as a
            // resume attempt; on failure it falls through to a fresh turn.
            if record.state == relay_core::TaskState::Working && message.is_data_only() {
                match self
                    .workflows
                    .resume_workflow(
                        &record.id,
                        &message.context_id,
                        message.content.clone(),
                        message.data.clone(),
                        &bus,
                    )
                    .await
                {
                    Ok(()) => return Ok(()),
                    Err(err) => {
                        tracing::debug!(
                            task_id = %record.id,
                            error = %err,
                            "working-state resume attempt failed, starting fresh turn"
                        );
                    }
                }
            }
        }

        // Fresh turn: reuse the client's task id only when it is unknown;
        // a live task keeps its single owner.
        let task_id = match &message.task_id {
            Some(id) if self.runtime.task_state(id).is_none() => id.clone(),
            _ => Uuid::new_v4().to_string(),
        };

        self.ai
            .start_turn(
                &task_id,
                &message.context_id,
                message.content,
                message.data,
                bus,
            )
            .await
    }
}
