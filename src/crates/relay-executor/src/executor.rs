//! Agent executor entry point
//!
//! Decodes the request's message parts, ensures the conversation context
//! exists, and delegates to the message handler. All shared resources come
//! in through the constructor so tests can supply in-memory doubles.

use std::sync::Arc;

use relay_core::{EventBus, Part};
use relay_runtime::ContextManager;
use serde_json::Value;

use crate::error::Result;
use crate::handlers::{IncomingMessage, MessageHandler, WorkflowHandler};

/// Inbound user message: parts plus the legacy single-field content some
/// clients still send
#[derive(Debug, Clone, Default)]
pub struct UserMessage {
    pub parts: Vec<Part>,
    pub content: Option<String>,
}

impl UserMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::text(text)],
            content: None,
        }
    }

    pub fn data(data: Value) -> Self {
        Self {
            parts: vec![Part::data(data)],
            content: None,
        }
    }

    pub fn parts(parts: Vec<Part>) -> Self {
        Self {
            parts,
            content: None,
        }
    }
}

/// One inbound request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user_message: UserMessage,

    /// Target task; empty means "create one"
    pub task_id: String,

    pub context_id: String,

    /// Opaque per-request configuration
    pub configuration: Option<Value>,
}

pub struct AgentExecutor {
    contexts: Arc<ContextManager>,
    messages: MessageHandler,
    workflows: Arc<WorkflowHandler>,
}

impl AgentExecutor {
    pub fn new(
        contexts: Arc<ContextManager>,
        messages: MessageHandler,
        workflows: Arc<WorkflowHandler>,
    ) -> Self {
        Self {
            contexts,
            messages,
            workflows,
        }
    }

    /// Handle one request, publishing all resulting events on `bus`
    pub async fn execute(&self, request: RequestContext, bus: Arc<EventBus>) -> Result<()> {
        self.contexts.get_or_create(&request.context_id);
        self.contexts.touch(&request.context_id);

        let content = request
            .user_message
            .parts
            .iter()
            .find_map(|p| p.as_text())
            .map(str::to_string)
            .or(request.user_message.content);
        let data = request
            .user_message
            .parts
            .iter()
            .find_map(|p| p.as_data())
            .cloned();

        let incoming = IncomingMessage {
            task_id: Some(request.task_id).filter(|id| !id.is_empty()),
            context_id: request.context_id,
            content,
            data,
        };
        self.messages.handle(incoming, bus).await
    }

    /// Cancel a task; idempotent, `false` for terminal or unknown tasks
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        self.workflows.cancel_task(task_id).await
    }
}
