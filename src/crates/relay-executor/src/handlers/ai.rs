//! AI handler: one LLM streaming turn per task
//!
//! Appends the user message to the context history, emits the task's
//! opening events, and hands the provider stream to the stream processor
//! on a spawned task. The call returns before the stream finishes, but
//! every partial event is published before the bus's terminal sentinel.

use std::sync::Arc;

use relay_core::{
    AgentEvent, EventBus, Message, ModelMessage, TaskError, TaskRecord, TaskState, TaskStore,
};
use relay_runtime::{ContextManager, ToolInvocation, ToolRegistry};
use serde_json::Value;

use crate::error::Result;
use crate::llm::{ChatRequest, LanguageModel};
use crate::processor::{StreamProcessor, StreamScope};

pub struct AiHandler {
    model: Arc<dyn LanguageModel>,
    contexts: Arc<ContextManager>,
    registry: ToolRegistry,
    store: Arc<TaskStore>,
    system_prompt: Option<String>,
}

impl AiHandler {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        contexts: Arc<ContextManager>,
        registry: ToolRegistry,
        store: Arc<TaskStore>,
        system_prompt: Option<String>,
    ) -> Self {
        Self {
            model,
            contexts,
            registry,
            store,
            system_prompt,
        }
    }

    /// Start a fresh turn for `task_id`.
    ///
    /// Publishes `task{submitted}` and `status-update{working}` before
    /// returning; the stream itself runs on a spawned task.
    pub async fn start_turn(
        &self,
        task_id: &str,
        context_id: &str,
        content: Option<String>,
        data: Option<Value>,
        bus: Arc<EventBus>,
    ) -> Result<()> {
        self.contexts.get_or_create(context_id);

        let user_text = match (content, &data) {
            (Some(text), _) if !text.is_empty() => text,
            (_, Some(value)) => value.to_string(),
            (Some(text), None) => text,
            (None, None) => String::new(),
        };
        self.contexts
            .append_history(context_id, ModelMessage::user(user_text));
        self.contexts.associate_task(context_id, task_id);

        let cancel = self.store.insert(TaskRecord::new(task_id, context_id))?;
        bus.publish(AgentEvent::task(task_id, context_id, TaskState::Submitted))
            .await;
        self.store.transition(task_id, TaskState::Working)?;
        bus.publish(AgentEvent::status(
            task_id,
            context_id,
            TaskState::Working,
            false,
        ))
        .await;

        let request = ChatRequest {
            messages: self.contexts.history(context_id).unwrap_or_default(),
            system_prompt: self.system_prompt.clone(),
            tools: self.registry.snapshot(),
            invocation: ToolInvocation {
                context_id: context_id.to_string(),
                task_id: task_id.to_string(),
            },
        };
        let scope = StreamScope {
            task_id: task_id.to_string(),
            context_id: context_id.to_string(),
            bus,
            cancel,
        };

        let model = self.model.clone();
        let store = self.store.clone();
        let contexts = self.contexts.clone();
        let task_id = task_id.to_string();
        let context_id = context_id.to_string();
        tokio::spawn(async move {
            tracing::debug!(task_id = %task_id, context_id = %context_id, "starting model stream");
            let stream = match model.stream(request).await {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = store.fail(&task_id, TaskError::new(err.message.clone()));
                    let note = Message::agent_text(&context_id, err.message);
                    scope
                        .bus
                        .publish(AgentEvent::status_with_message(
                            &task_id,
                            &context_id,
                            TaskState::Failed,
                            true,
                            note,
                        ))
                        .await;
                    scope.bus.finished().await;
                    return;
                }
            };

            let outcome = StreamProcessor::new(scope, store).process(stream).await;
            if let Some(assistant) = outcome.assistant_message() {
                if !contexts.append_history(&context_id, assistant) {
                    tracing::debug!(
                        context_id = %context_id,
                        "context deleted mid-stream, assistant message dropped"
                    );
                }
            }
        });

        Ok(())
    }
}
