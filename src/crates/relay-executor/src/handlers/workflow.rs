//! Workflow handler: dispatch, resume, and cancel on behalf of the executor
//!
//! Dispatch creates the child task's bus and publishes its initial `task`
//! event before the runtime starts driving, so the parent's
//! `referenceTaskIds` status-update is always ordered after the child's
//! `task{submitted}`. Child tasks reuse the parent's `contextId` and appear
//! in the same conversation.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{AgentEvent, EventBus, EventBusManager, Message, Part, Role, TaskState};
use relay_runtime::{
    DispatchReply, DispatchRequest, ToolError, ToolInvocation, WorkflowDispatcher,
    WorkflowRuntime, DISPATCH_TOOL_PREFIX,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{ExecutorError, Result};

pub struct WorkflowHandler {
    runtime: Arc<WorkflowRuntime>,
    buses: Arc<EventBusManager>,
}

impl WorkflowHandler {
    pub fn new(runtime: Arc<WorkflowRuntime>, buses: Arc<EventBusManager>) -> Self {
        Self { runtime, buses }
    }

    /// Dispatch the workflow behind a `dispatch_workflow_*` tool call.
    ///
    /// Returns the tool-call result value: `{taskId, metadata, parts,
    /// message}`, with `parts` holding the child's dispatch reply bounded
    /// by the dispatch-response timeout.
    pub async fn dispatch_workflow(
        &self,
        tool_name: &str,
        args: Value,
        context_id: &str,
    ) -> Result<Value> {
        let canonical = tool_name
            .strip_prefix(DISPATCH_TOOL_PREFIX)
            .ok_or_else(|| {
                ExecutorError::invalid_request(format!("{tool_name} is not a dispatch tool"))
            })?;
        let plugin_id = self
            .runtime
            .resolve_dispatch_plugin(canonical)
            .ok_or_else(|| relay_runtime::RuntimeError::PluginNotFound {
                plugin_id: canonical.to_string(),
            })?;

        let task_id = Uuid::new_v4().to_string();
        let bus = self.buses.create(&task_id);
        bus.publish(AgentEvent::task(&task_id, context_id, TaskState::Submitted))
            .await;

        let execution = match self
            .runtime
            .dispatch(
                &plugin_id,
                DispatchRequest {
                    context_id: context_id.to_string(),
                    task_id: Some(task_id.clone()),
                    parameters: args,
                    metadata: None,
                },
            )
            .await
        {
            Ok(execution) => execution,
            Err(err) => {
                bus.finished().await;
                self.buses.release(&task_id);
                return Err(err.into());
            }
        };

        let reply = execution.dispatch_response().await;
        let message = match &reply {
            DispatchReply::Parts(parts) => parts
                .iter()
                .find_map(|p| p.as_text())
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!("{} responded", execution.workflow_name())
                }),
            DispatchReply::PausePrompt(prompt) => prompt.clone(),
            DispatchReply::Acknowledgment { workflow_name, .. } => {
                format!("Dispatched {workflow_name} as task {task_id}")
            }
        };

        let result = json!({
            "taskId": task_id.clone(),
            "metadata": {
                "workflowName": execution.workflow_name(),
                "pluginId": plugin_id,
            },
            "parts": reply.into_parts(),
            "message": message,
        });

        self.buses.release(&task_id);
        Ok(result)
    }

    /// Deliver a resume payload to a paused workflow.
    ///
    /// The data part is preferred as the input value, falling back to the
    /// text content. A schema rejection re-emits the pause prompt with the
    /// structured errors and leaves the task paused; runtime errors
    /// propagate.
    pub async fn resume_workflow(
        &self,
        task_id: &str,
        context_id: &str,
        content: Option<String>,
        data: Option<Value>,
        bus: &Arc<EventBus>,
    ) -> Result<()> {
        let input = match data {
            Some(value) => value,
            None => Value::String(content.unwrap_or_default()),
        };

        let outcome = self.runtime.resume_workflow(task_id, input).await?;
        if outcome.valid {
            return Ok(());
        }

        let record = self.runtime.task_state(task_id);
        let state = record
            .as_ref()
            .map(|r| r.state)
            .unwrap_or(TaskState::InputRequired);
        let prompt = record
            .and_then(|r| r.pause_info)
            .map(|p| p.prompt)
            .unwrap_or_else(|| "Input required".to_string());
        let errors = outcome.errors.unwrap_or_default();
        tracing::debug!(task_id = %task_id, errors = errors.len(), "resume rejected, re-emitting prompt");

        let message = Message::new(
            context_id,
            Role::Agent,
            vec![Part::text(prompt), Part::data(json!({ "errors": errors }))],
        );
        bus.publish(AgentEvent::status_with_message(
            task_id, context_id, state, false, message,
        ))
        .await;
        Ok(())
    }

    /// Cancel a task; idempotent, `false` for terminal or unknown tasks
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        self.runtime.cancel_execution(task_id).await
    }
}

#[async_trait]
impl WorkflowDispatcher for WorkflowHandler {
    async fn dispatch_tool(
        &self,
        tool_name: &str,
        args: Value,
        invocation: ToolInvocation,
    ) -> std::result::Result<Value, ToolError> {
        self.dispatch_workflow(tool_name, args, &invocation.context_id)
            .await
            .map_err(|err| ToolError::Execution {
                name: tool_name.to_string(),
                error: err.to_string(),
            })
    }
}
