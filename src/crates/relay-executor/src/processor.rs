//! Stream processor: provider chunks in, protocol events out
//!
//! Transforms an LLM token stream into `artifact-update` / `status-update`
//! events on the owning task's bus. Text and reasoning deltas go through a
//! ring buffer of size one: chunk N is held until chunk N+1 arrives, so the
//! terminator (`lastChunk = true`) can be set on the final chunk alone. The
//! receiver sees every chunk except the last without knowing which is last,
//! then receives the terminator.
//!
//! Tool calls are republished as artifacts, except `dispatch_workflow_*`
//! calls whose initial artifact is suppressed; their results surface as a
//! parent status-update referencing the child task.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use relay_core::{
    AgentEvent, Artifact, CancelSignal, EventBus, Message, ModelMessage, Part, Role, TaskError,
    TaskState, TaskStore,
};
use relay_runtime::DISPATCH_TOOL_PREFIX;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::llm::{ChunkStream, StreamChunk};

/// Identity of the stream's owning task
#[derive(Clone)]
pub struct StreamScope {
    pub task_id: String,
    pub context_id: String,
    pub bus: Arc<EventBus>,
    pub cancel: CancelSignal,
}

/// How the stream ended
#[derive(Debug, Clone, PartialEq)]
pub enum StreamStatus {
    Completed,
    Failed(String),
    Canceled,
}

/// Post-stream summary
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutcome {
    pub text: String,
    pub reasoning: String,
    pub status: StreamStatus,
}

impl StreamOutcome {
    /// Assistant history entry for a completed stream, reasoning ordered
    /// before text
    pub fn assistant_message(&self) -> Option<ModelMessage> {
        if self.status != StreamStatus::Completed {
            return None;
        }
        if self.text.is_empty() && self.reasoning.is_empty() {
            return None;
        }
        let mut message = ModelMessage {
            role: Role::Assistant,
            content: self.text.clone(),
            reasoning: None,
        };
        if !self.reasoning.is_empty() {
            message.reasoning = Some(self.reasoning.clone());
        }
        Some(message)
    }
}

/// Ring buffer of size one over one streamed artifact
struct ArtifactTrack {
    artifact_id: String,
    name: &'static str,
    buffered: Option<String>,
    next_chunk_index: u64,
    accumulated: String,
    terminated: bool,
}

/// One publishable chunk drained from a track
struct TrackChunk {
    delta: String,
    chunk_index: u64,
    append: bool,
    last: bool,
}

impl ArtifactTrack {
    fn new(name: &'static str) -> Self {
        Self {
            artifact_id: Uuid::new_v4().to_string(),
            name,
            buffered: None,
            next_chunk_index: 0,
            accumulated: String::new(),
            terminated: false,
        }
    }

    /// Buffer a delta, releasing the previously held one
    fn push(&mut self, delta: String) -> Option<TrackChunk> {
        if self.terminated {
            return None;
        }
        self.accumulated.push_str(&delta);
        let released = self.buffered.replace(delta)?;
        let chunk_index = self.next_chunk_index;
        self.next_chunk_index += 1;
        Some(TrackChunk {
            delta: released,
            chunk_index,
            append: chunk_index > 0,
            last: false,
        })
    }

    /// Release the held chunk as the terminator; exactly one terminator is
    /// ever produced per track
    fn flush(&mut self) -> Option<TrackChunk> {
        if self.terminated {
            return None;
        }
        self.terminated = true;
        let delta = self.buffered.take()?;
        let chunk_index = self.next_chunk_index;
        self.next_chunk_index += 1;
        Some(TrackChunk {
            delta,
            chunk_index,
            append: chunk_index > 0,
            last: true,
        })
    }
}

/// Consumes one provider stream for one task
pub struct StreamProcessor {
    scope: StreamScope,
    store: Arc<TaskStore>,
    text: ArtifactTrack,
    reasoning: ArtifactTrack,
    tool_artifacts: HashMap<String, String>,
}

impl StreamProcessor {
    pub fn new(scope: StreamScope, store: Arc<TaskStore>) -> Self {
        Self {
            scope,
            store,
            text: ArtifactTrack::new("text-response"),
            reasoning: ArtifactTrack::new("reasoning"),
            tool_artifacts: HashMap::new(),
        }
    }

    /// Drive the stream to completion, publishing protocol events along
    /// the way. Emits the terminal status and the bus sentinel on every
    /// exit path, and finalizes the task record.
    pub async fn process(mut self, mut stream: ChunkStream) -> StreamOutcome {
        let cancel = self.scope.cancel.clone();
        let status = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(task_id = %self.scope.task_id, "stream aborted at chunk boundary");
                    break StreamStatus::Canceled;
                }
                next = stream.next() => match next {
                    Some(Ok(chunk)) => self.handle(chunk).await,
                    Some(Err(err)) => break StreamStatus::Failed(err.message),
                    None => break StreamStatus::Completed,
                }
            }
        };

        match &status {
            StreamStatus::Completed => {
                self.flush_text().await;
                self.flush_reasoning().await;
                let _ = self.store.complete(&self.scope.task_id, None);
                self.scope
                    .bus
                    .publish(AgentEvent::status(
                        &self.scope.task_id,
                        &self.scope.context_id,
                        TaskState::Completed,
                        true,
                    ))
                    .await;
            }
            StreamStatus::Failed(message) => {
                let _ = self
                    .store
                    .fail(&self.scope.task_id, TaskError::new(message.clone()));
                let note = Message::agent_text(&self.scope.context_id, message.clone());
                self.scope
                    .bus
                    .publish(AgentEvent::status_with_message(
                        &self.scope.task_id,
                        &self.scope.context_id,
                        TaskState::Failed,
                        true,
                        note,
                    ))
                    .await;
            }
            StreamStatus::Canceled => {
                let _ = self.store.transition(&self.scope.task_id, TaskState::Canceled);
                self.scope
                    .bus
                    .publish(AgentEvent::status(
                        &self.scope.task_id,
                        &self.scope.context_id,
                        TaskState::Canceled,
                        true,
                    ))
                    .await;
            }
        }
        self.scope.bus.finished().await;

        StreamOutcome {
            text: self.text.accumulated,
            reasoning: self.reasoning.accumulated,
            status,
        }
    }

    async fn handle(&mut self, chunk: StreamChunk) {
        match chunk {
            StreamChunk::TextDelta { delta } => {
                if let Some(released) = self.text.push(delta) {
                    self.publish_track_chunk(&self.text.artifact_id.clone(), self.text.name, released)
                        .await;
                }
            }
            StreamChunk::TextEnd => {
                self.flush_text().await;
            }
            StreamChunk::ReasoningStart => {}
            StreamChunk::ReasoningDelta { delta } => {
                if let Some(released) = self.reasoning.push(delta) {
                    self.publish_track_chunk(
                        &self.reasoning.artifact_id.clone(),
                        self.reasoning.name,
                        released,
                    )
                    .await;
                }
            }
            StreamChunk::ReasoningEnd => {
                self.flush_reasoning().await;
            }
            StreamChunk::ToolCall { id, name, input } => {
                self.handle_tool_call(id, name, input).await;
            }
            StreamChunk::ToolInputDelta { .. } | StreamChunk::ToolInputEnd { .. } => {}
            StreamChunk::ToolResult { id, name, result } => {
                self.handle_tool_result(id, name, result).await;
            }
            StreamChunk::Raw { .. } => {}
        }
    }

    async fn handle_tool_call(&mut self, id: String, name: String, input: Value) {
        if name.starts_with(DISPATCH_TOOL_PREFIX) {
            // The child task's own events carry the information.
            tracing::debug!(task_id = %self.scope.task_id, tool = %name, "dispatch tool call suppressed");
            return;
        }

        let artifact_id = Uuid::new_v4().to_string();
        self.tool_artifacts.insert(id.clone(), artifact_id.clone());
        let artifact = Artifact::new(artifact_id)
            .with_name("tool-call")
            .with_parts(vec![Part::data(json!({
                "toolCallId": id,
                "toolName": name,
                "input": input,
            }))]);
        self.scope
            .bus
            .publish(AgentEvent::artifact(
                &self.scope.task_id,
                &self.scope.context_id,
                artifact,
                None,
                None,
            ))
            .await;
    }

    async fn handle_tool_result(&mut self, id: String, name: String, result: Value) {
        if let Some(reference) = dispatched_child(&result) {
            self.publish_child_reference(reference, &result).await;
            return;
        }

        let artifact_id = self
            .tool_artifacts
            .remove(&id)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let artifact = Artifact::new(artifact_id)
            .with_name("tool-result")
            .with_parts(vec![Part::data(json!({
                "toolCallId": id,
                "toolName": name,
                "result": result,
            }))]);
        self.scope
            .bus
            .publish(AgentEvent::artifact(
                &self.scope.task_id,
                &self.scope.context_id,
                artifact,
                Some(true),
                Some(true),
            ))
            .await;
    }

    /// Publish the parent-side reference to a dispatched child task,
    /// merging any dispatch-response parts the child returned
    async fn publish_child_reference(&mut self, child_task_id: String, result: &Value) {
        let text = result
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                let workflow = result
                    .pointer("/metadata/workflowName")
                    .and_then(Value::as_str)
                    .unwrap_or("workflow");
                format!("Dispatched {workflow} as task {child_task_id}")
            });

        let mut parts = vec![Part::text(text)];
        if let Some(extra) = result.get("parts") {
            if let Ok(decoded) = serde_json::from_value::<Vec<Part>>(extra.clone()) {
                parts.extend(decoded);
            }
        }

        let message = Message::new(&self.scope.context_id, Role::Agent, parts)
            .with_reference_task_ids(vec![child_task_id]);
        self.scope
            .bus
            .publish(AgentEvent::status_with_message(
                &self.scope.task_id,
                &self.scope.context_id,
                TaskState::Working,
                false,
                message,
            ))
            .await;
    }

    async fn flush_text(&mut self) {
        if let Some(released) = self.text.flush() {
            self.publish_track_chunk(&self.text.artifact_id.clone(), self.text.name, released)
                .await;
        }
    }

    async fn flush_reasoning(&mut self) {
        if let Some(released) = self.reasoning.flush() {
            self.publish_track_chunk(
                &self.reasoning.artifact_id.clone(),
                self.reasoning.name,
                released,
            )
            .await;
        }
    }

    async fn publish_track_chunk(&self, artifact_id: &str, name: &'static str, chunk: TrackChunk) {
        let artifact = Artifact::new(artifact_id)
            .with_name(name)
            .with_parts(vec![Part::text(chunk.delta)])
            .with_metadata(json!({"chunkIndex": chunk.chunk_index}));
        self.scope
            .bus
            .publish(AgentEvent::artifact(
                &self.scope.task_id,
                &self.scope.context_id,
                artifact,
                Some(chunk.append),
                Some(chunk.last),
            ))
            .await;
    }
}

/// Child task id when a tool result marks a dispatched workflow
fn dispatched_child(result: &Value) -> Option<String> {
    let obj = result.as_object()?;
    if !obj.contains_key("metadata") {
        return None;
    }
    obj.get("taskId")
        .and_then(Value::as_str)
        .map(str::to_string)
}
