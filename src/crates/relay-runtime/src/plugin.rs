//! Workflow plugin trait and coroutine plumbing
//!
//! Plugins are modeled as bidirectional coroutines: the plugin body runs as
//! its own task, emits [`WorkflowYield`] values through the yield channel,
//! and receives validated input back when it pauses. `interrupt` closes no
//! channels; the plugin parks on the input channel until the runtime
//! delivers the validated resume value.

use std::time::Duration;

use async_trait::async_trait;
use relay_core::{Artifact, CancelSignal, Part, PauseReason};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::WorkflowError;
use crate::yields::WorkflowYield;

/// Execution context handed to a plugin body
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    /// Task owning this execution
    pub task_id: String,

    /// Conversation the task belongs to
    pub context_id: String,

    /// Dispatch parameters, already validated against the plugin's input
    /// schema when one is declared
    pub parameters: Value,

    /// Free-form dispatch metadata
    pub metadata: Option<Value>,
}

/// A registered workflow plugin
///
/// `run` is the generator body: it yields through the provided
/// [`WorkflowIo`] and returns the task result. A returned error fails the
/// task with the error's `{message, code}`.
#[async_trait]
pub trait WorkflowPlugin: Send + Sync {
    /// Stable plugin identifier (canonicalized into the dispatch tool name)
    fn id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    /// Schema dispatch parameters must satisfy, when declared
    fn input_schema(&self) -> Option<Value> {
        None
    }

    /// Per-plugin override of the dispatch-response timeout
    fn dispatch_response_timeout(&self) -> Option<Duration> {
        None
    }

    async fn run(&self, ctx: WorkflowContext, io: WorkflowIo) -> Result<Value, WorkflowError>;
}

/// Yield/input channel pair owned by a running plugin body
pub struct WorkflowIo {
    task_id: String,
    yield_tx: mpsc::Sender<WorkflowYield>,
    input_rx: mpsc::Receiver<Value>,
    cancel: CancelSignal,
}

impl std::fmt::Debug for WorkflowIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowIo")
            .field("task_id", &self.task_id)
            .finish()
    }
}

impl WorkflowIo {
    pub(crate) fn new(
        task_id: impl Into<String>,
        yield_tx: mpsc::Sender<WorkflowYield>,
        input_rx: mpsc::Receiver<Value>,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            yield_tx,
            input_rx,
            cancel,
        }
    }

    /// Whether cancellation has been requested for the owning task
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for cancellation; usable in `tokio::select!` inside plugin
    /// bodies for cooperative cleanup
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    async fn send(&self, value: WorkflowYield) -> Result<(), WorkflowError> {
        // A closed yield channel means the driver is gone, which only
        // happens on cancellation or termination.
        self.yield_tx
            .send(value)
            .await
            .map_err(|_| WorkflowError::cancelled())
    }

    /// Emit a progress message
    pub async fn status(&self, text: impl Into<String>) -> Result<(), WorkflowError> {
        self.send(WorkflowYield::StatusUpdate { text: text.into() }).await
    }

    /// Emit a complete artifact
    pub async fn artifact(&self, artifact: Artifact) -> Result<(), WorkflowError> {
        self.artifact_chunk(artifact, false, true).await
    }

    /// Emit one chunk of a streamed artifact
    pub async fn artifact_chunk(
        &self,
        artifact: Artifact,
        append: bool,
        last_chunk: bool,
    ) -> Result<(), WorkflowError> {
        self.send(WorkflowYield::Artifact {
            artifact,
            append,
            last_chunk,
        })
        .await
    }

    /// Return data to the dispatching tool-call result; only meaningful as
    /// the first yield
    pub async fn dispatch_response(&self, parts: Vec<Part>) -> Result<(), WorkflowError> {
        self.send(WorkflowYield::DispatchResponse { parts }).await
    }

    /// Terminally self-reject the task
    pub async fn reject(&self, reason: impl Into<String>) -> Result<(), WorkflowError> {
        self.send(WorkflowYield::Reject {
            reason: reason.into(),
        })
        .await
    }

    /// Pause for user input and park until the validated value arrives
    pub async fn require_input(
        &mut self,
        prompt: impl Into<String>,
        input_schema: Option<Value>,
    ) -> Result<Value, WorkflowError> {
        self.interrupt(PauseReason::InputRequired, prompt, input_schema)
            .await
    }

    /// Pause for an authorization step and park until it completes
    pub async fn require_auth(
        &mut self,
        prompt: impl Into<String>,
        input_schema: Option<Value>,
    ) -> Result<Value, WorkflowError> {
        self.interrupt(PauseReason::AuthRequired, prompt, input_schema)
            .await
    }

    async fn interrupt(
        &mut self,
        reason: PauseReason,
        prompt: impl Into<String>,
        input_schema: Option<Value>,
    ) -> Result<Value, WorkflowError> {
        self.send(WorkflowYield::Interrupted {
            reason,
            prompt: prompt.into(),
            input_schema,
        })
        .await?;

        tracing::debug!(task_id = %self.task_id, reason = ?reason, "workflow parked for input");
        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => Err(WorkflowError::cancelled()),
            input = self.input_rx.recv() => match input {
                Some(input) => Ok(input),
                None => Err(WorkflowError::cancelled()),
            }
        }
    }
}
