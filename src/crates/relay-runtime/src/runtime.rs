//! Workflow runtime: plugin registry, dispatch, and generator driving
//!
//! The runtime registers plugins by id, dispatches them as tasks, and owns
//! one driver per live execution. The driver consumes the plugin's yield
//! channel, translates yields into protocol events on the task's bus, holds
//! pause bookkeeping while the plugin parks for input, and finalizes the
//! task on completion, failure, rejection, or cancellation.
//!
//! Event buses are resolved through the [`EventBusManager`] by task id;
//! the runtime holds no back-pointers into handlers or parents.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relay_core::{
    AgentEvent, CancelSignal, EventBus, EventBusManager, Message, PauseInfo, TaskError,
    TaskRecord, TaskState, TaskStore,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::error::{Result, RuntimeError, WorkflowError};
use crate::execution::{ExecutionOutcome, FirstYield, WorkflowExecution};
use crate::plugin::{WorkflowContext, WorkflowIo, WorkflowPlugin};
use crate::schema::{self, SchemaError};
use crate::tools::canonicalize;
use crate::yields::WorkflowYield;

/// Capacity of the yield channel between a plugin body and its driver
const YIELD_CHANNEL_CAPACITY: usize = 16;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Bound on the wait for a dispatched workflow's first yield
    pub dispatch_response_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            dispatch_response_timeout: Duration::from_millis(500),
        }
    }
}

/// Dispatch parameters for a workflow execution
#[derive(Debug, Clone, Default)]
pub struct DispatchRequest {
    /// Conversation the new task belongs to
    pub context_id: String,

    /// Task id to use; a new one is allocated when absent or empty
    pub task_id: Option<String>,

    /// Plugin parameters, validated against the input schema when declared
    pub parameters: Value,

    /// Free-form metadata forwarded to the plugin
    pub metadata: Option<Value>,
}

/// Result of a resume attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeOutcome {
    pub valid: bool,
    pub errors: Option<Vec<SchemaError>>,
}

impl ResumeOutcome {
    fn accepted() -> Self {
        Self {
            valid: true,
            errors: None,
        }
    }

    fn rejected(errors: Vec<SchemaError>) -> Self {
        Self {
            valid: false,
            errors: Some(errors),
        }
    }
}

/// Registered-plugin summary exposed to the tool registry
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub input_schema: Option<Value>,
}

struct ExecutionEntry {
    plugin_id: String,
    input_tx: mpsc::Sender<Value>,
}

/// Plugin registry and execution driver
pub struct WorkflowRuntime {
    plugins: DashMap<String, Arc<dyn WorkflowPlugin>>,
    executions: Arc<DashMap<String, ExecutionEntry>>,
    store: Arc<TaskStore>,
    buses: Arc<EventBusManager>,
    config: RuntimeConfig,
}

impl std::fmt::Debug for WorkflowRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRuntime")
            .field("plugins", &self.plugins.len())
            .field("executions", &self.executions.len())
            .finish()
    }
}

impl WorkflowRuntime {
    pub fn new(store: Arc<TaskStore>, buses: Arc<EventBusManager>, config: RuntimeConfig) -> Self {
        Self {
            plugins: DashMap::new(),
            executions: Arc::new(DashMap::new()),
            store,
            buses,
            config,
        }
    }

    /// Register a plugin. Idempotent for the same id and version; a
    /// version conflict is rejected.
    pub fn register(&self, plugin: Arc<dyn WorkflowPlugin>) -> Result<()> {
        let id = plugin.id().to_string();
        match self.plugins.entry(id.clone()) {
            Entry::Occupied(existing) => {
                if existing.get().version() == plugin.version() {
                    Ok(())
                } else {
                    Err(RuntimeError::PluginVersionConflict {
                        plugin_id: id,
                        registered: existing.get().version().to_string(),
                        offered: plugin.version().to_string(),
                    })
                }
            }
            Entry::Vacant(slot) => {
                tracing::info!(plugin_id = %id, version = %plugin.version(), "plugin registered");
                slot.insert(plugin);
                Ok(())
            }
        }
    }

    /// Look up a registered plugin
    pub fn plugin(&self, plugin_id: &str) -> Option<Arc<dyn WorkflowPlugin>> {
        self.plugins.get(plugin_id).map(|p| p.clone())
    }

    /// Summaries of every registered plugin
    pub fn plugin_descriptors(&self) -> Vec<PluginDescriptor> {
        self.plugins
            .iter()
            .map(|entry| {
                let p = entry.value();
                PluginDescriptor {
                    id: p.id().to_string(),
                    name: p.name().to_string(),
                    version: p.version().to_string(),
                    description: p.description().map(str::to_string),
                    input_schema: p.input_schema(),
                }
            })
            .collect()
    }

    /// Resolve a canonicalized dispatch-tool suffix back to a plugin id
    pub fn resolve_dispatch_plugin(&self, canonical: &str) -> Option<String> {
        self.plugins
            .iter()
            .map(|entry| entry.key().clone())
            .find(|id| canonicalize(id) == canonical)
    }

    /// Current record of a task, if known
    pub fn task_state(&self, task_id: &str) -> Option<TaskRecord> {
        self.store.get(task_id)
    }

    /// Dispatch a plugin as a new task.
    ///
    /// Returns immediately with the execution handle; the generator runs
    /// concurrently and always drives to completion independent of the
    /// caller's lifecycle.
    pub async fn dispatch(
        &self,
        plugin_id: &str,
        request: DispatchRequest,
    ) -> Result<WorkflowExecution> {
        let plugin = self
            .plugin(plugin_id)
            .ok_or_else(|| RuntimeError::PluginNotFound {
                plugin_id: plugin_id.to_string(),
            })?;

        if let Some(input_schema) = plugin.input_schema() {
            if let Err(errors) = schema::validate_value(&input_schema, &request.parameters) {
                return Err(RuntimeError::InvalidParameters {
                    plugin_id: plugin_id.to_string(),
                    errors,
                });
            }
        }

        let task_id = request
            .task_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let cancel = self
            .store
            .insert(TaskRecord::new(&task_id, &request.context_id))
            .map_err(|_| {
                RuntimeError::invalid_request(format!("task {task_id} already exists"))
            })?;

        tracing::info!(
            plugin_id = %plugin_id,
            task_id = %task_id,
            context_id = %request.context_id,
            "dispatching workflow"
        );

        let bus = self.buses.create(&task_id);
        let (yield_tx, yield_rx) = mpsc::channel(YIELD_CHANNEL_CAPACITY);
        let (input_tx, input_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = oneshot::channel();
        let (first_tx, first_rx) = oneshot::channel();
        let (outcome_tx, outcome_rx) = watch::channel(None);

        self.executions.insert(
            task_id.clone(),
            ExecutionEntry {
                plugin_id: plugin_id.to_string(),
                input_tx: input_tx.clone(),
            },
        );

        let ctx = WorkflowContext {
            task_id: task_id.clone(),
            context_id: request.context_id.clone(),
            parameters: request.parameters,
            metadata: request.metadata,
        };
        let io = WorkflowIo::new(&task_id, yield_tx, input_rx, cancel.clone());

        let body = plugin.clone();
        tokio::spawn(async move {
            let result = body.run(ctx, io).await;
            let _ = done_tx.send(result);
        });

        let driver = Driver {
            task_id: task_id.clone(),
            context_id: request.context_id,
            store: self.store.clone(),
            buses: self.buses.clone(),
            executions: self.executions.clone(),
            bus,
            cancel,
            first: Some(first_tx),
        };
        tokio::spawn(driver.run(yield_rx, done_rx, outcome_tx));

        let dispatch_timeout = plugin
            .dispatch_response_timeout()
            .unwrap_or(self.config.dispatch_response_timeout);

        Ok(WorkflowExecution::new(
            task_id,
            plugin_id.to_string(),
            plugin.name().to_string(),
            plugin.description().map(str::to_string),
            dispatch_timeout,
            outcome_rx,
            first_rx,
            input_tx,
            self.store.clone(),
            self.buses.clone(),
        ))
    }

    /// Deliver input to a paused workflow.
    ///
    /// Validates against the pause's input schema; a schema failure is
    /// returned as `{valid: false, errors}` with no state change. On
    /// success the task transitions back to `working` and the validated
    /// input is handed to the parked generator.
    pub async fn resume_workflow(&self, task_id: &str, input: Value) -> Result<ResumeOutcome> {
        let input_tx = self
            .executions
            .get(task_id)
            .map(|entry| entry.input_tx.clone())
            .ok_or_else(|| {
                RuntimeError::invalid_request(format!("no live execution for task {task_id}"))
            })?;
        deliver_resume(&self.store, &self.buses, &input_tx, task_id, input).await
    }

    /// Signal cancellation for a task.
    ///
    /// Idempotent: returns `true` only when this call delivered the first
    /// cancellation to a non-terminal task.
    pub async fn cancel_execution(&self, task_id: &str) -> bool {
        match self.store.state(task_id) {
            None => false,
            Some(state) if state.is_terminal() => false,
            Some(_) => match self.store.cancel_signal(task_id) {
                Some(signal) => {
                    let first = signal.cancel();
                    if first {
                        tracing::info!(task_id = %task_id, "cancellation requested");
                    }
                    first
                }
                None => false,
            },
        }
    }

    /// Whether a live generator exists for the task
    pub fn has_execution(&self, task_id: &str) -> bool {
        self.executions.contains_key(task_id)
    }

    /// Plugin id behind a live execution
    pub fn execution_plugin(&self, task_id: &str) -> Option<String> {
        self.executions.get(task_id).map(|entry| entry.plugin_id.clone())
    }
}

/// Shared resume-delivery path: validate the input against the pause
/// schema, transition the task back to `working`, publish the status
/// update, and hand the validated input to the parked generator.
pub(crate) async fn deliver_resume(
    store: &Arc<TaskStore>,
    buses: &Arc<EventBusManager>,
    input_tx: &mpsc::Sender<Value>,
    task_id: &str,
    input: Value,
) -> Result<ResumeOutcome> {
    let record = store
        .get(task_id)
        .ok_or_else(|| RuntimeError::invalid_request(format!("unknown task {task_id}")))?;

    if !record.state.is_paused() {
        return Err(RuntimeError::invalid_request(format!(
            "task {task_id} is not awaiting input (state {})",
            record.state
        )));
    }

    let pause = record.pause_info.ok_or_else(|| {
        RuntimeError::invalid_request(format!("task {task_id} has no pause bookkeeping"))
    })?;

    if let Some(input_schema) = &pause.input_schema {
        if let Err(errors) = schema::validate_value(input_schema, &input) {
            tracing::debug!(task_id = %task_id, errors = errors.len(), "resume input rejected");
            return Ok(ResumeOutcome::rejected(errors));
        }
    }

    store.resume(task_id)?;
    if let Some(bus) = buses.get(task_id) {
        bus.publish(AgentEvent::status(
            task_id,
            &record.context_id,
            TaskState::Working,
            false,
        ))
        .await;
    }

    input_tx.send(input).await.map_err(|_| {
        RuntimeError::invalid_request(format!("execution for task {task_id} is gone"))
    })?;

    tracing::info!(task_id = %task_id, "workflow resumed");
    Ok(ResumeOutcome::accepted())
}

/// Per-execution driver consuming the yield channel
struct Driver {
    task_id: String,
    context_id: String,
    store: Arc<TaskStore>,
    buses: Arc<EventBusManager>,
    executions: Arc<DashMap<String, ExecutionEntry>>,
    bus: Arc<EventBus>,
    cancel: CancelSignal,
    first: Option<oneshot::Sender<FirstYield>>,
}

impl Driver {
    async fn run(
        mut self,
        mut yield_rx: mpsc::Receiver<WorkflowYield>,
        done_rx: oneshot::Receiver<std::result::Result<Value, WorkflowError>>,
        outcome_tx: watch::Sender<Option<ExecutionOutcome>>,
    ) {
        if self.store.transition(&self.task_id, TaskState::Working).is_ok() {
            self.bus
                .publish(AgentEvent::status(
                    &self.task_id,
                    &self.context_id,
                    TaskState::Working,
                    false,
                ))
                .await;
        }

        let cancel = self.cancel.clone();
        let mut terminal = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = self.store.transition(&self.task_id, TaskState::Canceled);
                    self.bus
                        .publish(AgentEvent::status(
                            &self.task_id,
                            &self.context_id,
                            TaskState::Canceled,
                            true,
                        ))
                        .await;
                    tracing::info!(task_id = %self.task_id, "workflow canceled");
                    terminal = Some(ExecutionOutcome::Canceled);
                    break;
                }
                next = yield_rx.recv() => match next {
                    Some(value) => {
                        if let Some(outcome) = self.handle_yield(value).await {
                            terminal = Some(outcome);
                            break;
                        }
                    }
                    // Yield channel closed: the plugin body returned.
                    None => break,
                }
            }
        }

        let outcome = match terminal {
            Some(outcome) => outcome,
            None => self.finalize(done_rx).await,
        };

        self.bus.finished().await;
        self.executions.remove(&self.task_id);
        self.buses.release(&self.task_id);
        let _ = outcome_tx.send(Some(outcome));
    }

    /// Translate one yield; returns a terminal outcome for `reject`
    async fn handle_yield(&mut self, value: WorkflowYield) -> Option<ExecutionOutcome> {
        match value {
            WorkflowYield::StatusUpdate { text } => {
                self.route_first(FirstYield::Other);
                let message = Message::agent_text(&self.context_id, text);
                self.bus
                    .publish(AgentEvent::status_with_message(
                        &self.task_id,
                        &self.context_id,
                        TaskState::Working,
                        false,
                        message,
                    ))
                    .await;
                None
            }
            WorkflowYield::Artifact {
                artifact,
                append,
                last_chunk,
            } => {
                self.route_first(FirstYield::Other);
                self.bus
                    .publish(AgentEvent::artifact(
                        &self.task_id,
                        &self.context_id,
                        artifact,
                        Some(append),
                        Some(last_chunk),
                    ))
                    .await;
                None
            }
            WorkflowYield::Interrupted {
                reason,
                prompt,
                input_schema,
            } => {
                let info = PauseInfo {
                    reason,
                    prompt: prompt.clone(),
                    input_schema,
                };
                if let Err(err) = self.store.pause(&self.task_id, info) {
                    tracing::warn!(task_id = %self.task_id, error = %err, "pause transition rejected");
                    return None;
                }
                let message = Message::agent_text(&self.context_id, prompt.clone());
                self.bus
                    .publish(AgentEvent::status_with_message(
                        &self.task_id,
                        &self.context_id,
                        reason.task_state(),
                        false,
                        message,
                    ))
                    .await;
                self.route_first(FirstYield::Paused(prompt));
                None
            }
            WorkflowYield::Reject { reason } => {
                self.route_first(FirstYield::Other);
                let _ = self.store.transition(&self.task_id, TaskState::Rejected);
                let message = Message::agent_text(&self.context_id, reason.clone());
                self.bus
                    .publish(AgentEvent::status_with_message(
                        &self.task_id,
                        &self.context_id,
                        TaskState::Rejected,
                        true,
                        message,
                    ))
                    .await;
                tracing::info!(task_id = %self.task_id, reason = %reason, "workflow rejected itself");
                Some(ExecutionOutcome::Rejected { reason })
            }
            WorkflowYield::DispatchResponse { parts } => {
                if self.first.is_some() {
                    self.route_first(FirstYield::Response(parts));
                } else {
                    tracing::warn!(
                        task_id = %self.task_id,
                        "dispatch-response yield after the first yield, ignoring"
                    );
                }
                None
            }
        }
    }

    /// Finalize a task whose plugin body returned
    async fn finalize(
        &self,
        done_rx: oneshot::Receiver<std::result::Result<Value, WorkflowError>>,
    ) -> ExecutionOutcome {
        match done_rx.await {
            Ok(Ok(result)) => {
                let _ = self.store.complete(&self.task_id, Some(result.clone()));
                self.bus
                    .publish(AgentEvent::status(
                        &self.task_id,
                        &self.context_id,
                        TaskState::Completed,
                        true,
                    ))
                    .await;
                tracing::info!(task_id = %self.task_id, "workflow completed");
                ExecutionOutcome::Completed(result)
            }
            Ok(Err(err)) => {
                let error = TaskError {
                    message: err.message.clone(),
                    code: err.code.clone(),
                };
                self.publish_failure(&error).await;
                ExecutionOutcome::Failed(error)
            }
            Err(_) => {
                let error = TaskError::new("workflow body terminated unexpectedly");
                self.publish_failure(&error).await;
                ExecutionOutcome::Failed(error)
            }
        }
    }

    async fn publish_failure(&self, error: &TaskError) {
        let _ = self.store.fail(&self.task_id, error.clone());
        let message = Message::agent_text(&self.context_id, error.message.clone());
        self.bus
            .publish(AgentEvent::status_with_message(
                &self.task_id,
                &self.context_id,
                TaskState::Failed,
                true,
                message,
            ))
            .await;
    }

    fn route_first(&mut self, first_yield: FirstYield) {
        if let Some(tx) = self.first.take() {
            let _ = tx.send(first_yield);
        }
    }
}
