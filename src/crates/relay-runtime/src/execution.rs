//! Live execution handles for dispatched workflows

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relay_core::{BusMessage, EventBusManager, PauseInfo, TaskError, TaskState, TaskStore};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::Result;
use crate::runtime::{self, ResumeOutcome};
use crate::yields::DispatchReply;

/// How a finished execution ended
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(Value),
    Failed(TaskError),
    Canceled,
    Rejected { reason: String },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Classification of the first yield, routed to the dispatch reply
#[derive(Debug)]
pub(crate) enum FirstYield {
    Response(Vec<relay_core::Part>),
    Paused(String),
    Other,
}

/// Handle for a dispatched workflow
///
/// The generator runs concurrently with the holder of this handle; the
/// handle observes completion through a watch channel and reads pause
/// bookkeeping from the task store by id.
pub struct WorkflowExecution {
    task_id: String,
    plugin_id: String,
    workflow_name: String,
    description: Option<String>,
    dispatch_timeout: Duration,
    outcome_rx: watch::Receiver<Option<ExecutionOutcome>>,
    first_yield_rx: Mutex<Option<oneshot::Receiver<FirstYield>>>,
    input_tx: mpsc::Sender<Value>,
    store: Arc<TaskStore>,
    buses: Arc<EventBusManager>,
}

impl std::fmt::Debug for WorkflowExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExecution")
            .field("task_id", &self.task_id)
            .field("plugin_id", &self.plugin_id)
            .field("state", &self.state())
            .finish()
    }
}

impl WorkflowExecution {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        task_id: String,
        plugin_id: String,
        workflow_name: String,
        description: Option<String>,
        dispatch_timeout: Duration,
        outcome_rx: watch::Receiver<Option<ExecutionOutcome>>,
        first_yield_rx: oneshot::Receiver<FirstYield>,
        input_tx: mpsc::Sender<Value>,
        store: Arc<TaskStore>,
        buses: Arc<EventBusManager>,
    ) -> Self {
        Self {
            task_id,
            plugin_id,
            workflow_name,
            description,
            dispatch_timeout,
            outcome_rx,
            first_yield_rx: Mutex::new(Some(first_yield_rx)),
            input_tx,
            store,
            buses,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    /// Current task state, `Unknown` if the record vanished
    pub fn state(&self) -> TaskState {
        self.store.state(&self.task_id).unwrap_or(TaskState::Unknown)
    }

    /// Pause bookkeeping while the workflow awaits input
    pub fn pause_info(&self) -> Option<PauseInfo> {
        self.store.pause_info(&self.task_id)
    }

    /// Deliver resume input to this execution; see
    /// [`WorkflowRuntime::resume_workflow`](crate::runtime::WorkflowRuntime::resume_workflow)
    pub async fn resume(&self, input: Value) -> Result<ResumeOutcome> {
        runtime::deliver_resume(&self.store, &self.buses, &self.input_tx, &self.task_id, input)
            .await
    }

    /// Subscribe to this execution's event bus, while it is still open
    pub async fn subscribe(&self) -> Option<mpsc::Receiver<BusMessage>> {
        match self.buses.get(&self.task_id) {
            Some(bus) => Some(bus.subscribe().await),
            None => None,
        }
    }

    /// Wait for the generator to reach a terminal state
    pub async fn wait_for_completion(&self) -> ExecutionOutcome {
        let mut rx = self.outcome_rx.clone();
        loop {
            {
                let value = rx.borrow_and_update();
                if let Some(outcome) = value.clone() {
                    return outcome;
                }
            }
            if rx.changed().await.is_err() {
                // Driver gone without publishing an outcome
                return ExecutionOutcome::Canceled;
            }
        }
    }

    /// Classify the first yield, bounded by the dispatch-response timeout.
    ///
    /// Consumes the first-yield slot: subsequent calls return the generic
    /// acknowledgment. On timeout the workflow keeps running in the
    /// background.
    pub async fn dispatch_response(&self) -> DispatchReply {
        let rx = self.first_yield_rx.lock().take();
        let Some(rx) = rx else {
            return self.acknowledgment();
        };

        match tokio::time::timeout(self.dispatch_timeout, rx).await {
            Ok(Ok(FirstYield::Response(parts))) => DispatchReply::Parts(parts),
            Ok(Ok(FirstYield::Paused(prompt))) => DispatchReply::PausePrompt(prompt),
            Ok(Ok(FirstYield::Other)) | Ok(Err(_)) => self.acknowledgment(),
            Err(_) => {
                tracing::debug!(
                    task_id = %self.task_id,
                    timeout_ms = self.dispatch_timeout.as_millis() as u64,
                    "first yield did not arrive in time, returning acknowledgment"
                );
                self.acknowledgment()
            }
        }
    }

    fn acknowledgment(&self) -> DispatchReply {
        DispatchReply::Acknowledgment {
            workflow_name: self.workflow_name.clone(),
            description: self.description.clone(),
            plugin_id: self.plugin_id.clone(),
        }
    }
}
