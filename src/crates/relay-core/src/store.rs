//! In-memory task store
//!
//! Maps task id to the current [`TaskRecord`] and its transition log, and
//! registers the per-task [`CancelSignal`]. Reads return clones; writes use
//! the entry-level locking of the underlying map, so no lock is held across
//! a suspension point.

use dashmap::DashMap;
use serde_json::Value;

use crate::cancel::CancelSignal;
use crate::error::{CoreError, Result};
use crate::task::{PauseInfo, TaskError, TaskRecord, TaskState};

/// Process-wide store of task records
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: DashMap<String, TaskRecord>,
    cancels: DashMap<String, CancelSignal>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new record and register its cancel signal.
    ///
    /// Re-inserting an existing id is rejected: a task is owned by exactly
    /// one active producer.
    pub fn insert(&self, record: TaskRecord) -> Result<CancelSignal> {
        if self.tasks.contains_key(&record.id) {
            return Err(CoreError::InvalidTransition {
                from: self.state(&record.id).unwrap_or(TaskState::Unknown),
                to: record.state,
            });
        }
        let signal = CancelSignal::new();
        self.cancels.insert(record.id.clone(), signal.clone());
        tracing::debug!(task_id = %record.id, context_id = %record.context_id, "task created");
        self.tasks.insert(record.id.clone(), record);
        Ok(signal)
    }

    /// Snapshot of a task record
    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.get(task_id).map(|r| r.clone())
    }

    /// Current state of a task
    pub fn state(&self, task_id: &str) -> Option<TaskState> {
        self.tasks.get(task_id).map(|r| r.state)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Apply a validated transition, returning the previous state
    pub fn transition(&self, task_id: &str, to: TaskState) -> Result<TaskState> {
        let mut entry = self.tasks.get_mut(task_id).ok_or_else(|| CoreError::TaskNotFound {
            task_id: task_id.to_string(),
        })?;
        let from = entry.transition(to)?;
        tracing::debug!(task_id = %task_id, from = %from, to = %to, "task transition");
        Ok(from)
    }

    /// Transition to `completed`, recording the result value
    pub fn complete(&self, task_id: &str, result: Option<Value>) -> Result<()> {
        let mut entry = self.tasks.get_mut(task_id).ok_or_else(|| CoreError::TaskNotFound {
            task_id: task_id.to_string(),
        })?;
        entry.transition(TaskState::Completed)?;
        entry.result = result;
        entry.pause_info = None;
        Ok(())
    }

    /// Transition to `failed`, recording the error
    pub fn fail(&self, task_id: &str, error: TaskError) -> Result<()> {
        let mut entry = self.tasks.get_mut(task_id).ok_or_else(|| CoreError::TaskNotFound {
            task_id: task_id.to_string(),
        })?;
        entry.transition(TaskState::Failed)?;
        tracing::warn!(task_id = %task_id, error = %error, "task failed");
        entry.error = Some(error);
        entry.pause_info = None;
        Ok(())
    }

    /// Transition into a paused state, storing the pause bookkeeping
    pub fn pause(&self, task_id: &str, info: PauseInfo) -> Result<()> {
        let mut entry = self.tasks.get_mut(task_id).ok_or_else(|| CoreError::TaskNotFound {
            task_id: task_id.to_string(),
        })?;
        entry.transition(info.reason.task_state())?;
        entry.pause_info = Some(info);
        Ok(())
    }

    /// Transition a paused task back to `working`, clearing the pause info
    pub fn resume(&self, task_id: &str) -> Result<()> {
        let mut entry = self.tasks.get_mut(task_id).ok_or_else(|| CoreError::TaskNotFound {
            task_id: task_id.to_string(),
        })?;
        entry.transition(TaskState::Working)?;
        entry.pause_info = None;
        Ok(())
    }

    /// Pause info of a paused task
    pub fn pause_info(&self, task_id: &str) -> Option<PauseInfo> {
        self.tasks.get(task_id).and_then(|r| r.pause_info.clone())
    }

    /// The cancel signal registered for a task
    pub fn cancel_signal(&self, task_id: &str) -> Option<CancelSignal> {
        self.cancels.get(task_id).map(|s| s.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::PauseReason;
    use serde_json::json;

    #[test]
    fn test_insert_and_get() {
        let store = TaskStore::new();
        store.insert(TaskRecord::new("t1", "c1")).unwrap();

        let record = store.get("t1").unwrap();
        assert_eq!(record.state, TaskState::Submitted);
        assert_eq!(record.context_id, "c1");
        assert!(store.cancel_signal("t1").is_some());
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let store = TaskStore::new();
        store.insert(TaskRecord::new("t1", "c1")).unwrap();
        assert!(store.insert(TaskRecord::new("t1", "c2")).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_lifecycle_helpers() {
        let store = TaskStore::new();
        store.insert(TaskRecord::new("t1", "c1")).unwrap();

        store.transition("t1", TaskState::Working).unwrap();
        store
            .pause(
                "t1",
                PauseInfo {
                    reason: PauseReason::InputRequired,
                    prompt: "sign it".to_string(),
                    input_schema: Some(json!({"type": "object"})),
                },
            )
            .unwrap();
        assert_eq!(store.state("t1"), Some(TaskState::InputRequired));
        assert_eq!(store.pause_info("t1").unwrap().prompt, "sign it");

        store.resume("t1").unwrap();
        assert_eq!(store.state("t1"), Some(TaskState::Working));
        assert!(store.pause_info("t1").is_none());

        store.complete("t1", Some(json!({"ok": true}))).unwrap();
        let record = store.get("t1").unwrap();
        assert_eq!(record.state, TaskState::Completed);
        assert_eq!(record.result, Some(json!({"ok": true})));
    }

    #[test]
    fn test_fail_records_error() {
        let store = TaskStore::new();
        store.insert(TaskRecord::new("t1", "c1")).unwrap();
        store.transition("t1", TaskState::Working).unwrap();
        store
            .fail("t1", TaskError::new("boom").with_code("E_PLUGIN"))
            .unwrap();

        let record = store.get("t1").unwrap();
        assert_eq!(record.state, TaskState::Failed);
        assert_eq!(record.error.as_ref().unwrap().message, "boom");
        assert_eq!(record.error.as_ref().unwrap().code.as_deref(), Some("E_PLUGIN"));
    }

    #[test]
    fn test_invalid_transition_surfaces() {
        let store = TaskStore::new();
        store.insert(TaskRecord::new("t1", "c1")).unwrap();
        store.transition("t1", TaskState::Working).unwrap();
        store.complete("t1", None).unwrap();

        assert!(store.transition("t1", TaskState::Working).is_err());
        assert!(store.transition("missing", TaskState::Working).is_err());
    }
}
