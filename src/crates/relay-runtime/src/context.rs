//! Conversation contexts and the inactivity reaper
//!
//! A context carries the ordered model-message history of one conversation,
//! the task ids spawned in it, and a last-activity clock. Contexts are
//! created lazily on first reference and reaped after configurable
//! inactivity; deletion is observable through [`ContextEvent::Deleted`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relay_core::ModelMessage;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Context manager configuration
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Delete contexts idle longer than this; `None` disables the reaper
    pub max_inactivity_minutes: Option<u64>,

    /// How often the reaper sweeps
    pub reap_interval: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_inactivity_minutes: None,
            reap_interval: Duration::from_secs(60),
        }
    }
}

/// One conversation's state
#[derive(Debug, Clone)]
pub struct Context {
    pub context_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Append-only model-message history
    pub history: Vec<ModelMessage>,
    /// Task ids spawned in this conversation
    pub tasks: Vec<String>,
    pub metadata: HashMap<String, Value>,
}

impl Context {
    fn new(context_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            context_id: context_id.into(),
            created_at: now,
            last_activity: now,
            history: Vec::new(),
            tasks: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Seconds since the last recorded activity
    pub fn idle_seconds(&self) -> i64 {
        (Utc::now() - self.last_activity).num_seconds()
    }
}

/// Lifecycle notifications emitted by the manager
#[derive(Debug, Clone, PartialEq)]
pub enum ContextEvent {
    /// A context was deleted (explicitly or by the reaper)
    Deleted { context_id: String },
}

/// Process-wide owner of conversation contexts
pub struct ContextManager {
    contexts: DashMap<String, Context>,
    config: ContextConfig,
    events: broadcast::Sender<ContextEvent>,
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("contexts", &self.contexts.len())
            .finish()
    }
}

impl ContextManager {
    pub fn new(config: ContextConfig) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            contexts: DashMap::new(),
            config,
            events,
        }
    }

    /// Get a snapshot of a context, creating it lazily
    pub fn get_or_create(&self, context_id: &str) -> Context {
        self.contexts
            .entry(context_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(context_id = %context_id, "context created");
                Context::new(context_id)
            })
            .clone()
    }

    pub fn get(&self, context_id: &str) -> Option<Context> {
        self.contexts.get(context_id).map(|c| c.clone())
    }

    pub fn exists(&self, context_id: &str) -> bool {
        self.contexts.contains_key(context_id)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Append one history entry atomically, bumping the activity clock.
    ///
    /// Returns `false` when the context no longer exists (deleted
    /// mid-stream); the caller suppresses the append in that case.
    pub fn append_history(&self, context_id: &str, message: ModelMessage) -> bool {
        match self.contexts.get_mut(context_id) {
            Some(mut context) => {
                context.history.push(message);
                bump_activity(&mut context);
                true
            }
            None => false,
        }
    }

    /// History snapshot for a model call
    pub fn history(&self, context_id: &str) -> Option<Vec<ModelMessage>> {
        self.contexts.get(context_id).map(|c| c.history.clone())
    }

    /// Record a task id spawned in this conversation
    pub fn associate_task(&self, context_id: &str, task_id: &str) -> bool {
        match self.contexts.get_mut(context_id) {
            Some(mut context) => {
                if !context.tasks.iter().any(|t| t == task_id) {
                    context.tasks.push(task_id.to_string());
                }
                bump_activity(&mut context);
                true
            }
            None => false,
        }
    }

    /// Bump the activity clock
    pub fn touch(&self, context_id: &str) {
        if let Some(mut context) = self.contexts.get_mut(context_id) {
            bump_activity(&mut context);
        }
    }

    /// Delete a context, emitting [`ContextEvent::Deleted`]
    pub fn delete(&self, context_id: &str) -> bool {
        if self.contexts.remove(context_id).is_some() {
            tracing::info!(context_id = %context_id, "context deleted");
            let _ = self.events.send(ContextEvent::Deleted {
                context_id: context_id.to_string(),
            });
            true
        } else {
            false
        }
    }

    /// Subscribe to context lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ContextEvent> {
        self.events.subscribe()
    }

    /// Sweep once, deleting contexts idle past the configured bound
    pub fn reap_inactive(&self) -> Vec<String> {
        let Some(max_minutes) = self.config.max_inactivity_minutes else {
            return Vec::new();
        };
        let max_idle = (max_minutes * 60) as i64;

        let expired: Vec<String> = self
            .contexts
            .iter()
            .filter(|entry| entry.idle_seconds() >= max_idle)
            .map(|entry| entry.context_id.clone())
            .collect();

        for context_id in &expired {
            self.delete(context_id);
        }
        if !expired.is_empty() {
            tracing::info!(reaped = expired.len(), "inactive contexts reaped");
        }
        expired
    }

    /// Spawn the periodic reaper; returns `None` when disabled
    pub fn spawn_reaper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        self.config.max_inactivity_minutes?;

        let manager = Arc::clone(self);
        let interval = self.config.reap_interval;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                manager.reap_inactive();
            }
        }))
    }
}

/// `last_activity` is monotonically non-decreasing
fn bump_activity(context: &mut Context) {
    let now = Utc::now();
    if now > context.last_activity {
        context.last_activity = now;
    }
}
