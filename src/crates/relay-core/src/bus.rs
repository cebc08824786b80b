//! Per-task event buses
//!
//! Each task has one [`EventBus`]: an ordered, multi-subscriber channel of
//! protocol events terminated by an explicit [`BusMessage::Finished`]
//! sentinel. Buses are bounded; a slow subscriber back-pressures publishes
//! on its own bus only. The [`EventBusManager`] creates and looks up buses
//! keyed by task id with reference-counted cleanup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

use crate::event::AgentEvent;

/// Default per-subscriber channel capacity
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// A message delivered to bus subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    /// A protocol event
    Event(AgentEvent),
    /// Terminal sentinel; nothing follows
    Finished,
}

impl BusMessage {
    pub fn event(&self) -> Option<&AgentEvent> {
        match self {
            Self::Event(event) => Some(event),
            Self::Finished => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

/// Ordered, multi-subscriber event channel for one task
pub struct EventBus {
    task_id: String,
    capacity: usize,
    subscribers: Mutex<Vec<mpsc::Sender<BusMessage>>>,
    finished: AtomicBool,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("task_id", &self.task_id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl EventBus {
    pub fn new(task_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            task_id: task_id.into(),
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
            finished: AtomicBool::new(false),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Attach a new subscriber. Subscribers observe every event published
    /// after attachment, in publish order. A subscriber attached after
    /// `finished()` receives only the sentinel.
    pub async fn subscribe(&self) -> mpsc::Receiver<BusMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        if self.is_finished() {
            let _ = tx.send(BusMessage::Finished).await;
            return rx;
        }
        self.subscribers.lock().await.push(tx);
        rx
    }

    /// [`subscribe`](Self::subscribe) wrapped as a `Stream`
    pub async fn subscribe_stream(&self) -> ReceiverStream<BusMessage> {
        ReceiverStream::new(self.subscribe().await)
    }

    /// Publish an event to every subscriber.
    ///
    /// Publishes after `finished()` are dropped with a warning; terminal
    /// means terminal. Subscribers whose receiver is gone are pruned.
    pub async fn publish(&self, event: AgentEvent) {
        if self.is_finished() {
            tracing::warn!(task_id = %self.task_id, "event dropped after bus finished");
            return;
        }
        tracing::debug!(task_id = %self.task_id, "publishing event");

        // The per-bus lock is held across the sends: publishers on one bus
        // are serialized so every subscriber observes the same order.
        let mut subscribers = self.subscribers.lock().await;
        let mut stale = Vec::new();
        for (index, tx) in subscribers.iter().enumerate() {
            if tx.send(BusMessage::Event(event.clone())).await.is_err() {
                stale.push(index);
            }
        }
        for index in stale.into_iter().rev() {
            subscribers.swap_remove(index);
        }
    }

    /// Publish the terminal sentinel and detach all subscribers. Idempotent.
    pub async fn finished(&self) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut subscribers = self.subscribers.lock().await;
        for tx in subscribers.drain(..) {
            let _ = tx.send(BusMessage::Finished).await;
        }
        tracing::debug!(task_id = %self.task_id, "bus finished");
    }
}

/// Creates and looks up event buses keyed by task id
///
/// Each `create` is paired with a `release`; the bus is removed from the
/// manager when the last reference is released. Holders of the returned
/// `Arc` can keep publishing after removal, but new lookups will miss.
#[derive(Debug)]
pub struct EventBusManager {
    buses: DashMap<String, BusEntry>,
    capacity: usize,
}

#[derive(Debug)]
struct BusEntry {
    bus: Arc<EventBus>,
    refs: usize,
}

impl Default for EventBusManager {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBusManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            buses: DashMap::new(),
            capacity,
        }
    }

    /// Get or create the bus for a task, taking a reference on it
    pub fn create(&self, task_id: &str) -> Arc<EventBus> {
        let mut entry = self
            .buses
            .entry(task_id.to_string())
            .or_insert_with(|| BusEntry {
                bus: Arc::new(EventBus::new(task_id, self.capacity)),
                refs: 0,
            });
        entry.refs += 1;
        entry.bus.clone()
    }

    /// Look up the bus for a task without taking a reference
    pub fn get(&self, task_id: &str) -> Option<Arc<EventBus>> {
        self.buses.get(task_id).map(|e| e.bus.clone())
    }

    /// Release one reference; the bus is removed when none remain
    pub fn release(&self, task_id: &str) {
        let remove = match self.buses.get_mut(task_id) {
            Some(mut entry) => {
                entry.refs = entry.refs.saturating_sub(1);
                entry.refs == 0
            }
            None => false,
        };
        if remove {
            self.buses.remove(task_id);
            tracing::debug!(task_id = %task_id, "bus released");
        }
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }
}
