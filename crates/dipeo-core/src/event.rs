//! Event Bus (C4, spec §4.4).
//!
//! Grounded on `langgraph-core`'s `stream::StreamMultiplexer` (per-subscriber
//! channel, mode-filtered emission) generalized from stream-mode filtering
//! to execution-id subscription and bounded-buffer backpressure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::diagram::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ExecutionStarted,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    NodeRetry,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionAborted,
    TokenUsage,
    InteractivePromptRequired,
    InteractiveResponse,
}

impl EventKind {
    /// Lifecycle events are never dropped under backpressure (spec §4.4:
    /// "a slow subscriber must not block the scheduler ... preserving
    /// lifecycle events").
    pub fn is_lifecycle(self) -> bool {
        matches!(
            self,
            EventKind::ExecutionStarted
                | EventKind::NodeStarted
                | EventKind::NodeCompleted
                | EventKind::NodeFailed
                | EventKind::NodeRetry
                | EventKind::ExecutionCompleted
                | EventKind::ExecutionFailed
                | EventKind::ExecutionAborted
                | EventKind::InteractivePromptRequired
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub execution_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub kind: EventKind,
    #[serde(default)]
    pub node_id: Option<NodeId>,
    pub payload: Value,
}

impl Event {
    pub fn new(execution_id: impl Into<String>, kind: EventKind, payload: Value) -> Self {
        Self { execution_id: execution_id.into(), timestamp: chrono::Utc::now(), kind, node_id: None, payload }
    }

    pub fn with_node(mut self, node_id: impl Into<NodeId>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }
}

/// A subscriber's bounded event queue. Ordering is preserved per
/// `execution_id` because each subscription only ever receives events in
/// the order [`EventBus::publish`] was called.
struct Subscriber {
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
    execution_filter: Option<String>,
}

impl Subscriber {
    async fn push(&self, event: Event) {
        if let Some(filter) = &self.execution_filter {
            if filter != &event.execution_id {
                return;
            }
        }

        let mut queue = self.queue.lock().await;
        if queue.len() >= self.capacity {
            if event.kind.is_lifecycle() {
                // Make room by evicting the oldest non-lifecycle event; if
                // none exists, evict the oldest event outright rather than
                // silently drop a lifecycle event.
                if let Some(pos) = queue.iter().position(|e| !e.kind.is_lifecycle()) {
                    queue.remove(pos);
                } else {
                    queue.pop_front();
                }
                queue.push_back(event);
            }
            // Non-lifecycle event arriving into a full queue is dropped.
        } else {
            queue.push_back(event);
        }
        drop(queue);
        self.notify.notify_one();
    }

    async fn recv(&self) -> Option<Event> {
        loop {
            {
                let mut queue = self.queue.lock().await;
                if let Some(event) = queue.pop_front() {
                    return Some(event);
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Pub/sub fan-out for execution and node lifecycle events. Subscribers
/// register/unregister by connection id (spec §4.4).
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<HashMap<String, Arc<Subscriber>>>>,
}

const DEFAULT_CAPACITY: usize = 1024;

impl EventBus {
    pub fn new() -> Self {
        Self { subscribers: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Subscribe a connection, optionally filtered to one execution_id.
    pub async fn subscribe(&self, connection_id: impl Into<String>, execution_filter: Option<String>) -> Subscription {
        let subscriber = Arc::new(Subscriber {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: DEFAULT_CAPACITY,
            execution_filter,
        });
        let connection_id = connection_id.into();
        self.subscribers.lock().await.insert(connection_id.clone(), subscriber.clone());
        Subscription { bus: self.clone(), connection_id, subscriber }
    }

    pub async fn unsubscribe(&self, connection_id: &str) {
        self.subscribers.lock().await.remove(connection_id);
    }

    /// At-least-once delivery to every registered subscriber.
    pub async fn publish(&self, event: Event) {
        let subscribers: Vec<Arc<Subscriber>> = self.subscribers.lock().await.values().cloned().collect();
        for subscriber in subscribers {
            subscriber.push(event.clone()).await;
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

/// Handle returned from [`EventBus::subscribe`]; drop or call
/// [`Subscription::unsubscribe`] to disconnect.
pub struct Subscription {
    bus: EventBus,
    connection_id: String,
    subscriber: Arc<Subscriber>,
}

impl Subscription {
    pub async fn recv(&self) -> Option<Event> {
        self.subscriber.recv().await
    }

    pub async fn unsubscribe(self) {
        self.bus.unsubscribe(&self.connection_id).await;
    }
}
