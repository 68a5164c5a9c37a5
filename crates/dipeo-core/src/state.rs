//! Execution State Store (C3, spec §4.3).
//!
//! Grounded on `langgraph-core`'s `store::Store` live cache, generalized
//! from a channel-keyed value map to a per-node status/output/exec-count/
//! token-usage record; mutations publish onto [`crate::event::EventBus`]
//! the way store changes there flow into `stream::StreamMultiplexer`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::diagram::NodeId;
use crate::envelope::Envelope;
use crate::error::{EngineError, Result};
use crate::event::{Event, EventBus, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    /// Forward-transition table (spec §4.3 invariant, IP1). The PersonJob
    /// loop exception (`Completed` → `Ready`) is enforced by the caller,
    /// not here, since it depends on the run still being `running`.
    fn can_transition_to(self, next: NodeStatus) -> bool {
        use NodeStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Ready, Running)
                | (Ready, Skipped)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Skipped)
                | (Completed, Ready) // PersonJob iteration re-activation
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeState {
    pub status: Option<NodeStatus>,
    pub error: Option<String>,
    pub output: Option<Envelope>,
    pub exec_count: u64,
    pub token_usage: TokenUsage,
    /// The attempt number in progress, or the one that last completed or
    /// exhausted retries (spec §6 snapshot schema, §7 "attempt count").
    pub attempt: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub execution_id: String,
    pub diagram_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub node_states: HashMap<NodeId, NodeState>,
    pub variables: serde_json::Value,
    pub token_usage_total: TokenUsage,
}

impl ExecutionState {
    fn new(execution_id: String, diagram_id: String, initial_variables: serde_json::Value) -> Self {
        Self {
            execution_id,
            diagram_id,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
            node_states: HashMap::new(),
            variables: initial_variables,
            token_usage_total: TokenUsage::default(),
        }
    }

    fn node_entry(&mut self, node_id: &str) -> &mut NodeState {
        self.node_states.entry(node_id.to_string()).or_default()
    }

    fn recompute_token_total(&mut self) {
        let mut total = TokenUsage::default();
        for state in self.node_states.values() {
            total.add(&state.token_usage);
        }
        self.token_usage_total = total;
    }
}

/// The in-memory live cache over all currently-tracked executions. Snapshot
/// persistence (the versioned format, migrator, atomic flush) lives in
/// `dipeo-checkpoint` and is driven by [`ExecutionStateStore::complete`].
#[derive(Clone)]
pub struct ExecutionStateStore {
    states: Arc<RwLock<HashMap<String, ExecutionState>>>,
    events: EventBus,
}

impl ExecutionStateStore {
    pub fn new(events: EventBus) -> Self {
        Self { states: Arc::new(RwLock::new(HashMap::new())), events }
    }

    pub async fn create(&self, execution_id: &str, diagram_id: &str, initial_variables: serde_json::Value) {
        let state = ExecutionState::new(execution_id.to_string(), diagram_id.to_string(), initial_variables);
        self.states.write().await.insert(execution_id.to_string(), state);
        self.events
            .publish(Event::new(execution_id, EventKind::ExecutionStarted, serde_json::json!({ "diagram_id": diagram_id })))
            .await;
    }

    pub async fn get(&self, execution_id: &str) -> Option<ExecutionState> {
        self.states.read().await.get(execution_id).cloned()
    }

    pub async fn set_node_status(
        &self,
        execution_id: &str,
        node_id: &str,
        status: NodeStatus,
        error: Option<String>,
    ) -> Result<()> {
        let transitioned;
        {
            let mut states = self.states.write().await;
            let exec_state = states
                .get_mut(execution_id)
                .ok_or_else(|| EngineError::Internal(format!("unknown execution '{execution_id}'")))?;
            let node_state = exec_state.node_entry(node_id);
            let previous = node_state.status.unwrap_or(NodeStatus::Pending);
            if !previous.can_transition_to(status) {
                return Err(EngineError::Internal(format!(
                    "node '{node_id}' illegal status transition {previous:?} -> {status:?}"
                )));
            }
            transitioned = previous != status;
            node_state.status = Some(status);
            node_state.error = error.clone();
            if status == NodeStatus::Running && transitioned {
                node_state.started_at = Some(Utc::now());
                node_state.attempt = 1;
            }
            if transitioned && matches!(status, NodeStatus::Completed | NodeStatus::Failed | NodeStatus::Skipped) {
                node_state.ended_at = Some(Utc::now());
            }
        }

        // A self-transition (e.g. re-dispatching a node that never left
        // `running` across a retry's backoff sleep) has already happened as
        // far as observers are concerned; re-emitting its lifecycle event
        // would misrepresent a retry as a fresh start (spec §7).
        if !transitioned {
            return Ok(());
        }

        let kind = match status {
            NodeStatus::Running => EventKind::NodeStarted,
            NodeStatus::Completed => EventKind::NodeCompleted,
            NodeStatus::Failed => EventKind::NodeFailed,
            _ => return Ok(()),
        };
        self.events
            .publish(
                Event::new(execution_id, kind, serde_json::json!({ "status": status, "error": error }))
                    .with_node(node_id.to_string()),
            )
            .await;
        Ok(())
    }

    /// Sets the attempt counter directly, independent of a status
    /// transition — used when the final attempt number (a retry exhausted,
    /// or a late success) needs recording without re-touching `status`.
    pub async fn set_node_attempt(&self, execution_id: &str, node_id: &str, attempt: usize) -> Result<()> {
        let mut states = self.states.write().await;
        let exec_state = states
            .get_mut(execution_id)
            .ok_or_else(|| EngineError::Internal(format!("unknown execution '{execution_id}'")))?;
        exec_state.node_entry(node_id).attempt = attempt;
        Ok(())
    }

    /// Records a retry attempt without transitioning the node's status — it
    /// never leaves `running` during retries (spec §7) — and publishes
    /// `NodeRetry` telemetry with the attempt number that just failed.
    pub async fn record_retry(&self, execution_id: &str, node_id: &str, attempt: usize, error: String) -> Result<()> {
        {
            let mut states = self.states.write().await;
            let exec_state = states
                .get_mut(execution_id)
                .ok_or_else(|| EngineError::Internal(format!("unknown execution '{execution_id}'")))?;
            let node_state = exec_state.node_entry(node_id);
            node_state.attempt = attempt;
            node_state.error = Some(error.clone());
        }
        self.events
            .publish(
                Event::new(execution_id, EventKind::NodeRetry, serde_json::json!({ "attempt": attempt, "error": error }))
                    .with_node(node_id.to_string()),
            )
            .await;
        Ok(())
    }

    pub async fn set_node_output(&self, execution_id: &str, node_id: &str, envelope: Envelope) -> Result<()> {
        let mut states = self.states.write().await;
        let exec_state = states
            .get_mut(execution_id)
            .ok_or_else(|| EngineError::Internal(format!("unknown execution '{execution_id}'")))?;
        exec_state.node_entry(node_id).output = Some(envelope);
        Ok(())
    }

    pub async fn increment_exec_count(&self, execution_id: &str, node_id: &str) -> Result<u64> {
        let mut states = self.states.write().await;
        let exec_state = states
            .get_mut(execution_id)
            .ok_or_else(|| EngineError::Internal(format!("unknown execution '{execution_id}'")))?;
        let node_state = exec_state.node_entry(node_id);
        node_state.exec_count += 1;
        Ok(node_state.exec_count)
    }

    pub async fn add_token_usage(&self, execution_id: &str, node_id: &str, usage: TokenUsage) -> Result<()> {
        {
            let mut states = self.states.write().await;
            let exec_state = states
                .get_mut(execution_id)
                .ok_or_else(|| EngineError::Internal(format!("unknown execution '{execution_id}'")))?;
            exec_state.node_entry(node_id).token_usage.add(&usage);
            exec_state.recompute_token_total();
        }
        self.events
            .publish(
                Event::new(execution_id, EventKind::TokenUsage, serde_json::to_value(&usage).unwrap_or_default())
                    .with_node(node_id.to_string()),
            )
            .await;
        Ok(())
    }

    pub async fn update_variables(&self, execution_id: &str, patch: serde_json::Value) -> Result<()> {
        let mut states = self.states.write().await;
        let exec_state = states
            .get_mut(execution_id)
            .ok_or_else(|| EngineError::Internal(format!("unknown execution '{execution_id}'")))?;
        let merged = match (&mut exec_state.variables, &patch) {
            (serde_json::Value::Object(base), serde_json::Value::Object(incoming)) => {
                base.extend(incoming.clone());
                true
            }
            _ => false,
        };
        if !merged {
            exec_state.variables = patch;
        }
        Ok(())
    }

    /// Transitions the run to a terminal status. Snapshot persistence and
    /// cache eviction after a grace period are the caller's responsibility
    /// (`dipeo-checkpoint`); this only records the terminal fields and emits
    /// the corresponding lifecycle event.
    pub async fn complete(&self, execution_id: &str, status: ExecutionStatus, error: Option<String>) -> Result<()> {
        {
            let mut states = self.states.write().await;
            let exec_state = states
                .get_mut(execution_id)
                .ok_or_else(|| EngineError::Internal(format!("unknown execution '{execution_id}'")))?;
            exec_state.status = status;
            exec_state.ended_at = Some(Utc::now());
            exec_state.error = error.clone();
        }

        let kind = match status {
            ExecutionStatus::Completed => EventKind::ExecutionCompleted,
            ExecutionStatus::Failed => EventKind::ExecutionFailed,
            ExecutionStatus::Aborted => EventKind::ExecutionAborted,
            ExecutionStatus::Running => return Ok(()),
        };
        self.events.publish(Event::new(execution_id, kind, serde_json::json!({ "error": error }))).await;
        Ok(())
    }

    /// Evicts a completed execution's live state from the cache. Called by
    /// the host after the configured grace period elapses; the snapshot
    /// already on disk remains the source of truth.
    pub async fn evict(&self, execution_id: &str) {
        self.states.write().await.remove(execution_id);
    }
}
