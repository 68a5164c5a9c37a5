//! Versioned execution-state snapshot format (spec §6 "Snapshot format").
//!
//! Grounded on `langgraph-checkpoint`'s `Checkpoint` struct and its
//! `Checkpoint::CURRENT_VERSION` convention, generalized from the Pregel
//! channel-value shape to an opaque `data` payload the engine fills in
//! (`dipeo-core::state::ExecutionState`, serialized by the caller so this
//! crate stays independent of the engine's types).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CheckpointError, Result};

pub const CURRENT_VERSION: i32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "_version")]
    pub version: i32,
    pub execution_id: String,
    pub data: Value,
}

impl Snapshot {
    pub fn new(execution_id: impl Into<String>, data: Value) -> Self {
        Self { version: CURRENT_VERSION, execution_id: execution_id.into(), data }
    }

    /// Upgrades an older snapshot in place. V1 predates per-node retry
    /// tracking: its `node_states` entries have no `attempt`, `started_at`
    /// or `ended_at` field. V1→V2 backfills those with the values a node
    /// that was never retried and whose timing was never recorded would
    /// have (spec §6).
    pub fn migrate(mut self) -> Result<Self> {
        match self.version {
            CURRENT_VERSION => Ok(self),
            1 => {
                self.data = migrate_v1_to_v2(self.data);
                self.version = CURRENT_VERSION;
                Ok(self)
            }
            other => Err(CheckpointError::UnsupportedVersion(other)),
        }
    }
}

fn migrate_v1_to_v2(mut data: Value) -> Value {
    if let Some(Value::Object(node_states)) = data.get_mut("node_states") {
        for node_state in node_states.values_mut() {
            if let Value::Object(fields) = node_state {
                fields.entry("attempt").or_insert(Value::from(0));
                fields.entry("started_at").or_insert(Value::Null);
                fields.entry("ended_at").or_insert(Value::Null);
            }
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn current_version_round_trips_through_json() {
        let snapshot = Snapshot::new("e1", json!({"node_states": {}}));
        let serialized = serde_json::to_string(&snapshot).unwrap();
        let parsed: Snapshot = serde_json::from_str(&serialized).unwrap();
        assert_eq!(parsed.version, CURRENT_VERSION);
        assert_eq!(parsed.execution_id, "e1");
    }

    #[test]
    fn migrate_is_identity_on_current_version() {
        let snapshot = Snapshot::new("e1", json!({}));
        let migrated = snapshot.clone().migrate().unwrap();
        assert_eq!(migrated.data, snapshot.data);
    }

    #[test]
    fn migrate_v1_backfills_missing_retry_tracking_fields() {
        // Shaped like a real `ExecutionState` serialization from before
        // `NodeState` grew `attempt`/`started_at`/`ended_at`: the fields
        // are simply absent, not null.
        let v1 = Snapshot {
            version: 1,
            execution_id: "e1".into(),
            data: json!({
                "execution_id": "e1",
                "diagram_id": "d1",
                "status": "completed",
                "started_at": "2026-01-01T00:00:00Z",
                "ended_at": "2026-01-01T00:00:05Z",
                "error": null,
                "variables": {},
                "token_usage_total": {"prompt_tokens": 0, "completion_tokens": 0},
                "node_states": {
                    "n1": {
                        "status": "completed",
                        "error": null,
                        "output": null,
                        "exec_count": 1,
                        "token_usage": {"prompt_tokens": 0, "completion_tokens": 0}
                    }
                }
            }),
        };
        let migrated = v1.migrate().unwrap();
        assert_eq!(migrated.version, CURRENT_VERSION);
        let n1 = &migrated.data["node_states"]["n1"];
        assert_eq!(n1["attempt"], json!(0));
        assert_eq!(n1["started_at"], Value::Null);
        assert_eq!(n1["ended_at"], Value::Null);

        // The real `NodeState` deserializer must accept the backfilled shape.
        let parsed: dipeo_core::state::NodeState = serde_json::from_value(n1.clone()).unwrap();
        assert_eq!(parsed.attempt, 0);
        assert!(parsed.started_at.is_none());
    }

    #[test]
    fn migrate_leaves_fields_already_present_untouched() {
        let v1 = Snapshot {
            version: 1,
            execution_id: "e1".into(),
            data: json!({"node_states": {"n1": {"attempt": 2, "started_at": null, "ended_at": null}}}),
        };
        let migrated = v1.migrate().unwrap();
        assert_eq!(migrated.data["node_states"]["n1"]["attempt"], json!(2));
    }

    #[test]
    fn migrate_rejects_unknown_version() {
        let unknown = Snapshot { version: 99, execution_id: "e1".into(), data: json!({}) };
        assert!(unknown.migrate().is_err());
    }
}
