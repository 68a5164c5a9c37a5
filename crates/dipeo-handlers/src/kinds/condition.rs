//! `condition` handler (spec §4.8 "Condition"): evaluates a predicate over
//! `{inputs, variables}` and returns an envelope whose `branch` metadata
//! drives the scheduler's single-outbound-edge activation.
//!
//! `props` shape: `{"field": "<handle label>", "operator": "truthy" |
//! "eq" | "gt" | "lt", "value"?: <json>}`. A free-form expression language
//! is out of scope here (spec names only the `branch ∈ {true, false}`
//! contract, not a grammar), so this is the minimal predicate set a
//! diagram author needs for the common branch-on-a-value case.

use async_trait::async_trait;

use dipeo_core::diagram::NodeKind;
use dipeo_core::error::{EngineError, Result};
use dipeo_core::{ActivationContext, Envelope, NodeHandler};

pub struct ConditionHandler;

#[async_trait]
impl NodeHandler for ConditionHandler {
    fn kind(&self) -> NodeKind {
        "condition".to_string()
    }

    async fn activate(&self, ctx: ActivationContext<'_>) -> Result<Envelope> {
        let field = ctx.node.props.0.get("field").and_then(|v| v.as_str()).unwrap_or("default");
        let operator = ctx.node.props.0.get("operator").and_then(|v| v.as_str()).unwrap_or("truthy");
        let expected = ctx.node.props.0.get("value").cloned();

        let actual = ctx
            .inputs
            .get(field)
            .map(|e| e.body.clone())
            .or_else(|| ctx.variables.get(field).cloned())
            .unwrap_or(serde_json::Value::Null);

        let branch = match operator {
            "truthy" => is_truthy(&actual),
            "eq" => Some(&actual) == expected.as_ref(),
            "gt" => compare(&actual, &expected, |a, b| a > b),
            "lt" => compare(&actual, &expected, |a, b| a < b),
            other => {
                return Err(EngineError::Configuration {
                    node: ctx.node.id.clone(),
                    message: format!("unknown condition operator '{other}'"),
                });
            }
        };

        Ok(Envelope::object(serde_json::Value::Bool(branch)).with_metadata("branch", branch))
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

fn compare(actual: &serde_json::Value, expected: &Option<serde_json::Value>, op: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.as_f64(), expected.as_ref().and_then(|v| v.as_f64())) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dipeo_core::diagram::{CompiledDiagram, DiagramMetadata, Node, NodeProps};
    use dipeo_core::envelope::Envelope as Env;
    use std::collections::HashMap;

    fn diagram() -> CompiledDiagram {
        CompiledDiagram {
            nodes: HashMap::new(),
            arrows: vec![],
            persons: HashMap::new(),
            api_keys: HashMap::new(),
            metadata: DiagramMetadata { format_version: "2.0".into(), ..Default::default() },
        }
    }

    #[tokio::test]
    async fn truthy_operator_branches_on_nonempty_string() {
        let handler = ConditionHandler;
        let node = Node {
            id: "c1".into(),
            kind: "condition".into(),
            props: NodeProps(serde_json::json!({"field": "default", "operator": "truthy"})),
            position: None,
            label: None,
        };
        let d = diagram();
        let mut inputs = HashMap::new();
        inputs.insert("default".to_string(), Env::raw_text("non-empty"));
        let vars = serde_json::json!({});
        let ctx = ActivationContext { execution_id: "e1", node: &node, diagram: &d, inputs, exec_count: 0, variables: &vars, cancellation: &dipeo_core::CancellationToken::new() };
        let envelope = handler.activate(ctx).await.unwrap();
        assert_eq!(envelope.branch(), Some(true));
    }

    #[tokio::test]
    async fn gt_operator_compares_numbers() {
        let handler = ConditionHandler;
        let node = Node {
            id: "c1".into(),
            kind: "condition".into(),
            props: NodeProps(serde_json::json!({"field": "default", "operator": "gt", "value": 5})),
            position: None,
            label: None,
        };
        let d = diagram();
        let mut inputs = HashMap::new();
        inputs.insert("default".to_string(), Env::object(serde_json::json!(10)));
        let vars = serde_json::json!({});
        let ctx = ActivationContext { execution_id: "e1", node: &node, diagram: &d, inputs, exec_count: 0, variables: &vars, cancellation: &dipeo_core::CancellationToken::new() };
        let envelope = handler.activate(ctx).await.unwrap();
        assert_eq!(envelope.branch(), Some(true));
    }
}
