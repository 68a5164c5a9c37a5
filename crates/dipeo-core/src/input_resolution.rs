//! Input Resolution Pipeline (C6, spec §4.6).
//!
//! Grounded on `langgraph-core`'s `pregel::io::{map_output_values, map_output_updates}`,
//! which project channel state into a node's input shape; generalized here
//! to walk a node's inbound arrows in declared order, coerce content type,
//! apply the arrow's transform-rule chain, and merge by target-kind policy.

use std::collections::HashMap;

use crate::diagram::{Arrow, CompiledDiagram, HandleLabel};
use crate::envelope::{apply_rules, coerce_content_type, Envelope, TransformError};
use crate::error::{EngineError, Result};
use crate::planner::ExecutionPlan;

/// Per-handle-label resolved input, ready to hand to a handler.
pub type ResolvedInputs = HashMap<HandleLabel, Envelope>;

/// Looks up a node's last-produced envelope; implemented by whatever holds
/// per-node outputs (`dipeo-core::state::ExecutionStateStore` in practice).
pub trait OutputSource {
    fn latest_output(&self, node_id: &str) -> Option<Envelope>;
}

/// Attempts to resolve every required inbound edge for `node_id`. Returns
/// `Ok(None)` if the node is not yet ready (an inbound non-feedback source
/// has not produced an envelope yet); returns `Err` only for transform
/// failures, per spec §4.6 "Errors".
pub fn resolve_inputs(
    diagram: &CompiledDiagram,
    plan: &ExecutionPlan,
    node_id: &str,
    exec_count: u64,
    outputs: &dyn OutputSource,
    template_fn: impl Fn(&str, &serde_json::Value) -> std::result::Result<String, TransformError> + Copy,
) -> Result<Option<ResolvedInputs>> {
    let inbound: Vec<&Arrow> = plan.incoming.get(node_id).into_iter().flatten().collect();
    let target_kind = diagram.node(node_id).map(|n| n.kind.as_str()).unwrap_or("");

    let mut per_label: HashMap<HandleLabel, Vec<(Envelope, bool /* is_feedback */)>> = HashMap::new();

    for arrow in &inbound {
        let is_feedback = plan.is_feedback(arrow);
        let envelope = match outputs.latest_output(&arrow.source_node) {
            Some(envelope) => envelope,
            None => {
                if is_feedback {
                    continue;
                }
                return Ok(None);
            }
        };

        let mut envelope = envelope;
        if let Some(content_type) = arrow.content_type {
            coerce_content_type(&mut envelope, content_type);
        }

        let transformed = apply_rules(envelope.body.clone(), &arrow.transform_rules, template_fn)
            .map_err(|e| transform_error_to_engine(node_id, e))?;
        envelope.body = transformed;

        per_label.entry(arrow.target_label.clone()).or_default().push((envelope, is_feedback));
    }

    let mut resolved = ResolvedInputs::new();
    for (label, mut entries) in per_label {
        let merged = merge_for_label(target_kind, &label, exec_count, &mut entries);
        if let Some(envelope) = merged {
            resolved.insert(label, envelope);
        }
    }

    Ok(Some(resolved))
}

fn transform_error_to_engine(node_id: &str, err: TransformError) -> EngineError {
    EngineError::InputResolution { node: node_id.to_string(), message: err.to_string() }
}

/// Target-kind merge policy (spec §4.6 step 4).
fn merge_for_label(
    target_kind: &str,
    label: &str,
    exec_count: u64,
    entries: &mut Vec<(Envelope, bool)>,
) -> Option<Envelope> {
    if entries.is_empty() {
        return None;
    }

    match (target_kind, label) {
        ("person_job", "first") => {
            if exec_count == 0 {
                entries.first().map(|(e, _)| e.clone())
            } else {
                None
            }
        }
        ("person_job", "default") => {
            if exec_count == 0 {
                return None;
            }
            let concatenated: String = entries
                .iter()
                .map(|(e, _)| e.body.as_str().map(str::to_string).unwrap_or_else(|| e.body.to_string()))
                .collect::<Vec<_>>()
                .join("\n");
            Some(Envelope::raw_text(concatenated))
        }
        ("endpoint", _) => {
            let values: Vec<serde_json::Value> = entries.iter().map(|(e, _)| e.body.clone()).collect();
            Some(Envelope::object(serde_json::Value::Array(values)))
        }
        _ => {
            let mut last = entries.last().unwrap().0.clone();
            if entries.len() > 1 {
                last.warn(format!("handle '{label}' received {} inbound values; last-writer-wins", entries.len()));
            }
            Some(last)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::{DiagramMetadata, Node, NodeProps, TransformRule};
    use crate::planner::plan;
    use std::collections::HashMap as Map;

    struct FakeOutputs(HashMap<String, Envelope>);
    impl OutputSource for FakeOutputs {
        fn latest_output(&self, node_id: &str) -> Option<Envelope> {
            self.0.get(node_id).cloned()
        }
    }

    fn node(id: &str, kind: &str) -> Node {
        Node { id: id.into(), kind: kind.into(), props: NodeProps::default(), position: None, label: None }
    }

    fn noop_template(_s: &str, _v: &serde_json::Value) -> std::result::Result<String, TransformError> {
        Ok(String::new())
    }

    fn diagram(nodes: Vec<Node>, arrows: Vec<Arrow>) -> CompiledDiagram {
        let mut node_map = Map::new();
        for n in nodes {
            node_map.insert(n.id.clone(), n);
        }
        CompiledDiagram {
            nodes: node_map,
            arrows,
            persons: Map::new(),
            api_keys: Map::new(),
            metadata: DiagramMetadata { format_version: "2.0".into(), ..Default::default() },
        }
    }

    #[test]
    fn not_ready_when_source_has_no_output_yet() {
        let d = diagram(
            vec![node("a", "code_job"), node("b", "code_job")],
            vec![Arrow { source_node: "a".into(), source_label: "default".into(), target_node: "b".into(), target_label: "default".into(), transform_rules: vec![], content_type: None, label: None }],
        );
        let plan = plan(&d).unwrap();
        let outputs = FakeOutputs(HashMap::new());
        let result = resolve_inputs(&d, &plan, "b", 0, &outputs, noop_template).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn applies_extract_transform_before_binding() {
        let d = diagram(
            vec![node("a", "code_job"), node("b", "code_job")],
            vec![Arrow {
                source_node: "a".into(),
                source_label: "default".into(),
                target_node: "b".into(),
                target_label: "value".into(),
                transform_rules: vec![TransformRule::Extract { field: "x".into() }],
                content_type: None,
                label: None,
            }],
        );
        let plan = plan(&d).unwrap();
        let mut outputs = HashMap::new();
        outputs.insert("a".to_string(), Envelope::object(serde_json::json!({"x": 42})));
        let result = resolve_inputs(&d, &plan, "b", 0, &FakeOutputs(outputs), noop_template).unwrap().unwrap();
        assert_eq!(result.get("value").unwrap().body, serde_json::json!(42));
    }

    #[test]
    fn endpoint_merges_multiple_inbound_into_ordered_list() {
        let d = diagram(
            vec![node("a", "code_job"), node("b", "code_job"), node("end1", "endpoint")],
            vec![
                Arrow { source_node: "a".into(), source_label: "default".into(), target_node: "end1".into(), target_label: "default".into(), transform_rules: vec![], content_type: None, label: None },
                Arrow { source_node: "b".into(), source_label: "default".into(), target_node: "end1".into(), target_label: "default".into(), transform_rules: vec![], content_type: None, label: None },
            ],
        );
        let plan = plan(&d).unwrap();
        let mut outputs = HashMap::new();
        outputs.insert("a".to_string(), Envelope::raw_text("first"));
        outputs.insert("b".to_string(), Envelope::raw_text("second"));
        let result = resolve_inputs(&d, &plan, "end1", 0, &FakeOutputs(outputs), noop_template).unwrap().unwrap();
        let body = &result.get("default").unwrap().body;
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[test]
    fn person_job_first_handle_only_used_before_first_exec() {
        let d = diagram(
            vec![node("s1", "start"), node("pj", "person_job")],
            vec![Arrow { source_node: "s1".into(), source_label: "default".into(), target_node: "pj".into(), target_label: "first".into(), transform_rules: vec![], content_type: None, label: None }],
        );
        let plan = plan(&d).unwrap();
        let mut outputs = HashMap::new();
        outputs.insert("s1".to_string(), Envelope::raw_text("seed"));

        let at_zero = resolve_inputs(&d, &plan, "pj", 0, &FakeOutputs(outputs.clone()), noop_template).unwrap().unwrap();
        assert!(at_zero.contains_key("first"));

        let at_one = resolve_inputs(&d, &plan, "pj", 1, &FakeOutputs(outputs), noop_template).unwrap().unwrap();
        assert!(!at_one.contains_key("first"));
    }
}
