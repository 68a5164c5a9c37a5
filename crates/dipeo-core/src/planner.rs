//! Dependency Resolver & Planner (C5, spec §4.5).
//!
//! Grounded on `langgraph-core`'s `pregel::algo::prepare_next_tasks`, which
//! derives the next-ready task set from channel versions; here readiness is
//! derived from handle-labeled arrows instead, and feedback (cycle-closing)
//! edges are classified once at compile time rather than inferred from
//! runtime channel re-triggering.

use std::collections::{HashMap, HashSet};

use crate::diagram::{Arrow, CompiledDiagram, NodeId};
use crate::error::{EngineError, Result};

/// Whether a node activates once its inputs are ready, or re-activates on a
/// bounded loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePolicy {
    /// Ordinary single-activation node.
    Standard,
    /// Condition node: activates exactly one outbound branch.
    Choice,
    /// PersonJob with `max_iteration > 1`: re-readies on feedback edges.
    Iterating,
    /// Endpoint: a sink that may collect multiple ordered inputs.
    Sink,
}

/// Precomputed per-node readiness bookkeeping, produced once per diagram.
pub struct ExecutionPlan {
    pub outgoing: HashMap<NodeId, Vec<Arrow>>,
    pub incoming: HashMap<NodeId, Vec<Arrow>>,
    /// `(source_node, source_label, target_node, target_label)` tuples
    /// classified as feedback (cycle-closing) edges.
    pub feedback_edges: HashSet<(NodeId, String, NodeId, String)>,
    pub start_set: Vec<NodeId>,
    pub policies: HashMap<NodeId, NodePolicy>,
}

impl ExecutionPlan {
    pub fn is_feedback(&self, arrow: &Arrow) -> bool {
        self.feedback_edges.contains(&(
            arrow.source_node.clone(),
            arrow.source_label.clone(),
            arrow.target_node.clone(),
            arrow.target_label.clone(),
        ))
    }

    pub fn policy(&self, node_id: &str) -> NodePolicy {
        self.policies.get(node_id).copied().unwrap_or(NodePolicy::Standard)
    }

    /// Non-feedback inbound edges only — the set that must all have fired
    /// for the node to be ready on its first activation (spec §4.7 step 3).
    pub fn required_inbound(&self, node_id: &str) -> Vec<&Arrow> {
        self.incoming
            .get(node_id)
            .into_iter()
            .flatten()
            .filter(|a| !self.is_feedback(a))
            .collect()
    }
}

/// Build the plan for a validated diagram (spec §4.5).
///
/// Rejects diagrams with ambiguous multi-input joins: a target handle label
/// fed by more than one edge is only legal when the target node's kind
/// supports merge (`endpoint`, or `person_job` via its `first`/`default`
/// handles).
pub fn plan(diagram: &CompiledDiagram) -> Result<ExecutionPlan> {
    let mut outgoing: HashMap<NodeId, Vec<Arrow>> = HashMap::new();
    let mut incoming: HashMap<NodeId, Vec<Arrow>> = HashMap::new();
    for arrow in &diagram.arrows {
        outgoing.entry(arrow.source_node.clone()).or_default().push(arrow.clone());
        incoming.entry(arrow.target_node.clone()).or_default().push(arrow.clone());
    }

    let feedback_edges = classify_feedback_edges(diagram);

    reject_ambiguous_joins(diagram, &incoming, &feedback_edges)?;

    let start_set: Vec<NodeId> = diagram
        .nodes
        .values()
        .filter(|n| n.kind == "start")
        .map(|n| n.id.clone())
        .collect();

    let mut policies = HashMap::new();
    for node in diagram.nodes.values() {
        let policy = match node.kind.as_str() {
            "condition" => NodePolicy::Choice,
            "endpoint" => NodePolicy::Sink,
            "person_job" => {
                let max_iteration = node.props.0.get("max_iteration").and_then(|v| v.as_u64()).unwrap_or(1);
                if max_iteration > 1 {
                    NodePolicy::Iterating
                } else {
                    NodePolicy::Standard
                }
            }
            _ => NodePolicy::Standard,
        };
        policies.insert(node.id.clone(), policy);
    }

    Ok(ExecutionPlan { outgoing, incoming, feedback_edges, start_set, policies })
}

/// An edge closes a cycle (is a feedback edge) if its target node can reach
/// its source node through the non-feedback edges discovered so far — i.e.
/// it appears on a path back to an ancestor. We detect this with a DFS from
/// each edge's target toward its source; edges into `condition` or
/// `person_job` nodes are the only ones eligible, per spec §4.5.
fn classify_feedback_edges(diagram: &CompiledDiagram) -> HashSet<(NodeId, String, NodeId, String)> {
    let mut adjacency: HashMap<&str, Vec<&Arrow>> = HashMap::new();
    for arrow in &diagram.arrows {
        adjacency.entry(arrow.source_node.as_str()).or_default().push(arrow);
    }

    let mut feedback = HashSet::new();
    for arrow in &diagram.arrows {
        let target_kind = diagram.node(&arrow.target_node).map(|n| n.kind.as_str()).unwrap_or("");
        if target_kind != "condition" && target_kind != "person_job" {
            continue;
        }
        if reaches(&adjacency, &arrow.target_node, &arrow.source_node) {
            feedback.insert((
                arrow.source_node.clone(),
                arrow.source_label.clone(),
                arrow.target_node.clone(),
                arrow.target_label.clone(),
            ));
        }
    }
    feedback
}

fn reaches(adjacency: &HashMap<&str, Vec<&Arrow>>, from: &str, to: &str) -> bool {
    let mut visited = HashSet::new();
    let mut stack = vec![from.to_string()];
    while let Some(current) = stack.pop() {
        if current == to {
            return true;
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Some(edges) = adjacency.get(current.as_str()) {
            for edge in edges {
                stack.push(edge.target_node.clone());
            }
        }
    }
    false
}

fn reject_ambiguous_joins(
    diagram: &CompiledDiagram,
    incoming: &HashMap<NodeId, Vec<Arrow>>,
    feedback_edges: &HashSet<(NodeId, String, NodeId, String)>,
) -> Result<()> {
    for (target_node, arrows) in incoming {
        let target_kind = diagram.node(target_node).map(|n| n.kind.as_str()).unwrap_or("");
        let merge_supported = matches!(target_kind, "endpoint" | "person_job");

        let mut by_label: HashMap<&str, usize> = HashMap::new();
        for arrow in arrows {
            let is_feedback = feedback_edges.contains(&(
                arrow.source_node.clone(),
                arrow.source_label.clone(),
                arrow.target_node.clone(),
                arrow.target_label.clone(),
            ));
            if is_feedback {
                continue;
            }
            *by_label.entry(arrow.target_label.as_str()).or_insert(0) += 1;
        }

        for (label, count) in by_label {
            if count > 1 && !merge_supported {
                return Err(EngineError::Validation(format!(
                    "node '{target_node}' handle '{label}' has {count} non-feedback inbound edges but kind '{target_kind}' does not support merge"
                )));
            }
        }
    }
    Ok(())
}
