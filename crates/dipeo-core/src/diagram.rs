//! The Compiled Diagram data model (spec §3).
//!
//! A `CompiledDiagram` is immutable for the duration of a run: it is produced
//! by an external compiler (diagram authoring / file-format parsing is out of
//! scope here, per spec §1) and consumed by [`crate::planner`] and
//! [`crate::scheduler`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{EngineError, Result};

pub type NodeId = String;
pub type PersonId = String;
pub type ApiKeyId = String;
pub type HandleLabel = String;

/// Direction of a handle relative to its owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Input,
    Output,
}

/// A named port on a node. Arrows connect an output handle of one node to an
/// input handle of another (spec glossary).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    pub node_id: NodeId,
    pub label: HandleLabel,
    pub direction: Direction,
}

impl Handle {
    pub fn new(node_id: impl Into<NodeId>, label: impl Into<HandleLabel>, direction: Direction) -> Self {
        Self { node_id: node_id.into(), label: label.into(), direction }
    }
}

/// Coercion hint applied to an envelope as it crosses an arrow (spec §4.6 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    RawText,
    Object,
    ConversationState,
    Binary,
}

/// One typed transform-rule step (spec §4.10). Rules compose left-to-right.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformRule {
    Extract { field: String },
    Wrap { key: String },
    Map { table: HashMap<String, serde_json::Value> },
    Template { source: String },
    ParseJson,
    Default,
}

/// A directed connection carrying envelopes between two handles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arrow {
    pub source_node: NodeId,
    pub source_label: HandleLabel,
    pub target_node: NodeId,
    pub target_label: HandleLabel,
    #[serde(default)]
    pub transform_rules: Vec<TransformRule>,
    #[serde(default)]
    pub content_type: Option<ContentType>,
    #[serde(default)]
    pub label: Option<String>,
}

/// The node kind discriminant. Kept as an open string (rather than a closed
/// enum) so that handler registration (C1) can be extended without touching
/// the data model — mirrors `langgraph-core`'s string-keyed tool/node registries.
pub type NodeKind = String;

/// Static, validated properties for a node. Left as an untyped JSON object;
/// per-kind typed validation happens in the handler's `props_schema`
/// (spec §4.1) at compile time and again defensively at activation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeProps(pub serde_json::Value);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(default)]
    pub props: NodeProps,
    #[serde(default)]
    pub position: Option<(f64, f64)>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonConfig {
    pub service: String,
    pub model: String,
    pub api_key_ref: ApiKeyId,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagramMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub format_hint: Option<String>,
    pub format_version: String,
}

/// The immutable, compiled diagram (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledDiagram {
    pub nodes: HashMap<NodeId, Node>,
    pub arrows: Vec<Arrow>,
    pub persons: HashMap<PersonId, PersonConfig>,
    pub api_keys: HashMap<ApiKeyId, String>,
    pub metadata: DiagramMetadata,
}

/// Format versions this build understands (spec §3 SUPPLEMENT).
const SUPPORTED_FORMAT_VERSIONS: &[&str] = &["1.0", "2.0"];

impl CompiledDiagram {
    /// Returns the set of `(node, label)` handles this diagram implies and
    /// validates every arrow endpoint references an existing handle
    /// (spec §3 invariant).
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_FORMAT_VERSIONS.contains(&self.metadata.format_version.as_str()) {
            return Err(EngineError::Validation(format!(
                "unsupported diagram format_version '{}'",
                self.metadata.format_version
            )));
        }

        for arrow in &self.arrows {
            if !self.nodes.contains_key(&arrow.source_node) {
                return Err(EngineError::Validation(format!(
                    "arrow references unknown source node '{}'",
                    arrow.source_node
                )));
            }
            if !self.nodes.contains_key(&arrow.target_node) {
                return Err(EngineError::Validation(format!(
                    "arrow references unknown target node '{}'",
                    arrow.target_node
                )));
            }
        }

        for person in self.persons.values() {
            if !self.api_keys.contains_key(&person.api_key_ref) {
                return Err(EngineError::Validation(format!(
                    "person references unknown api_key '{}'",
                    person.api_key_ref
                )));
            }
        }

        self.validate_condition_handles()?;
        Ok(())
    }

    /// A wired condition node's outbound arrows must use only the `true`/
    /// `false` handles (spec §3 invariant). An unwired condition node is
    /// merely dead, not invalid, so it is not checked here.
    fn validate_condition_handles(&self) -> Result<()> {
        for node in self.nodes.values() {
            if node.kind != "condition" {
                continue;
            }
            let outbound: Vec<&str> = self
                .arrows
                .iter()
                .filter(|a| a.source_node == node.id)
                .map(|a| a.source_label.as_str())
                .collect();
            if outbound.is_empty() {
                continue;
            }
            for label in &outbound {
                if *label != "true" && *label != "false" {
                    return Err(EngineError::Validation(format!(
                        "condition node '{}' has outbound handle '{}', expected 'true' or 'false'",
                        node.id, label
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Arrow> {
        self.arrows.iter().filter(move |a| a.source_node == node_id)
    }

    pub fn incoming<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Arrow> {
        self.arrows.iter().filter(move |a| a.target_node == node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_diagram() -> CompiledDiagram {
        CompiledDiagram {
            nodes: HashMap::new(),
            arrows: Vec::new(),
            persons: HashMap::new(),
            api_keys: HashMap::new(),
            metadata: DiagramMetadata { format_version: "2.0".into(), ..Default::default() },
        }
    }

    #[test]
    fn rejects_unknown_format_version() {
        let mut d = minimal_diagram();
        d.metadata.format_version = "99.0".into();
        assert!(d.validate().is_err());
    }

    #[test]
    fn rejects_dangling_arrow_endpoint() {
        let mut d = minimal_diagram();
        d.arrows.push(Arrow {
            source_node: "missing".into(),
            source_label: "default".into(),
            target_node: "also_missing".into(),
            target_label: "default".into(),
            transform_rules: vec![],
            content_type: None,
            label: None,
        });
        assert!(d.validate().is_err());
    }

    #[test]
    fn rejects_condition_node_with_non_boolean_handle() {
        let mut d = minimal_diagram();
        d.nodes.insert(
            "cond1".into(),
            Node { id: "cond1".into(), kind: "condition".into(), props: NodeProps::default(), position: None, label: None },
        );
        d.nodes.insert(
            "next".into(),
            Node { id: "next".into(), kind: "endpoint".into(), props: NodeProps::default(), position: None, label: None },
        );
        d.arrows.push(Arrow {
            source_node: "cond1".into(),
            source_label: "maybe".into(),
            target_node: "next".into(),
            target_label: "default".into(),
            transform_rules: vec![],
            content_type: None,
            label: None,
        });
        assert!(d.validate().is_err());
    }
}
