//! Handler Registry (C1, spec §4.1).
//!
//! Grounded on `langgraph-core`'s `tool::{Tool, ToolRegistry}`: a typed,
//! named registry rather than trait-object inheritance or global mutable
//! state, replacing the dynamic-dispatch/deep-inheritance handler registries
//! of the original system (spec §9 Design Notes).
//!
//! The trait lives in `dipeo-core` so the scheduler can depend on it without
//! depending on `dipeo-handlers`, which implements it for each node kind and
//! owns the concrete [`HandlerRegistry`] population.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::diagram::{CompiledDiagram, Node, NodeKind};
use crate::envelope::Envelope;
use crate::error::Result;
use crate::input_resolution::ResolvedInputs;

/// Everything a handler needs to activate a node, assembled by the
/// scheduler (spec §4.7 step 2: "Acquire required services").
pub struct ActivationContext<'a> {
    pub execution_id: &'a str,
    pub node: &'a Node,
    pub diagram: &'a CompiledDiagram,
    pub inputs: ResolvedInputs,
    pub exec_count: u64,
    pub variables: &'a serde_json::Value,
    /// The run's cancellation signal. Handlers that fan out to nested work
    /// (e.g. `sub_diagram`) must thread this through rather than minting a
    /// fresh token, or the parent's `abort()` won't reach it (spec §4.11, IP7).
    pub cancellation: &'a CancellationToken,
}

/// A single node kind's execution logic. Implemented once per kind in
/// `dipeo-handlers::kinds`.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// The `kind` string this handler activates for (spec glossary "Node
    /// Kind").
    fn kind(&self) -> NodeKind;

    /// JSON Schema used to validate `node.props` before activation (spec
    /// §4.7 step 2: "validate props against the handler schema"). `None`
    /// means no schema validation is performed for this kind.
    fn props_schema(&self) -> Option<&serde_json::Value> {
        None
    }

    async fn activate(&self, ctx: ActivationContext<'_>) -> Result<Envelope>;
}

/// Typed, name-keyed lookup from node kind to handler. No inheritance, no
/// global state: constructed once per process and shared via `Arc`.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<NodeKind, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn register(&mut self, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn NodeHandler>> {
        self.handlers.get(kind)
    }

    pub fn has_kind(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &NodeKind> {
        self.handlers.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;

    struct EchoHandler;

    #[async_trait]
    impl NodeHandler for EchoHandler {
        fn kind(&self) -> NodeKind {
            "echo".to_string()
        }

        async fn activate(&self, _ctx: ActivationContext<'_>) -> Result<Envelope> {
            Ok(Envelope::raw_text("echo"))
        }
    }

    #[test]
    fn registry_looks_up_by_kind() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(EchoHandler));
        assert!(registry.has_kind("echo"));
        assert!(registry.get("missing").is_none());
    }
}
