//! `sub_diagram` handler (spec §4.8 "SubDiagram"): resolves a child diagram
//! reference, runs it to completion with the same handler set, and surfaces
//! its designated endpoint's output as this node's envelope. A failed or
//! endpoint-less child fails the parent node — sub-diagram failures do not
//! get silently swallowed.

use std::sync::Arc;

use async_trait::async_trait;

use dipeo_core::diagram::NodeKind;
use dipeo_core::error::{EngineError, Result};
use dipeo_core::event::EventBus;
use dipeo_core::state::{ExecutionStateStore, ExecutionStatus};
use dipeo_core::{ActivationContext, Envelope, NodeHandler, RunOptions};
use dipeo_services::ServiceRegistry;

use crate::registry_handle::HandlerRegistryHandle;
use crate::template_fn::render_template;

pub struct SubDiagramHandler {
    services: Arc<ServiceRegistry>,
    handlers: HandlerRegistryHandle,
}

impl SubDiagramHandler {
    pub fn new(services: Arc<ServiceRegistry>, handlers: HandlerRegistryHandle) -> Self {
        Self { services, handlers }
    }
}

#[async_trait]
impl NodeHandler for SubDiagramHandler {
    fn kind(&self) -> NodeKind {
        "sub_diagram".to_string()
    }

    async fn activate(&self, ctx: ActivationContext<'_>) -> Result<Envelope> {
        let reference = ctx
            .node
            .props
            .0
            .get("diagram")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::Configuration { node: ctx.node.id.clone(), message: "missing 'diagram' prop".into() })?;

        let child_diagram = self
            .services
            .sub_diagrams
            .resolve(reference)
            .map_err(|e| EngineError::Configuration { node: ctx.node.id.clone(), message: e.to_string() })?;

        let mut seed = serde_json::Map::new();
        for (label, envelope) in &ctx.inputs {
            seed.insert(label.clone(), envelope.body.clone());
        }

        let child_execution_id = format!("{}::{}::{}", ctx.execution_id, ctx.node.id, ctx.exec_count);
        let child_state = ExecutionStateStore::new(EventBus::new());

        dipeo_core::scheduler::run(
            &child_execution_id,
            child_diagram.clone(),
            self.handlers.get(),
            child_state.clone(),
            serde_json::Value::Object(seed),
            RunOptions::default(),
            ctx.cancellation.clone(),
            render_template,
        )
        .await?;

        let final_state = child_state
            .get(&child_execution_id)
            .await
            .ok_or_else(|| EngineError::Internal(format!("missing sub-diagram state for '{child_execution_id}'")))?;

        if final_state.status != ExecutionStatus::Completed {
            return Err(EngineError::Handler {
                node: ctx.node.id.clone(),
                message: final_state.error.unwrap_or_else(|| "sub-diagram did not complete".into()),
            });
        }

        let endpoint_id = ctx.node.props.0.get("endpoint").and_then(|v| v.as_str()).map(str::to_string).or_else(|| {
            let mut endpoints = child_diagram.nodes.values().filter(|n| n.kind == "endpoint");
            let first = endpoints.next()?;
            if endpoints.next().is_some() {
                None
            } else {
                Some(first.id.clone())
            }
        });

        let endpoint_id = endpoint_id.ok_or_else(|| EngineError::Configuration {
            node: ctx.node.id.clone(),
            message: "sub-diagram has no unambiguous endpoint; set the 'endpoint' prop".into(),
        })?;

        let output = final_state
            .node_states
            .get(&endpoint_id)
            .and_then(|s| s.output.clone())
            .ok_or_else(|| EngineError::Handler { node: ctx.node.id.clone(), message: format!("sub-diagram endpoint '{endpoint_id}' produced no output") })?;

        // Rolls the child run's total token usage into this node's own
        // `token_usage` metadata so the scheduler's usual
        // `add_token_usage` bookkeeping (triggered by that metadata key)
        // carries it into the parent's `token_usage_total` (spec §8
        // scenario 6: "parent totals include child token usage").
        let child_usage = final_state.token_usage_total;
        Ok(output.with_metadata(
            "token_usage",
            serde_json::json!({ "prompt_tokens": child_usage.prompt_tokens, "completion_tokens": child_usage.completion_tokens }),
        ))
    }
}
