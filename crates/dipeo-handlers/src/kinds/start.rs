//! `start` handler (spec §4.5 "Start set"): seeds the run. It has no
//! inbound edges, so it simply projects the run's variables (or a literal
//! in `props.value`, if given) into an envelope for its descendants.

use async_trait::async_trait;

use dipeo_core::{ActivationContext, Envelope, NodeHandler};
use dipeo_core::diagram::NodeKind;
use dipeo_core::error::Result;

pub struct StartHandler;

#[async_trait]
impl NodeHandler for StartHandler {
    fn kind(&self) -> NodeKind {
        "start".to_string()
    }

    async fn activate(&self, ctx: ActivationContext<'_>) -> Result<Envelope> {
        let body = ctx.node.props.0.get("value").cloned().unwrap_or_else(|| ctx.variables.clone());
        Ok(Envelope::object(body))
    }
}
