//! `user_response` handler (spec §6 "Interactive input"): publishes an
//! `interactive_prompt_required` event carrying `{node_id, prompt,
//! timeout_seconds, correlation_id}` and suspends until a matching
//! `interactive_response` arrives through [`PendingResponses::resolve`] (the
//! host's UI/CLI surface calls that after collecting the human's answer) or
//! the timeout elapses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};

use dipeo_core::diagram::NodeKind;
use dipeo_core::error::{EngineError, Result};
use dipeo_core::event::{Event, EventBus, EventKind};
use dipeo_core::{ActivationContext, Envelope, NodeHandler};

const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Correlates a suspended `user_response` activation with the eventual
/// answer. One entry per in-flight prompt; entries are removed once
/// resolved or timed out.
#[derive(Default)]
pub struct PendingResponses {
    pending: Mutex<HashMap<String, oneshot::Sender<serde_json::Value>>>,
}

impl PendingResponses {
    pub fn new() -> Self {
        Self::default()
    }

    async fn register(&self, correlation_id: String) -> oneshot::Receiver<serde_json::Value> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(correlation_id, tx);
        rx
    }

    async fn forget(&self, correlation_id: &str) {
        self.pending.lock().await.remove(correlation_id);
    }

    /// Delivers `value` to the prompt waiting on `correlation_id`. Returns
    /// `false` if no prompt is currently pending under that id (already
    /// answered, timed out, or never requested).
    pub async fn resolve(&self, correlation_id: &str, value: serde_json::Value) -> bool {
        if let Some(tx) = self.pending.lock().await.remove(correlation_id) {
            tx.send(value).is_ok()
        } else {
            false
        }
    }
}

pub struct UserResponseHandler {
    events: EventBus,
    pending: Arc<PendingResponses>,
}

impl UserResponseHandler {
    pub fn new(events: EventBus, pending: Arc<PendingResponses>) -> Self {
        Self { events, pending }
    }
}

#[async_trait]
impl NodeHandler for UserResponseHandler {
    fn kind(&self) -> NodeKind {
        "user_response".to_string()
    }

    async fn activate(&self, ctx: ActivationContext<'_>) -> Result<Envelope> {
        let prompt = ctx.node.props.0.get("prompt").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let timeout_seconds = ctx.node.props.0.get("timeout_seconds").and_then(|v| v.as_u64()).unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        let correlation_id = format!("{}:{}:{}", ctx.execution_id, ctx.node.id, ctx.exec_count);

        let receiver = self.pending.register(correlation_id.clone()).await;

        self.events
            .publish(
                Event::new(
                    ctx.execution_id,
                    EventKind::InteractivePromptRequired,
                    serde_json::json!({
                        "prompt": prompt,
                        "timeout_seconds": timeout_seconds,
                        "correlation_id": correlation_id,
                    }),
                )
                .with_node(ctx.node.id.clone()),
            )
            .await;

        match tokio::time::timeout(Duration::from_secs(timeout_seconds), receiver).await {
            Ok(Ok(value)) => Ok(Envelope::object(value)),
            Ok(Err(_)) => Err(EngineError::Handler { node: ctx.node.id.clone(), message: "interactive response channel closed".into() }),
            Err(_) => {
                self.pending.forget(&correlation_id).await;
                Err(EngineError::Timeout(Duration::from_secs(timeout_seconds), format!("no interactive response for node '{}'", ctx.node.id)))
            }
        }
    }
}
