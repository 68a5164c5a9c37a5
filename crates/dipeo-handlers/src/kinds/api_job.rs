//! `api_job` handler (spec §4.8 "ApiJob"): issues a single outbound HTTP
//! request and returns the response body as the node's envelope. Network
//! and 5xx failures are `ExternalService` errors so the scheduler's retry
//! policy applies (spec §4.11); 4xx responses are treated as the handler's
//! own result, not a transport failure, since the request reached the peer.
//!
//! `reqwest` is `langgraph-core`'s own HTTP client — several of its sibling
//! crates already depend on `reqwest = "0.12"` with `features = ["json"]`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use dipeo_core::diagram::NodeKind;
use dipeo_core::error::{EngineError, Result};
use dipeo_core::{ActivationContext, Envelope, NodeHandler};

pub struct ApiJobHandler {
    client: Client,
}

impl ApiJobHandler {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for ApiJobHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn api_job_props_schema() -> &'static serde_json::Value {
    static SCHEMA: std::sync::OnceLock<serde_json::Value> = std::sync::OnceLock::new();
    SCHEMA.get_or_init(|| {
        serde_json::json!({
            "type": "object",
            "required": ["url"],
            "properties": {
                "url": { "type": "string" },
                "method": { "type": "string" },
            }
        })
    })
}

#[async_trait]
impl NodeHandler for ApiJobHandler {
    fn kind(&self) -> NodeKind {
        "api_job".to_string()
    }

    fn props_schema(&self) -> Option<&serde_json::Value> {
        Some(api_job_props_schema())
    }

    async fn activate(&self, ctx: ActivationContext<'_>) -> Result<Envelope> {
        let url = ctx
            .node
            .props
            .0
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::Configuration { node: ctx.node.id.clone(), message: "missing 'url' prop".into() })?;
        let method = ctx.node.props.0.get("method").and_then(|v| v.as_str()).unwrap_or("GET").to_uppercase();
        let timeout_ms = ctx.node.props.0.get("timeout_ms").and_then(|v| v.as_u64()).unwrap_or(30_000);

        let body = ctx
            .node
            .props
            .0
            .get("body")
            .cloned()
            .or_else(|| ctx.inputs.get("default").map(|e| e.body.clone()));

        let method = method
            .parse::<reqwest::Method>()
            .map_err(|e| EngineError::Configuration { node: ctx.node.id.clone(), message: format!("invalid HTTP method: {e}") })?;

        let mut request = self.client.request(method, url).timeout(Duration::from_millis(timeout_ms));
        if let Some(headers) = ctx.node.props.0.get("headers").and_then(|v| v.as_object()) {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key.as_str(), value);
                }
            }
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| EngineError::ExternalService { node: ctx.node.id.clone(), message: e.to_string() })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(EngineError::ExternalService { node: ctx.node.id.clone(), message: format!("server error: {status}") });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let text = response.text().await.map_err(|e| EngineError::ExternalService { node: ctx.node.id.clone(), message: e.to_string() })?;

        let parsed = if content_type.contains("application/json") {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        } else {
            serde_json::Value::String(text)
        };

        Ok(Envelope::object(parsed)
            .with_metadata("status", status.as_u16())
            .with_metadata("ok", status.is_success()))
    }
}
