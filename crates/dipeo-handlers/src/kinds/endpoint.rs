//! `endpoint` handler (spec §4.8 "Endpoint"): collects all inputs into an
//! ordered record, optionally persists them via the filesystem service, and
//! always emits a final envelope — the run's result if this is the chosen
//! endpoint.

use std::sync::Arc;

use async_trait::async_trait;

use dipeo_core::diagram::NodeKind;
use dipeo_core::error::{EngineError, Result};
use dipeo_core::{ActivationContext, Envelope, NodeHandler};
use dipeo_services::ServiceRegistry;

pub struct EndpointHandler {
    services: Arc<ServiceRegistry>,
}

impl EndpointHandler {
    pub fn new(services: Arc<ServiceRegistry>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl NodeHandler for EndpointHandler {
    fn kind(&self) -> NodeKind {
        "endpoint".to_string()
    }

    async fn activate(&self, ctx: ActivationContext<'_>) -> Result<Envelope> {
        let mut record = serde_json::Map::new();
        for (label, envelope) in &ctx.inputs {
            record.insert(label.clone(), envelope.body.clone());
        }
        let body = serde_json::Value::Object(record);

        if let Some(path) = ctx.node.props.0.get("write_to").and_then(|v| v.as_str()) {
            let serialized = serde_json::to_string_pretty(&body).map_err(EngineError::Serialization)?;
            self.services
                .filesystem
                .write(path, &serialized)
                .await
                .map_err(|e| EngineError::Handler { node: ctx.node.id.clone(), message: e.to_string() })?;
        }

        Ok(Envelope::object(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dipeo_core::diagram::{CompiledDiagram, DiagramMetadata, Node, NodeProps};
    use dipeo_core::envelope::Envelope as Env;
    use dipeo_services::{ApiKeyStore, FilesystemService, InMemorySubDiagramLoader, LlmClientCache};
    use std::collections::HashMap;
    use std::time::Duration;

    fn services(dir: &std::path::Path) -> Arc<ServiceRegistry> {
        Arc::new(ServiceRegistry::new(
            LlmClientCache::new(Duration::from_secs(60), |_p, _m, _k| {
                Ok(Arc::new(dipeo_services::llm::EchoChatModel) as Arc<dyn dipeo_services::ChatModel>)
            }),
            FilesystemService::new(dir),
            ApiKeyStore::default(),
            Arc::new(InMemorySubDiagramLoader::new()),
        ))
    }

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
    async fn collects_inputs_into_ordered_record() {
        let dir = tempfile::tempdir().unwrap();
        let handler = EndpointHandler::new(services(dir.path()));
        let node = Node { id: "end1".into(), kind: "endpoint".into(), props: NodeProps::default(), position: None, label: None };
        let d = diagram();
        let mut inputs = HashMap::new();
        inputs.insert("default".to_string(), Env::raw_text("hi"));
        let vars = serde_json::json!({});
        let ctx = ActivationContext { execution_id: "e1", node: &node, diagram: &d, inputs, exec_count: 0, variables: &vars, cancellation: &dipeo_core::CancellationToken::new() };
        let envelope = handler.activate(ctx).await.unwrap();
        assert_eq!(envelope.body["default"], serde_json::json!("hi"));
    }
}
