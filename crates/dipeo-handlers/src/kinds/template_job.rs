//! `template_job` handler (spec §4.8 "TemplateJob"): renders `props.template`
//! through the shared [`TemplateService`] against the node's merged inputs.

use std::sync::Arc;

use async_trait::async_trait;

use dipeo_core::diagram::NodeKind;
use dipeo_core::error::{EngineError, Result};
use dipeo_core::{ActivationContext, Envelope, NodeHandler};
use dipeo_services::ServiceRegistry;

pub struct TemplateJobHandler {
    services: Arc<ServiceRegistry>,
}

impl TemplateJobHandler {
    pub fn new(services: Arc<ServiceRegistry>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl NodeHandler for TemplateJobHandler {
    fn kind(&self) -> NodeKind {
        "template_job".to_string()
    }

    async fn activate(&self, ctx: ActivationContext<'_>) -> Result<Envelope> {
        let template = ctx
            .node
            .props
            .0
            .get("template")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::Configuration { node: ctx.node.id.clone(), message: "missing 'template' prop".into() })?;

        let mut record = serde_json::Map::new();
        for (label, envelope) in &ctx.inputs {
            record.insert(label.clone(), envelope.body.clone());
        }
        let value = serde_json::Value::Object(record);

        let rendered = self
            .services
            .templates
            .render(template, &value)
            .map_err(|e| EngineError::Handler { node: ctx.node.id.clone(), message: e.to_string() })?;

        Ok(Envelope::raw_text(rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dipeo_core::diagram::{CompiledDiagram, DiagramMetadata, Node, NodeProps};
    use dipeo_services::{ApiKeyStore, FilesystemService, InMemorySubDiagramLoader, LlmClientCache};
    use std::collections::HashMap;
    use std::time::Duration;

    fn services() -> Arc<ServiceRegistry> {
        Arc::new(ServiceRegistry::new(
            LlmClientCache::new(Duration::from_secs(60), |_p, _m, _k| {
                Ok(Arc::new(dipeo_services::llm::EchoChatModel) as Arc<dyn dipeo_services::ChatModel>)
            }),
            FilesystemService::new(std::env::temp_dir()),
            ApiKeyStore::default(),
            Arc::new(InMemorySubDiagramLoader::new()),
        ))
    }

    #[tokio::test]
    async fn renders_against_merged_inputs() {
        let handler = TemplateJobHandler::new(services());
        let node = Node {
            id: "t1".into(),
            kind: "template_job".into(),
            props: NodeProps(serde_json::json!({"template": "Hello {{ name }}"})),
            position: None,
            label: None,
        };
        let d = CompiledDiagram {
            nodes: HashMap::new(),
            arrows: vec![],
            persons: HashMap::new(),
            api_keys: HashMap::new(),
            metadata: DiagramMetadata { format_version: "2.0".into(), ..Default::default() },
        };
        let mut inputs = HashMap::new();
        inputs.insert("name".to_string(), Envelope::raw_text("world"));
        let vars = serde_json::json!({});
        let ctx = ActivationContext { execution_id: "e1", node: &node, diagram: &d, inputs, exec_count: 0, variables: &vars, cancellation: &dipeo_core::CancellationToken::new() };
        let envelope = handler.activate(ctx).await.unwrap();
        assert_eq!(envelope.body, serde_json::json!("Hello world"));
    }
}
