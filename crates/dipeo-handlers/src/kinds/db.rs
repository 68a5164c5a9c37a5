//! `db` handler (spec §1 "DB/file I/O"). No database driver appears
//! anywhere in the corpus this build draws from, so persistent records are
//! modeled as JSON files under the shared [`FilesystemService`] base
//! directory — `read` loads and parses a record, `write` serializes the
//! merged inputs over it, `append` pushes onto a JSON array file.

use std::sync::Arc;

use async_trait::async_trait;

use dipeo_core::diagram::NodeKind;
use dipeo_core::error::{EngineError, Result};
use dipeo_core::{ActivationContext, Envelope, NodeHandler};
use dipeo_services::ServiceRegistry;

pub struct DbHandler {
    services: Arc<ServiceRegistry>,
}

impl DbHandler {
    pub fn new(services: Arc<ServiceRegistry>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl NodeHandler for DbHandler {
    fn kind(&self) -> NodeKind {
        "db".to_string()
    }

    async fn activate(&self, ctx: ActivationContext<'_>) -> Result<Envelope> {
        let path = ctx
            .node
            .props
            .0
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::Configuration { node: ctx.node.id.clone(), message: "missing 'path' prop".into() })?;
        let operation = ctx.node.props.0.get("operation").and_then(|v| v.as_str()).unwrap_or("read");

        let to_handler_err = |e: dipeo_services::ServiceError| EngineError::Handler { node: ctx.node.id.clone(), message: e.to_string() };

        match operation {
            "read" => {
                let contents = self.services.filesystem.read(path).await.map_err(to_handler_err)?;
                let body = serde_json::from_str(&contents).unwrap_or(serde_json::Value::String(contents));
                Ok(Envelope::object(body))
            }
            "write" => {
                let mut record = serde_json::Map::new();
                for (label, envelope) in &ctx.inputs {
                    record.insert(label.clone(), envelope.body.clone());
                }
                let body = serde_json::Value::Object(record);
                let serialized = serde_json::to_string_pretty(&body).map_err(EngineError::Serialization)?;
                self.services.filesystem.write(path, &serialized).await.map_err(to_handler_err)?;
                Ok(Envelope::object(body))
            }
            "append" => {
                let existing = self.services.filesystem.read(path).await.ok();
                let mut items: Vec<serde_json::Value> = existing
                    .as_deref()
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or_default();

                let mut record = serde_json::Map::new();
                for (label, envelope) in &ctx.inputs {
                    record.insert(label.clone(), envelope.body.clone());
                }
                items.push(serde_json::Value::Object(record));

                let serialized = serde_json::to_string_pretty(&items).map_err(EngineError::Serialization)?;
                self.services.filesystem.write(path, &serialized).await.map_err(to_handler_err)?;
                Ok(Envelope::object(serde_json::Value::Array(items)))
            }
            other => Err(EngineError::Configuration { node: ctx.node.id.clone(), message: format!("unknown db operation '{other}'") }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dipeo_core::diagram::{CompiledDiagram, DiagramMetadata, Node, NodeProps};
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
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let services = services(dir.path());
        let handler = DbHandler::new(services);
        let d = diagram();

        let write_node = Node {
            id: "w1".into(),
            kind: "db".into(),
            props: NodeProps(serde_json::json!({"path": "record.json", "operation": "write"})),
            position: None,
            label: None,
        };
        let mut inputs = HashMap::new();
        inputs.insert("default".to_string(), Envelope::raw_text("value"));
        let vars = serde_json::json!({});
        let ctx = ActivationContext { execution_id: "e1", node: &write_node, diagram: &d, inputs, exec_count: 0, variables: &vars, cancellation: &dipeo_core::CancellationToken::new() };
        handler.activate(ctx).await.unwrap();

        let read_node = Node {
            id: "r1".into(),
            kind: "db".into(),
            props: NodeProps(serde_json::json!({"path": "record.json", "operation": "read"})),
            position: None,
            label: None,
        };
        let vars = serde_json::json!({});
        let ctx = ActivationContext { execution_id: "e1", node: &read_node, diagram: &d, inputs: Default::default(), exec_count: 0, variables: &vars, cancellation: &dipeo_core::CancellationToken::new() };
        let envelope = handler.activate(ctx).await.unwrap();
        assert_eq!(envelope.body["default"], serde_json::json!("value"));
    }

    #[tokio::test]
    async fn append_accumulates_records() {
        let dir = tempfile::tempdir().unwrap();
        let services_registry = services(dir.path());
        let handler = DbHandler::new(services_registry);
        let d = diagram();

        for i in 0..2 {
            let node = Node {
                id: "a1".into(),
                kind: "db".into(),
                props: NodeProps(serde_json::json!({"path": "log.json", "operation": "append"})),
                position: None,
                label: None,
            };
            let mut inputs = HashMap::new();
            inputs.insert("default".to_string(), Envelope::raw_text(format!("item{i}")));
            let vars = serde_json::json!({});
            let ctx = ActivationContext { execution_id: "e1", node: &node, diagram: &d, inputs, exec_count: i as u64, variables: &vars, cancellation: &dipeo_core::CancellationToken::new() };
            handler.activate(ctx).await.unwrap();
        }

        let read_node = Node {
            id: "r1".into(),
            kind: "db".into(),
            props: NodeProps(serde_json::json!({"path": "log.json", "operation": "read"})),
            position: None,
            label: None,
        };
        let d2 = diagram();
        let vars = serde_json::json!({});
        let ctx = ActivationContext { execution_id: "e1", node: &read_node, diagram: &d2, inputs: Default::default(), exec_count: 0, variables: &vars, cancellation: &dipeo_core::CancellationToken::new() };
        let handler2 = DbHandler::new(services(dir.path()));
        let envelope = handler2.activate(ctx).await.unwrap();
        assert_eq!(envelope.body.as_array().unwrap().len(), 2);
    }
}
