//! The universal inter-node value carrier (spec §3 "Envelope", §4.10).
//!
//! Grounded on `langgraph-core`'s `NodeResult`/`MessageContent` tagged-value
//! pattern, generalized to a body/content-type/metadata shape plus the six
//! transform-rule kinds of spec §4.10.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::diagram::{ContentType, TransformRule};

/// The canonical output container produced by handlers, owned by the state
/// store, and read-only once passed downstream (spec §3 "Ownership").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub body: Value,
    pub content_type: ContentType,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub executed_nodes: Vec<String>,
}

impl Envelope {
    pub fn new(body: Value, content_type: ContentType) -> Self {
        Self { body, content_type, metadata: HashMap::new(), executed_nodes: Vec::new() }
    }

    pub fn raw_text(text: impl Into<String>) -> Self {
        Self::new(Value::String(text.into()), ContentType::RawText)
    }

    pub fn object(value: Value) -> Self {
        Self::new(value, ContentType::Object)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let entry = self.metadata.entry("warnings".to_string()).or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(arr) = entry {
            arr.push(Value::String(message.into()));
        }
    }

    /// `branch` metadata set by Condition handlers (spec §4.8) so the
    /// scheduler can pick exactly one outbound edge.
    pub fn branch(&self) -> Option<bool> {
        self.metadata.get("branch").and_then(Value::as_bool)
    }
}

/// A failure produced while applying a [`TransformRule`] (spec §4.6, §4.10).
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("field '{0}' not present on object body")]
    MissingField(String),
    #[error("template render error: {0}")]
    TemplateError(String),
}

/// Coerce an envelope's body according to an arrow's declared content type
/// (spec §4.6 step 2). Coercion never fails; it best-effort converts.
pub fn coerce_content_type(envelope: &mut Envelope, target: ContentType) {
    if envelope.content_type == target {
        return;
    }
    envelope.body = match (target, &envelope.body) {
        (ContentType::RawText, Value::String(_)) => envelope.body.clone(),
        (ContentType::RawText, other) => Value::String(other.to_string()),
        (ContentType::Object, Value::Object(_)) => envelope.body.clone(),
        (ContentType::Object, Value::String(s)) => {
            serde_json::from_str(s).unwrap_or_else(|_| serde_json::json!({ "value": s }))
        }
        (ContentType::Object, other) => serde_json::json!({ "value": other }),
        _ => envelope.body.clone(),
    };
    envelope.content_type = target;
}

/// Apply one [`TransformRule`] to a value, per §4.10. `extract` and
/// `template` are the only rules that can fail; callers map failures to
/// `InputResolutionError` unless the target input is optional (spec §4.6).
pub fn apply_rule(
    value: Value,
    rule: &TransformRule,
    template_fn: impl Fn(&str, &Value) -> Result<String, TransformError>,
) -> Result<Value, TransformError> {
    match rule {
        TransformRule::Extract { field } => match &value {
            Value::Object(map) => map
                .get(field)
                .cloned()
                .ok_or_else(|| TransformError::MissingField(field.clone())),
            _ => Err(TransformError::MissingField(field.clone())),
        },
        TransformRule::Wrap { key } => {
            let mut map = serde_json::Map::new();
            map.insert(key.clone(), value);
            Ok(Value::Object(map))
        }
        TransformRule::Map { table } => {
            let key = match &value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            Ok(table.get(&key).cloned().unwrap_or(value))
        }
        TransformRule::Template { source } => {
            let rendered = template_fn(source, &value)?;
            Ok(Value::String(rendered))
        }
        TransformRule::ParseJson => match &value {
            Value::String(s) => Ok(serde_json::from_str(s).unwrap_or_else(|_| value.clone())),
            _ => Ok(value),
        },
        TransformRule::Default => Ok(value),
    }
}

/// Apply a left-to-right chain of rules (spec §4.10 "Rules compose
/// left-to-right"). `parse_json` never fails the chain: a parse failure
/// returns the original string body with a warning, recorded by the caller.
pub fn apply_rules(
    mut value: Value,
    rules: &[TransformRule],
    template_fn: impl Fn(&str, &Value) -> Result<String, TransformError> + Copy,
) -> Result<Value, TransformError> {
    for rule in rules {
        value = apply_rule(value, rule, template_fn)?;
    }
    Ok(value)
}
