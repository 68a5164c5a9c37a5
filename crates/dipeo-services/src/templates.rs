//! Template rendering service backing the `template` transform rule
//! (spec §4.10) and `template_job` handler kind. Deterministic, no I/O:
//! every render is a pure function of `source` and `value`.
//!
//! `tera` is the templating crate the wider example pack reaches for (the
//! dashflow workspace in this retrieval set); the base execution-engine
//! crate set this workspace started from has no templating concern, so this
//! is an enrichment import pulled in for `template_job`.

use tera::{Context, Tera};

use crate::error::{Result, ServiceError};

pub struct TemplateService;

impl TemplateService {
    pub fn new() -> Self {
        Self
    }

    /// Renders `source` as an ad hoc one-off template. If `value` is a JSON
    /// object its fields are spread as top-level template variables;
    /// otherwise it is bound to the single variable `value` (spec §4.10
    /// "template(source)").
    pub fn render(&self, source: &str, value: &serde_json::Value) -> Result<String> {
        let mut context = Context::new();
        match value {
            serde_json::Value::Object(map) => {
                for (key, v) in map {
                    context.insert(key, v);
                }
            }
            other => context.insert("value", other),
        }

        Tera::one_off(source, &context, true).map_err(|e| ServiceError::Template(e.to_string()))
    }
}

impl Default for TemplateService {
    fn default() -> Self {
        Self::new()
    }
}
