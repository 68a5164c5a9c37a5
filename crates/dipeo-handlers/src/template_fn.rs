//! The `template_fn` every scheduler run is parameterized with (spec §4.6
//! step 2, §4.10 `template(source)`). Must be a plain `Copy` function — the
//! scheduler threads it through spawned tasks — so it builds a throwaway
//! [`dipeo_services::TemplateService`] per call rather than capturing a
//! shared one.

use dipeo_core::envelope::TransformError;
use dipeo_services::TemplateService;

pub fn render_template(source: &str, value: &serde_json::Value) -> Result<String, TransformError> {
    TemplateService::new().render(source, value).map_err(|e| TransformError::TemplateError(e.to_string()))
}
