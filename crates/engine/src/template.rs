//! Template Renderer — resolves templated node configuration with upstream
//! data (spec §4.9).
//!
//! Treated as a narrow pluggable dependency: the engine only ever needs
//! `render(text, context) → text` (spec §9); everything else here is just
//! Handlebars' own templating language.

use handlebars::Handlebars;
use serde_json::{Map, Value};
use thiserror::Error;

use nodes::NodeOutput;

#[derive(Debug, Error)]
#[error("template rendering failed: {0}")]
pub struct TemplateError(pub String);

pub struct TemplateRenderer {
    handlebars: Handlebars<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        // Unresolved variables render empty rather than failing — only a
        // genuine render error (e.g. malformed `{{#if}}`) is a
        // `TemplateError` (spec §4.9).
        handlebars.set_strict_mode(false);
        Self { handlebars }
    }

    /// Render a single string against `context`. Values with no template
    /// delimiter pass through unchanged without ever reaching Handlebars
    /// (P10).
    pub fn render(&self, text: &str, context: &Value) -> Result<String, TemplateError> {
        if !text.contains("{{") {
            return Ok(text.to_string());
        }
        self.handlebars
            .render_template(text, context)
            .map_err(|e| TemplateError(e.to_string()))
    }

    /// Scan every form field; render the string values against
    /// `context`'s `data` map.
    pub fn render_form(
        &self,
        form: &Map<String, Value>,
        context: &NodeOutput,
    ) -> Result<Map<String, Value>, TemplateError> {
        let ctx = Value::Object(context.data_map());
        let mut rendered = Map::with_capacity(form.len());
        for (key, value) in form {
            rendered.insert(key.clone(), self.render_value(value, &ctx)?);
        }
        Ok(rendered)
    }

    fn render_value(&self, value: &Value, ctx: &Value) -> Result<Value, TemplateError> {
        match value {
            Value::String(s) => Ok(Value::String(self.render(s, ctx)?)),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.render_value(item, ctx)?);
                }
                Ok(Value::Array(out))
            }
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.render_value(v, ctx)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn non_template_values_pass_through_unchanged() {
        let renderer = TemplateRenderer::new();
        let form = Map::from_iter([("plain".to_string(), json!("just text"))]);
        let ctx = NodeOutput::data(Map::new());
        let rendered = renderer.render_form(&form, &ctx).unwrap();
        assert_eq!(rendered["plain"], "just text");
    }

    #[test]
    fn template_values_resolve_against_context_data() {
        let renderer = TemplateRenderer::new();
        let form = Map::from_iter([("greeting".to_string(), json!("hello {{name}}"))]);
        let ctx = NodeOutput::data(Map::from_iter([("name".to_string(), json!("world"))]));
        let rendered = renderer.render_form(&form, &ctx).unwrap();
        assert_eq!(rendered["greeting"], "hello world");
    }

    #[test]
    fn unresolved_variables_render_empty_rather_than_failing() {
        let renderer = TemplateRenderer::new();
        let form = Map::from_iter([("greeting".to_string(), json!("hello {{missing}}"))]);
        let ctx = NodeOutput::data(Map::new());
        let rendered = renderer.render_form(&form, &ctx).unwrap();
        assert_eq!(rendered["greeting"], "hello ");
    }

    #[test]
    fn malformed_template_is_a_template_error() {
        let renderer = TemplateRenderer::new();
        let form = Map::from_iter([("bad".to_string(), json!("{{#if}}"))]);
        let ctx = NodeOutput::data(Map::new());
        assert!(renderer.render_form(&form, &ctx).is_err());
    }

    #[test]
    fn nested_objects_are_rendered_recursively() {
        let renderer = TemplateRenderer::new();
        let form = Map::from_iter([(
            "nested".to_string(),
            json!({"a": "{{x}}", "b": ["{{y}}", "literal"]}),
        )]);
        let ctx = NodeOutput::data(Map::from_iter([
            ("x".to_string(), json!("1")),
            ("y".to_string(), json!("2")),
        ]));
        let rendered = renderer.render_form(&form, &ctx).unwrap();
        assert_eq!(rendered["nested"]["a"], "1");
        assert_eq!(rendered["nested"]["b"][0], "2");
        assert_eq!(rendered["nested"]["b"][1], "literal");
    }
}
