//! Prompt Renderer - Render templates with context variables using Handlebars

use handlebars::{Handlebars, Template};
use serde::Serialize;

use crate::error::{LoomError, Result};

/// Renders prompt templates using Handlebars templating
pub struct PromptRenderer {
    handlebars: Handlebars<'static>,
}

impl Default for PromptRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRenderer {
    /// Create a new PromptRenderer with default settings
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        // Missing variables render as empty strings
        handlebars.set_strict_mode(false);
        // Document text goes to the model verbatim
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    /// Render a template string with any serializable context
    pub fn render_with<T: Serialize>(&self, template: &str, context: &T) -> Result<String> {
        self.handlebars
            .render_template(template, context)
            .map_err(|e| LoomError::Template(format!("Failed to render template: {}", e)))
    }

    /// Check that a template compiles without rendering it
    pub fn validate(template: &str) -> Result<()> {
        Template::compile(template)
            .map(|_| ())
            .map_err(|e| LoomError::Template(format!("Invalid template: {}", e)))
    }
}

impl std::fmt::Debug for PromptRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptRenderer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_with_serializable() {
        #[derive(Serialize)]
        struct Context {
            name: String,
            count: i32,
        }

        let renderer = PromptRenderer::new();
        let context = Context {
            name: "Bob".to_string(),
            count: 5,
        };

        let result = renderer.render_with("{{name}} has {{count}} items", &context).unwrap();
        assert_eq!(result, "Bob has 5 items");
    }

    #[test]
    fn test_render_missing_variable_empty_string() {
        let renderer = PromptRenderer::new();
        let result = renderer.render_with("Hello, {{name}}!", &json!({})).unwrap();
        assert_eq!(result, "Hello, !");
    }

    #[test]
    fn test_render_no_escape_html() {
        let renderer = PromptRenderer::new();
        let context = json!({ "text": "\"quoted\" <b>&</b>" });

        let result = renderer.render_with("{{text}}", &context).unwrap();
        assert_eq!(result, "\"quoted\" <b>&</b>");
    }

    #[test]
    fn test_render_each_block() {
        let renderer = PromptRenderer::new();
        let context = json!({ "items": [{ "index": 1, "text": "a" }, { "index": 2, "text": "b" }] });

        let result = renderer
            .render_with("{{#each items}}{{index}}. {{text}}\n{{/each}}", &context)
            .unwrap();
        assert_eq!(result, "1. a\n2. b\n");
    }

    #[test]
    fn test_render_preserves_whitespace() {
        let renderer = PromptRenderer::new();
        let result = renderer.render_with("Line 1\n\nLine 3\n\n\nLine 6", &json!({})).unwrap();
        assert_eq!(result, "Line 1\n\nLine 3\n\n\nLine 6");
    }

    #[test]
    fn test_validate() {
        assert!(PromptRenderer::validate("{{context}} pick one of {{choices}}").is_ok());
        assert!(PromptRenderer::validate("{{#each candidates}}unclosed").is_err());
    }
}
