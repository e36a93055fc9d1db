//! Built-in prompt templates.

/// Grading prompt.
///
/// Variables: `context` (trimmed document), `candidates` (list of `{index, text}`),
/// `count` (number of candidates), `choices` (e.g. `1, 2, 3, 4, 5`).
pub const DEFAULT_GRADING_TEMPLATE: &str = "{{context}}

{{#each candidates}}{{index}}. {{text}}

{{/each}}

Which of the following {{count}} completions of the given text is more interesting? Reply with only a single number - {{choices}}. Pick whichever completion is the most weird, surprising, or interesting. You're looking for the most *interesting* one.";

/// Naming prompt. Variables: `content` (trimmed document).
pub const NAMING_TEMPLATE: &str = "Based on this text content, generate a short, descriptive document name that is 2-4 words long. The name should capture the main theme, setting, or key elements of the story.

Text content:
{{content}}

Respond with ONLY the document name, nothing else. Example formats:
- \"Lighthouse Mystery\"
- \"Ocean Storm Night\"
- \"Ancient Forest Discovery\"

Document name:";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::PromptRenderer;

    #[test]
    fn test_builtin_templates_compile() {
        assert!(PromptRenderer::validate(DEFAULT_GRADING_TEMPLATE).is_ok());
        assert!(PromptRenderer::validate(NAMING_TEMPLATE).is_ok());
    }
}
