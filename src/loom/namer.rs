//! Suggests a short title for the document.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::llm::{CompletionRequest, LlmClient};
use crate::loom::context::trim;
use crate::loom::retry::{BackoffPolicy, retry_transient};
use crate::prompt::{NAMING_TEMPLATE, PromptRenderer};

pub const NAME_MAX_TOKENS: u32 = 20;
pub const MAX_NAME_CHARS: usize = 50;
pub const UNTITLED: &str = "Untitled";

/// True on every `interval`-th iteration. An interval of 0 never names.
pub fn should_name(iteration: u32, interval: u32) -> bool {
    interval != 0 && iteration != 0 && iteration % interval == 0
}

/// Reduce a model reply to a usable name
pub fn clean_name(raw: &str) -> String {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    let unquoted = line
        .trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace())
        .replace(['/', '\\'], " ");
    let name: String = unquoted.trim().chars().take(MAX_NAME_CHARS).collect();
    let name = name.trim_end();

    if name.is_empty() || name.chars().all(|c| c == '.') {
        UNTITLED.to_string()
    } else {
        name.to_string()
    }
}

pub struct NamingAdvisor {
    client: Arc<dyn LlmClient>,
    policy: BackoffPolicy,
    renderer: PromptRenderer,
    model: String,
    budget: usize,
}

impl NamingAdvisor {
    pub fn new(client: Arc<dyn LlmClient>, policy: BackoffPolicy, model: impl Into<String>, budget: usize) -> Self {
        Self {
            client,
            policy,
            renderer: PromptRenderer::new(),
            model: model.into(),
            budget,
        }
    }

    /// Ask for a name. Failures are logged and yield `None`.
    pub async fn suggest_name(&self, text: &str, cancel: &CancellationToken) -> Option<String> {
        let content = trim(text, self.budget);
        let prompt = match self.renderer.render_with(NAMING_TEMPLATE, &json!({ "content": content })) {
            Ok(prompt) => prompt,
            Err(e) => {
                log::warn!("Naming prompt failed: {}", e);
                return None;
            }
        };

        let request = CompletionRequest::new(&self.model, prompt).with_max_tokens(NAME_MAX_TOKENS);
        let client = self.client.as_ref();
        match retry_transient(&self.policy, cancel, "naming", |_| client.complete(&request)).await {
            Ok(reply) => {
                let name = clean_name(&reply);
                log::info!("Suggested document name: {}", name);
                Some(name)
            }
            Err(err) if err.is_cancelled() => None,
            Err(err) => {
                log::warn!("Document naming failed: {}", err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CallKind, MockLlmClient, MockReply};

    #[test]
    fn test_should_name() {
        assert!(!should_name(1, 3));
        assert!(!should_name(2, 3));
        assert!(should_name(3, 3));
        assert!(should_name(6, 3));
        assert!(!should_name(3, 0));
        assert!(!should_name(0, 3));
        assert!(should_name(1, 1));
    }

    #[test]
    fn test_clean_name() {
        assert_eq!(clean_name("\"Lighthouse Mystery\""), "Lighthouse Mystery");
        assert_eq!(clean_name("  'Ocean Storm Night'  \n"), "Ocean Storm Night");
        assert_eq!(clean_name("\n\nAncient Forest\nextra words"), "Ancient Forest");
        assert_eq!(clean_name(""), UNTITLED);
        assert_eq!(clean_name("\"\""), UNTITLED);
        assert_eq!(clean_name(".."), UNTITLED);
        assert_eq!(clean_name("Night/Day"), "Night Day");
    }

    #[test]
    fn test_clean_name_truncates() {
        let long = "word ".repeat(30);
        let name = clean_name(&long);
        assert!(name.chars().count() <= MAX_NAME_CHARS);
        assert!(!name.ends_with(' '));
    }

    #[tokio::test]
    async fn test_suggest_name() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_complete(MockReply::text("\"Lighthouse Mystery\""));
        let advisor = NamingAdvisor::new(mock.clone(), BackoffPolicy::default(), "namer", 1);

        let name = advisor
            .suggest_name("The lighthouse keeper vanished.", &CancellationToken::new())
            .await;

        assert_eq!(name.as_deref(), Some("Lighthouse Mystery"));
        let calls = mock.calls_of(CallKind::Complete);
        assert_eq!(calls[0].request.model, "namer");
        assert_eq!(calls[0].request.max_tokens, Some(NAME_MAX_TOKENS));
        assert!(calls[0].request.prompt.contains("hed."));
        assert!(!calls[0].request.prompt.contains("lighthouse keeper"));
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_complete(MockReply::Status(401));
        let advisor = NamingAdvisor::new(mock, BackoffPolicy::default(), "namer", 100);

        assert_eq!(advisor.suggest_name("text", &CancellationToken::new()).await, None);
    }
}
