//! Picks the winning candidate with a second model.

use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::domain::Candidate;
use crate::error::Result;
use crate::llm::{CompletionRequest, ErrorClass, LlmClient, LlmError};
use crate::loom::context::ModelRole;
use crate::loom::params::GenerationParams;
use crate::loom::retry::{BackoffPolicy, retry_transient};
use crate::prompt::PromptRenderer;

/// Chosen when the grader's reply is unusable
pub const FALLBACK_INDEX: usize = 1;

/// The grader's verdict
#[derive(Debug, Clone, PartialEq)]
pub struct GradeDecision {
    pub chosen_index: usize,
    /// True when the reply was missing or unusable
    pub fallback: bool,
    /// Raw model reply, if a call was made
    pub reply: Option<String>,
}

impl GradeDecision {
    fn chosen(chosen_index: usize, reply: Option<String>) -> Self {
        Self {
            chosen_index,
            fallback: false,
            reply,
        }
    }

    fn fallback(reply: Option<String>) -> Self {
        Self {
            chosen_index: FALLBACK_INDEX,
            fallback: true,
            reply,
        }
    }
}

#[derive(Serialize)]
struct CandidateView<'a> {
    index: usize,
    text: &'a str,
}

#[derive(Serialize)]
struct GradingContext<'a> {
    context: &'a str,
    candidates: Vec<CandidateView<'a>>,
    count: usize,
    choices: String,
}

/// First whole number in the reply that names a candidate (1..=count)
pub fn parse_choice(reply: &str, count: usize) -> Option<usize> {
    let re = Regex::new(r"\b(\d+)\b").ok()?;
    re.captures_iter(reply)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<usize>().ok())
        .find(|choice| (1..=count).contains(choice))
}

pub struct Grader {
    client: Arc<dyn LlmClient>,
    policy: BackoffPolicy,
    renderer: PromptRenderer,
}

impl Grader {
    pub fn new(client: Arc<dyn LlmClient>, policy: BackoffPolicy) -> Self {
        Self {
            client,
            policy,
            renderer: PromptRenderer::new(),
        }
    }

    /// Render the grading prompt over the trimmed document
    pub fn build_prompt(&self, document_text: &str, candidates: &[Candidate], params: &GenerationParams) -> Result<String> {
        let context = params.context_window().trim_for(ModelRole::Grading, document_text);
        let choices = (1..=candidates.len()).map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
        let view = GradingContext {
            context,
            candidates: candidates
                .iter()
                .map(|c| CandidateView {
                    index: c.index,
                    text: c.final_text(),
                })
                .collect(),
            count: candidates.len(),
            choices,
        };
        self.renderer.render_with(&params.grading_template, &view)
    }

    /// Choose one of `candidates`.
    ///
    /// Only fatal errors and cancellation escape; everything else falls back
    /// to [`FALLBACK_INDEX`].
    pub async fn grade(
        &self,
        document_text: &str,
        candidates: &[Candidate],
        params: &GenerationParams,
        cancel: &CancellationToken,
    ) -> std::result::Result<GradeDecision, LlmError> {
        if candidates.len() <= 1 {
            let only = candidates.first().map(|c| c.index).unwrap_or(FALLBACK_INDEX);
            return Ok(GradeDecision::chosen(only, None));
        }

        let prompt = match self.build_prompt(document_text, candidates, params) {
            Ok(prompt) => prompt,
            Err(e) => {
                log::warn!("Grading prompt failed, using candidate {}: {}", FALLBACK_INDEX, e);
                return Ok(GradeDecision::fallback(None));
            }
        };

        let request = CompletionRequest::new(&params.grading_model, prompt);
        let client = self.client.as_ref();
        let reply = retry_transient(&self.policy, cancel, "grading", |_| client.complete(&request)).await;

        match reply {
            Ok(reply) => match parse_choice(&reply, candidates.len()) {
                Some(choice) => {
                    log::debug!("Grader chose {}", choice);
                    Ok(GradeDecision::chosen(choice, Some(reply)))
                }
                None => {
                    log::warn!(
                        "Unusable grader reply {:?}, using candidate {}",
                        reply.trim(),
                        FALLBACK_INDEX
                    );
                    Ok(GradeDecision::fallback(Some(reply)))
                }
            },
            Err(err) if err.class() == ErrorClass::Rejected => {
                log::warn!("Grading request rejected, using candidate {}: {}", FALLBACK_INDEX, err);
                Ok(GradeDecision::fallback(None))
            }
            Err(err) => Err(err),
        }
    }
}
