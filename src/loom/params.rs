//! Per-run generation parameters

use serde::{Deserialize, Serialize};

use crate::error::{LoomError, Result};
use crate::llm::CompletionRequest;
use crate::loom::context::{ContextWindow, DEFAULT_GENERATION_BUDGET, DEFAULT_GRADING_BUDGET};
use crate::prompt::{DEFAULT_GRADING_TEMPLATE, PromptRenderer};

pub const DEFAULT_MODEL: &str = "z-ai/glm-4.5-air:free";

/// Upper bound on concurrent candidate streams per iteration
pub const MAX_CANDIDATES: usize = 32;

/// Knobs for one run. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    /// Candidates per iteration
    pub candidate_count: usize,
    /// Token cap per candidate
    pub max_tokens: u32,
    pub temperature: f32,
    pub min_p: f32,
    pub generation_model: String,
    pub grading_model: String,
    /// Falls back to the grading model
    pub naming_model: Option<String>,
    pub grading_template: String,
    pub generation_budget: usize,
    pub grading_budget: usize,
    /// Suggest a name every N iterations, 0 disables
    pub naming_interval: u32,
    /// Consecutive all-empty iterations before the run gives up
    pub empty_iteration_limit: u32,
    /// Unbounded when absent
    pub max_iterations: Option<u32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            candidate_count: 5,
            max_tokens: 128,
            temperature: 1.0,
            min_p: 0.02,
            generation_model: DEFAULT_MODEL.to_string(),
            grading_model: DEFAULT_MODEL.to_string(),
            naming_model: None,
            grading_template: DEFAULT_GRADING_TEMPLATE.to_string(),
            generation_budget: DEFAULT_GENERATION_BUDGET,
            grading_budget: DEFAULT_GRADING_BUDGET,
            naming_interval: 3,
            empty_iteration_limit: 3,
            max_iterations: None,
        }
    }
}

impl GenerationParams {
    pub fn validate(&self) -> Result<()> {
        if self.candidate_count < 1 {
            return Err(invalid("candidate_count must be at least 1"));
        }
        if self.candidate_count > MAX_CANDIDATES {
            return Err(invalid(format!("candidate_count must be at most {}", MAX_CANDIDATES)));
        }
        if self.max_tokens < 1 {
            return Err(invalid("max_tokens must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid(format!(
                "temperature must be between 0 and 2, got {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.min_p) {
            return Err(invalid(format!("min_p must be between 0 and 1, got {}", self.min_p)));
        }
        if self.generation_model.trim().is_empty() {
            return Err(invalid("generation_model must not be empty"));
        }
        if self.grading_model.trim().is_empty() {
            return Err(invalid("grading_model must not be empty"));
        }
        if self.naming_model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(invalid("naming_model must not be empty when set"));
        }
        if self.generation_budget < 1 || self.grading_budget < 1 {
            return Err(invalid("context budgets must be at least 1 token"));
        }
        if self.empty_iteration_limit < 1 {
            return Err(invalid("empty_iteration_limit must be at least 1"));
        }
        PromptRenderer::validate(&self.grading_template)
            .map_err(|e| invalid(format!("grading_template: {}", e)))?;
        Ok(())
    }

    pub fn context_window(&self) -> ContextWindow {
        ContextWindow::new(self.generation_budget, self.grading_budget)
    }

    pub fn naming_model(&self) -> &str {
        self.naming_model.as_deref().unwrap_or(&self.grading_model)
    }

    /// Streaming request for one candidate
    pub fn generation_request(&self, prompt: impl Into<String>) -> CompletionRequest {
        CompletionRequest::new(&self.generation_model, prompt)
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature)
            .with_min_p(self.min_p)
    }
}

fn invalid(msg: impl Into<String>) -> LoomError {
    LoomError::InvalidParams(msg.into())
}
