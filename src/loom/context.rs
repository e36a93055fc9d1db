//! Context-window bookkeeping.
//!
//! Token counts are estimated, not tokenized: one token per four characters,
//! rounded up. Trimming keeps the most recent text.

use serde::{Deserialize, Serialize};

/// Characters assumed per token
pub const CHARS_PER_TOKEN: usize = 4;

pub const DEFAULT_GENERATION_BUDGET: usize = 8000;
pub const DEFAULT_GRADING_BUDGET: usize = 4000;

/// Estimated token count of `text`
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Longest suffix of `text` whose estimate fits in `budget_tokens`.
///
/// Cuts on character boundaries. A zero budget yields the empty string.
pub fn trim(text: &str, budget_tokens: usize) -> &str {
    let max_chars = budget_tokens.saturating_mul(CHARS_PER_TOKEN);
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }

    match text.char_indices().nth(total - max_chars) {
        Some((offset, _)) => &text[offset..],
        None => "",
    }
}

/// Which model a prompt is being prepared for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    Generation,
    Grading,
}

/// Per-role token budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextWindow {
    pub generation_budget: usize,
    pub grading_budget: usize,
}

impl Default for ContextWindow {
    fn default() -> Self {
        Self {
            generation_budget: DEFAULT_GENERATION_BUDGET,
            grading_budget: DEFAULT_GRADING_BUDGET,
        }
    }
}

impl ContextWindow {
    pub fn new(generation_budget: usize, grading_budget: usize) -> Self {
        Self {
            generation_budget,
            grading_budget,
        }
    }

    pub fn budget(&self, role: ModelRole) -> usize {
        match role {
            ModelRole::Generation => self.generation_budget,
            ModelRole::Grading => self.grading_budget,
        }
    }

    /// Trim `text` to the budget of `role`
    pub fn trim_for<'a>(&self, role: ModelRole, text: &'a str) -> &'a str {
        trim(text, self.budget(role))
    }
}
