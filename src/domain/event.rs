//! Events streamed to the client during a run.

use serde::{Deserialize, Serialize};

/// Why an `error` event was emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credentials or billing rejected by the provider; the run is over
    Auth,
    /// Too many consecutive empty iterations; the run is over
    Degenerate,
    /// One candidate failed; the run continues
    Candidate,
}

impl ErrorKind {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ErrorKind::Candidate)
    }
}

/// One event on the run's channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoomEvent {
    /// Run started, echoes the seed
    Init { text: String },
    IterationStart { iteration: u32 },
    CompletionStart { index: usize },
    /// Cumulative text of candidate `index` so far
    CompletionToken { index: usize, full_text: String },
    CompletionDone { index: usize, text: String },
    GradingStart,
    GradingDone { chosen_index: usize, chosen_text: String },
    /// Whole document after the append
    TextUpdated { full_text: String },
    DocumentNamed { name: String },
    Error { message: String, kind: ErrorKind },
}

impl LoomEvent {
    /// Wire name of the event (the `type` field)
    pub fn event_type(&self) -> &'static str {
        match self {
            LoomEvent::Init { .. } => "init",
            LoomEvent::IterationStart { .. } => "iteration_start",
            LoomEvent::CompletionStart { .. } => "completion_start",
            LoomEvent::CompletionToken { .. } => "completion_token",
            LoomEvent::CompletionDone { .. } => "completion_done",
            LoomEvent::GradingStart => "grading_start",
            LoomEvent::GradingDone { .. } => "grading_done",
            LoomEvent::TextUpdated { .. } => "text_updated",
            LoomEvent::DocumentNamed { .. } => "document_named",
            LoomEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal_error(&self) -> bool {
        matches!(self, LoomEvent::Error { kind, .. } if kind.is_terminal())
    }

    pub fn to_json(&self) -> String {
        // Every variant serializes to a plain object
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"type\":\"{}\"}}", self.event_type()))
    }
}
