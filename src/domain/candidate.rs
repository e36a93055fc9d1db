//! Candidate continuations competing within one iteration

use serde::{Deserialize, Serialize};

/// Lifecycle of a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    /// Request not yet answered
    Pending,
    /// Tokens are arriving
    Streaming,
    /// Finished; terminal text is final (may be empty)
    Done,
    /// Gave up; terminal text is empty
    Failed,
}

impl CandidateStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CandidateStatus::Done | CandidateStatus::Failed)
    }
}

/// One completion attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// 1-based position, stable for the iteration
    pub index: usize,
    partial: String,
    status: CandidateStatus,
    failure: Option<String>,
}

impl Candidate {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            partial: String::new(),
            status: CandidateStatus::Pending,
            failure: None,
        }
    }

    /// A candidate that never produced text
    pub fn failed(index: usize, reason: impl Into<String>) -> Self {
        let mut candidate = Self::new(index);
        candidate.fail(reason);
        candidate
    }

    /// Append a streamed delta. Ignored once the candidate is terminal.
    pub fn push_token(&mut self, delta: &str) {
        if self.status.is_terminal() {
            return;
        }
        self.status = CandidateStatus::Streaming;
        self.partial.push_str(delta);
    }

    pub fn finish(&mut self) {
        if !self.status.is_terminal() {
            self.status = CandidateStatus::Done;
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.status.is_terminal() {
            self.status = CandidateStatus::Failed;
            self.failure = Some(reason.into());
        }
    }

    pub fn status(&self) -> CandidateStatus {
        self.status
    }

    /// Text accumulated so far
    pub fn partial_text(&self) -> &str {
        &self.partial
    }

    /// Text that downstream stages see. Empty unless the candidate is done.
    pub fn final_text(&self) -> &str {
        match self.status {
            CandidateStatus::Done => &self.partial,
            _ => "",
        }
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Empty or whitespace-only terminal text
    pub fn is_blank(&self) -> bool {
        self.final_text().trim().is_empty()
    }
}
