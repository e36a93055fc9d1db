//! Concurrent fan-out of candidate requests for one iteration.

use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use crate::domain::Candidate;
use crate::llm::{LlmClient, LlmError};
use crate::loom::params::GenerationParams;
use crate::loom::requester::CompletionRequester;
use crate::loom::retry::BackoffPolicy;
use crate::loom::sink::EventSink;

/// Counts consecutive iterations in which every candidate came back blank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmptyStreak {
    consecutive: u32,
    limit: u32,
}

impl EmptyStreak {
    pub fn new(limit: u32) -> Self {
        Self { consecutive: 0, limit }
    }

    /// Record an iteration's candidates. Returns true once the limit is reached.
    pub fn record(&mut self, candidates: &[Candidate]) -> bool {
        if candidates.iter().all(Candidate::is_blank) {
            self.consecutive = self.consecutive.saturating_add(1);
        } else {
            self.consecutive = 0;
        }
        self.is_tripped()
    }

    pub fn count(&self) -> u32 {
        self.consecutive
    }

    pub fn is_tripped(&self) -> bool {
        self.consecutive >= self.limit
    }
}

/// Outcome of one fan-out round
#[derive(Debug, Clone)]
pub struct IterationResult {
    /// One terminal candidate per index, in index order
    pub candidates: Vec<Candidate>,
    pub empty_streak: u32,
    /// The run should stop
    pub degenerate: bool,
}

/// Runs `candidate_count` requesters side by side and waits for all of them.
pub struct FanOut {
    requester: CompletionRequester,
    streak: EmptyStreak,
}

impl FanOut {
    pub fn new(client: Arc<dyn LlmClient>, policy: BackoffPolicy, empty_iteration_limit: u32) -> Self {
        Self {
            requester: CompletionRequester::new(client, policy),
            streak: EmptyStreak::new(empty_iteration_limit),
        }
    }

    pub fn streak(&self) -> &EmptyStreak {
        &self.streak
    }

    /// One round against `prompt`.
    ///
    /// A fatal error from any requester cancels the round and is returned
    /// once every sibling has settled.
    pub async fn run_iteration(
        &mut self,
        prompt: &str,
        params: &GenerationParams,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<IterationResult, LlmError> {
        let request = params.generation_request(prompt);
        let round = cancel.child_token();
        let requester = &self.requester;

        let tasks = (1..=params.candidate_count).map(|index| {
            let round = round.clone();
            let request = &request;
            async move {
                let result = requester.request(index, request, sink, &round).await;
                if matches!(&result, Err(err) if err.is_fatal()) {
                    round.cancel();
                }
                result
            }
        });
        let results = join_all(tasks).await;

        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }

        let mut candidates = Vec::with_capacity(results.len());
        let mut fatal = None;
        let mut interrupted = false;
        for result in results {
            match result {
                Ok(candidate) => candidates.push(candidate),
                Err(err) if err.is_fatal() => {
                    if fatal.is_none() {
                        fatal = Some(err);
                    }
                }
                Err(err) => {
                    log::debug!("Candidate interrupted: {}", err);
                    interrupted = true;
                }
            }
        }
        if let Some(err) = fatal {
            return Err(err);
        }
        if interrupted {
            return Err(LlmError::Cancelled);
        }

        let degenerate = self.streak.record(&candidates);
        if self.streak.count() > 0 {
            log::info!(
                "All {} candidates empty ({} in a row)",
                candidates.len(),
                self.streak.count()
            );
        }

        Ok(IterationResult {
            candidates,
            empty_streak: self.streak.count(),
            degenerate,
        })
    }
}
