//! The generation loop: fan out, grade, append, repeat.
//!
//! One controller drives one run. It owns the document for the duration of
//! the run and reports every step through the [`EventSink`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::domain::{Document, ErrorKind, LoomEvent, RunState};
use crate::error::Result;
use crate::llm::{LlmClient, LlmError};
use crate::loom::context::ModelRole;
use crate::loom::fanout::FanOut;
use crate::loom::grader::Grader;
use crate::loom::namer::{NamingAdvisor, should_name};
use crate::loom::params::GenerationParams;
use crate::loom::retry::BackoffPolicy;
use crate::loom::sink::EventSink;
use crate::storage::DocumentStore;

/// Why a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Stop requested or client went away
    Cancelled,
    /// `max_iterations` reached
    IterationLimit,
    /// Upstream refused credentials
    Fatal(String),
    /// Too many consecutive empty iterations
    Degenerate,
}

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: RunState,
    pub reason: StopReason,
    /// Completed iterations
    pub iterations: u32,
    pub document: Document,
}

enum Step {
    Continue,
    Stop(StopReason),
}

pub struct LoopController {
    client: Arc<dyn LlmClient>,
    policy: BackoffPolicy,
    store: Option<Arc<dyn DocumentStore>>,
    iteration_pause: Duration,
    state: RunState,
}

impl LoopController {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self {
            client,
            policy: BackoffPolicy::default(),
            store: None,
            iteration_pause: Duration::ZERO,
            state: RunState::Idle,
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Persist the document after every change
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Wait between iterations
    pub fn with_iteration_pause(mut self, pause: Duration) -> Self {
        self.iteration_pause = pause;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Grow `document` until cancelled, limited, or failed.
    ///
    /// Invalid params are rejected before any event is sent.
    pub async fn run(
        &mut self,
        mut document: Document,
        params: GenerationParams,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        params.validate()?;
        self.state.transition(RunState::Running)?;
        log::info!(
            "Run started: document={:?} candidates={} model={} grader={}",
            document.name,
            params.candidate_count,
            params.generation_model,
            params.grading_model
        );

        let mut fanout = FanOut::new(self.client.clone(), self.policy.clone(), params.empty_iteration_limit);
        let grader = Grader::new(self.client.clone(), self.policy.clone());
        let namer = Arc::new(NamingAdvisor::new(
            self.client.clone(),
            self.policy.clone(),
            params.naming_model(),
            params.grading_budget,
        ));
        let mut naming: JoinSet<Option<String>> = JoinSet::new();

        sink.emit(LoomEvent::Init {
            text: document.text.clone(),
        })
        .await;
        self.persist(&document);

        let mut iteration = 0u32;
        let reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if params.max_iterations.is_some_and(|max| iteration >= max) {
                break StopReason::IterationLimit;
            }
            while let Some(joined) = naming.try_join_next() {
                self.adopt_name(joined.ok().flatten(), &mut document, &sink).await;
            }

            iteration += 1;
            let step = self
                .iterate(iteration, &mut document, &mut fanout, &grader, &params, &sink, &cancel)
                .await;
            if let Step::Stop(reason) = step {
                // the iteration did not complete
                iteration -= 1;
                break reason;
            }

            if should_name(iteration, params.naming_interval) {
                let namer = Arc::clone(&namer);
                let token = cancel.child_token();
                let snapshot = document.text.clone();
                naming.spawn(async move { namer.suggest_name(&snapshot, &token).await });
            }

            if params.max_iterations.is_some_and(|max| iteration >= max) {
                break StopReason::IterationLimit;
            }
            if !self.iteration_pause.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.iteration_pause) => {}
                }
            }
        };

        match &reason {
            StopReason::Cancelled => {
                naming.abort_all();
                self.state.transition(RunState::Stopping)?;
                self.state.transition(RunState::Stopped)?;
            }
            StopReason::IterationLimit => {
                self.state.transition(RunState::Stopping)?;
                while let Some(joined) = naming.join_next().await {
                    self.adopt_name(joined.ok().flatten(), &mut document, &sink).await;
                }
                self.state.transition(RunState::Stopped)?;
            }
            StopReason::Fatal(_) | StopReason::Degenerate => {
                naming.abort_all();
                self.state.transition(RunState::Errored)?;
            }
        }

        log::info!(
            "Run finished: state={} reason={:?} iterations={} chars={}",
            self.state,
            reason,
            iteration,
            document.text.chars().count()
        );

        Ok(RunReport {
            state: self.state,
            reason,
            iterations: iteration,
            document,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn iterate(
        &self,
        iteration: u32,
        document: &mut Document,
        fanout: &mut FanOut,
        grader: &Grader,
        params: &GenerationParams,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Step {
        let prompt = params
            .context_window()
            .trim_for(ModelRole::Generation, &document.text)
            .to_string();

        log::debug!("Iteration {} starting ({} prompt chars)", iteration, prompt.len());
        sink.emit(LoomEvent::IterationStart { iteration }).await;

        let result = match fanout.run_iteration(&prompt, params, sink, cancel).await {
            Ok(result) => result,
            Err(err) => return Step::Stop(self.upstream_failure(err, sink).await),
        };

        if result.degenerate {
            let message = format!(
                "Stopping: {} consecutive iterations produced only empty completions",
                result.empty_streak
            );
            log::warn!("{}", message);
            sink.emit(LoomEvent::Error {
                message,
                kind: ErrorKind::Degenerate,
            })
            .await;
            return Step::Stop(StopReason::Degenerate);
        }

        sink.emit(LoomEvent::GradingStart).await;
        let decision = match grader.grade(&document.text, &result.candidates, params, cancel).await {
            Ok(decision) => decision,
            Err(err) => return Step::Stop(self.upstream_failure(err, sink).await),
        };

        let chosen_text = result
            .candidates
            .iter()
            .find(|c| c.index == decision.chosen_index)
            .map(|c| c.final_text().to_string())
            .unwrap_or_default();
        sink.emit(LoomEvent::GradingDone {
            chosen_index: decision.chosen_index,
            chosen_text: chosen_text.clone(),
        })
        .await;

        document.append(&chosen_text);
        self.persist(document);
        sink.emit(LoomEvent::TextUpdated {
            full_text: document.text.clone(),
        })
        .await;

        Step::Continue
    }

    /// Turn an escaped model error into a stop reason, reporting fatal ones
    async fn upstream_failure(&self, err: LlmError, sink: &EventSink) -> StopReason {
        if err.is_cancelled() {
            return StopReason::Cancelled;
        }

        let message = err.to_string();
        log::error!("Run aborted: {}", message);
        sink.emit(LoomEvent::Error {
            message: message.clone(),
            kind: ErrorKind::Auth,
        })
        .await;
        StopReason::Fatal(message)
    }

    /// Rename the document, then announce it. A name the store refuses is
    /// dropped without an event.
    async fn adopt_name(&self, name: Option<String>, document: &mut Document, sink: &EventSink) {
        let Some(name) = name else {
            return;
        };
        if name == document.name {
            return;
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.rename(&document.name, &name) {
                log::warn!("Keeping name {:?}, rename to {:?} failed: {}", document.name, name, e);
                return;
            }
        }
        document.rename(name.clone());
        sink.emit(LoomEvent::DocumentNamed { name }).await;
    }

    fn persist(&self, document: &Document) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&document.name, &document.text) {
                log::warn!("Failed to save document {:?}: {}", document.name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoomError;
    use crate::llm::{MockLlmClient, MockReply};

    fn controller(mock: &Arc<MockLlmClient>) -> LoopController {
        LoopController::new(mock.clone()).with_policy(BackoffPolicy::default().without_jitter())
    }

    #[tokio::test]
    async fn test_invalid_params_emit_nothing() {
        let mock = Arc::new(MockLlmClient::new());
        let mut controller = controller(&mock);
        let cancel = CancellationToken::new();
        let (sink, mut rx) = EventSink::channel(16, cancel.clone());
        let params = GenerationParams {
            candidate_count: 0,
            ..Default::default()
        };

        let err = controller
            .run(Document::new("doc", "seed"), params, sink, cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, LoomError::InvalidParams(_)));
        assert_eq!(controller.state(), RunState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_controller_runs_once() {
        let mock = Arc::new(MockLlmClient::new().with_stream_default(MockReply::text("X")));
        let mut controller = controller(&mock);
        let params = GenerationParams {
            candidate_count: 1,
            max_iterations: Some(1),
            naming_interval: 0,
            ..Default::default()
        };

        let cancel = CancellationToken::new();
        let (sink, _rx) = EventSink::channel(64, cancel.clone());
        let report = controller
            .run(Document::new("doc", "seed"), params.clone(), sink, cancel)
            .await
            .unwrap();
        assert_eq!(report.document.text, "seedX");

        let cancel = CancellationToken::new();
        let (sink, _rx) = EventSink::channel(64, cancel.clone());
        let err = controller
            .run(Document::new("doc", "seed"), params, sink, cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, LoomError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_zero_iteration_limit() {
        let mock = Arc::new(MockLlmClient::new());
        let mut controller = controller(&mock);
        let cancel = CancellationToken::new();
        let (sink, mut rx) = EventSink::channel(16, cancel.clone());
        let params = GenerationParams {
            max_iterations: Some(0),
            ..Default::default()
        };

        let report = controller
            .run(Document::new("doc", "seed"), params, sink, cancel)
            .await
            .unwrap();

        assert_eq!(report.reason, StopReason::IterationLimit);
        assert_eq!(report.iterations, 0);
        assert_eq!(
            rx.try_recv().unwrap(),
            LoomEvent::Init {
                text: "seed".to_string()
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
