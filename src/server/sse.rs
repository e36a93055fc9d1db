//! `GET /generate`: run the loop and stream its events as Server-Sent Events.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::{Document, ErrorKind, LoomEvent};
use crate::loom::{EventSink, GenerationParams, LoopController};
use crate::server::error::HttpError;
use crate::server::state::AppState;
use crate::storage::validate_name;

/// Query parameters accepted by `/generate`. Absent values use the config.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct GenerateQuery {
    pub seed: Option<String>,
    pub document: Option<String>,
    pub candidates: Option<usize>,
    pub max_new_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub min_p: Option<f32>,
    pub base_model: Option<String>,
    pub grader_model: Option<String>,
    pub iterations: Option<u32>,
}

impl GenerateQuery {
    /// Overlay the query on `params`
    pub fn apply(&self, mut params: GenerationParams) -> GenerationParams {
        if let Some(candidates) = self.candidates {
            params.candidate_count = candidates;
        }
        if let Some(max_tokens) = self.max_new_tokens {
            params.max_tokens = max_tokens;
        }
        if let Some(temperature) = self.temperature {
            params.temperature = temperature;
        }
        if let Some(min_p) = self.min_p {
            params.min_p = min_p;
        }
        if let Some(model) = non_empty(&self.base_model) {
            params.generation_model = model;
        }
        if let Some(model) = non_empty(&self.grader_model) {
            params.grading_model = model;
        }
        if self.iterations.is_some() {
            params.max_iterations = self.iterations;
        }
        params
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.trim().is_empty()).cloned()
}

/// SSE endpoint handler.
pub async fn generate_handler(
    State(state): State<AppState>,
    Query(query): Query<GenerateQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, HttpError> {
    let config = state.config();
    let params = query.apply(config.generation_params());
    params.validate()?;
    if let Err(e) = state.save_models(query.base_model.as_deref(), query.grader_model.as_deref()) {
        warn!(error = %e, "could not save model choice");
    }

    let seed = non_empty(&query.seed).unwrap_or_else(|| config.server.default_seed.clone());
    let document = match non_empty(&query.document) {
        Some(name) => {
            validate_name(&name)?;
            Document::new(name, seed)
        }
        None => Document::untitled(seed),
    };

    let (run_id, cancel) = state.begin_run();
    let (sink, mut rx) = EventSink::channel(config.server.event_buffer, cancel.clone());
    info!(run_id, document = %document.name, candidates = params.candidate_count, "generation started");

    let run_state = state.clone();
    tokio::spawn(async move {
        match run_state.client() {
            Ok(client) => {
                let mut controller = LoopController::new(client)
                    .with_policy(config.backoff_policy())
                    .with_store(run_state.store.clone())
                    .with_iteration_pause(config.server.iteration_pause());
                match controller.run(document, params, sink, cancel).await {
                    Ok(report) => info!(
                        run_id,
                        state = %report.state,
                        iterations = report.iterations,
                        "generation finished"
                    ),
                    Err(e) => warn!(run_id, error = %e, "generation failed"),
                }
            }
            Err(err) => {
                warn!(run_id, error = %err, "no usable model client");
                sink.emit(LoomEvent::Init { text: document.text }).await;
                sink.emit(LoomEvent::Error {
                    message: err.to_string(),
                    kind: ErrorKind::Auth,
                })
                .await;
            }
        }
        run_state.finish_run(run_id);
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield Ok(Event::default().data(event.to_json()));
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping")))
}
