//! One streamed candidate, with retries.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::domain::{Candidate, ErrorKind, LoomEvent};
use crate::llm::{CompletionRequest, ErrorClass, LlmClient, LlmError};
use crate::loom::retry::{BackoffPolicy, retry_transient};
use crate::loom::sink::EventSink;

/// Streams a single candidate and reports its progress as events.
pub struct CompletionRequester {
    client: Arc<dyn LlmClient>,
    policy: BackoffPolicy,
}

impl CompletionRequester {
    pub fn new(client: Arc<dyn LlmClient>, policy: BackoffPolicy) -> Self {
        Self { client, policy }
    }

    /// Produce candidate `index`.
    ///
    /// Transient failures restart the stream from empty; each restart sends
    /// `completion_start` again so the client drops the partial text it holds.
    /// A rejected request yields a failed candidate; fatal errors and
    /// cancellation are returned.
    pub async fn request(
        &self,
        index: usize,
        request: &CompletionRequest,
        sink: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<Candidate, LlmError> {
        sink.emit(LoomEvent::CompletionStart { index }).await;

        let label = format!("candidate {}", index);
        let client = self.client.as_ref();
        let outcome = retry_transient(&self.policy, cancel, &label, move |attempt| {
            stream_candidate(client, request, index, sink, attempt)
        })
        .await;

        match outcome {
            Ok(candidate) => {
                log::debug!(
                    "Candidate {} done ({} chars)",
                    index,
                    candidate.final_text().chars().count()
                );
                sink.emit(LoomEvent::CompletionDone {
                    index,
                    text: candidate.final_text().to_string(),
                })
                .await;
                Ok(candidate)
            }
            Err(err) if err.class() == ErrorClass::Rejected => {
                log::warn!("Candidate {} rejected: {}", index, err);
                sink.emit(LoomEvent::Error {
                    message: format!("Completion {} failed: {}", index, err),
                    kind: ErrorKind::Candidate,
                })
                .await;
                sink.emit(LoomEvent::CompletionDone {
                    index,
                    text: String::new(),
                })
                .await;
                Ok(Candidate::failed(index, err.to_string()))
            }
            Err(err) => Err(err),
        }
    }
}

/// One attempt: accumulate deltas, emitting the cumulative text after each
async fn stream_candidate(
    client: &dyn LlmClient,
    request: &CompletionRequest,
    index: usize,
    sink: &EventSink,
    attempt: u32,
) -> Result<Candidate, LlmError> {
    if attempt > 0 {
        sink.emit(LoomEvent::CompletionStart { index }).await;
    }
    let mut candidate = Candidate::new(index);
    let mut stream = client.complete_stream(request).await?;

    while let Some(chunk) = stream.next().await {
        let delta = chunk?;
        if delta.is_empty() {
            continue;
        }
        candidate.push_token(&delta);
        sink.emit(LoomEvent::CompletionToken {
            index,
            full_text: candidate.partial_text().to_string(),
        })
        .await;
    }

    candidate.finish();
    Ok(candidate)
}
