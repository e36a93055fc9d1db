//! Scripted in-memory client for tests and offline runs.
//!
//! Replies are taken from per-kind queues first, then from per-model
//! overrides, then from a default. Every call is recorded with the tokio
//! clock so tests can inspect retry spacing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use tokio::time::Instant;

use crate::llm::client::{CompletionRequest, LlmClient, LlmError, TokenStream};

/// One scripted reply
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    /// Streamed as a single chunk, or returned whole by `complete`
    Text(String),
    /// Streamed chunk by chunk, or concatenated by `complete`
    Tokens(Vec<String>),
    /// Fail with this HTTP status
    Status(u16),
    /// Stream these chunks, then fail with this HTTP status
    Interrupted(Vec<String>, u16),
    /// Wait, then reply
    Delayed(Duration, Box<MockReply>),
    /// Never resolve
    Hang,
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        MockReply::Text(text.into())
    }

    pub fn tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MockReply::Tokens(tokens.into_iter().map(Into::into).collect())
    }

    pub fn delayed(delay: Duration, reply: MockReply) -> Self {
        MockReply::Delayed(delay, Box::new(reply))
    }
}

/// Which capability a recorded call used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Complete,
    Stream,
}

/// A recorded call
#[derive(Debug, Clone)]
pub struct MockCall {
    pub kind: CallKind,
    pub request: CompletionRequest,
    pub at: Instant,
}

#[derive(Debug)]
struct Script {
    stream_queue: VecDeque<MockReply>,
    complete_queue: VecDeque<MockReply>,
    model_replies: HashMap<String, MockReply>,
    calls: Vec<MockCall>,
}

/// Scripted client implementing [`LlmClient`]
#[derive(Debug)]
pub struct MockLlmClient {
    script: Mutex<Script>,
    stream_default: MockReply,
    complete_default: MockReply,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    /// Streams nothing and grades every round with "1"
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                stream_queue: VecDeque::new(),
                complete_queue: VecDeque::new(),
                model_replies: HashMap::new(),
                calls: Vec::new(),
            }),
            stream_default: MockReply::Tokens(Vec::new()),
            complete_default: MockReply::text("1"),
        }
    }

    pub fn with_stream_default(mut self, reply: MockReply) -> Self {
        self.stream_default = reply;
        self
    }

    pub fn with_complete_default(mut self, reply: MockReply) -> Self {
        self.complete_default = reply;
        self
    }

    /// Reply used for `complete` calls addressed to `model` once the queue is empty
    pub fn with_model_reply(self, model: impl Into<String>, reply: MockReply) -> Self {
        self.lock().model_replies.insert(model.into(), reply);
        self
    }

    pub fn push_stream(&self, reply: MockReply) {
        self.lock().stream_queue.push_back(reply);
    }

    pub fn push_complete(&self, reply: MockReply) {
        self.lock().complete_queue.push_back(reply);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn calls_of(&self, kind: CallKind) -> Vec<MockCall> {
        self.lock().calls.iter().filter(|c| c.kind == kind).cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_reply(&self, kind: CallKind, request: &CompletionRequest) -> MockReply {
        let mut script = self.lock();
        script.calls.push(MockCall {
            kind,
            request: request.clone(),
            at: Instant::now(),
        });
        match kind {
            CallKind::Stream => script
                .stream_queue
                .pop_front()
                .unwrap_or_else(|| self.stream_default.clone()),
            CallKind::Complete => script
                .complete_queue
                .pop_front()
                .or_else(|| script.model_replies.get(&request.model).cloned())
                .unwrap_or_else(|| self.complete_default.clone()),
        }
    }
}

fn status_error(status: u16) -> LlmError {
    if status == 429 {
        LlmError::RateLimited {
            retry_after: Duration::ZERO,
        }
    } else {
        LlmError::ApiError {
            status,
            message: format!("mock status {}", status),
        }
    }
}

/// Resolve delays and hangs into the chunks to deliver and an optional trailing failure
async fn settle(mut reply: MockReply) -> Result<(Vec<String>, Option<u16>), LlmError> {
    loop {
        match reply {
            MockReply::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                reply = *inner;
            }
            MockReply::Hang => std::future::pending::<()>().await,
            MockReply::Status(status) => return Err(status_error(status)),
            MockReply::Interrupted(tokens, status) => return Ok((tokens, Some(status))),
            MockReply::Text(text) => return Ok((vec![text], None)),
            MockReply::Tokens(tokens) => return Ok((tokens, None)),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let reply = self.next_reply(CallKind::Complete, request);
        match settle(reply).await? {
            (_, Some(status)) => Err(status_error(status)),
            (tokens, None) => Ok(tokens.concat()),
        }
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<TokenStream, LlmError> {
        let reply = self.next_reply(CallKind::Stream, request);
        let (tokens, failure) = settle(reply).await?;
        let items = tokens
            .into_iter()
            .map(Ok)
            .chain(failure.map(|status| Err(status_error(status))));
        Ok(Box::pin(stream::iter(items)))
    }
}
