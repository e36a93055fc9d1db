//! Core LLM client types and trait definitions

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

/// Text deltas produced by a streaming completion, in arrival order.
pub type TokenStream = BoxStream<'static, Result<String, LlmError>>;

/// Stateless model client - each call is independent
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single instruct completion (blocking until complete)
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    /// Raw text completion streamed as deltas.
    ///
    /// Errors may surface either from this call (request could not be sent) or
    /// as an `Err` item inside the stream (bad status, dropped connection).
    async fn complete_stream(&self, request: &CompletionRequest) -> Result<TokenStream, LlmError>;
}

/// A completion request - everything needed for one model call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub min_p: Option<f32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens: None,
            temperature: None,
            min_p: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_min_p(mut self, min_p: f32) -> Self {
        self.min_p = Some(min_p);
        self
    }
}

/// How the retry loop should treat an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Expected to resolve on its own; retry with backoff
    Transient,
    /// Credentials or billing problem; abort the whole run
    Fatal,
    /// This one call is bad; give up on it without retrying
    Rejected,
    /// The run was cancelled while the call was in flight
    Cancelled,
}

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing API key: environment variable {env_var} not set")]
    MissingApiKey { env_var: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl LlmError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LlmError::RateLimited { .. } => ErrorClass::Transient,
            LlmError::ApiError { status, .. } => classify_status(*status),
            LlmError::Network(_) => ErrorClass::Transient,
            LlmError::Stream(_) => ErrorClass::Transient,
            LlmError::InvalidResponse(_) => ErrorClass::Rejected,
            LlmError::MissingApiKey { .. } => ErrorClass::Fatal,
            LlmError::Cancelled => ErrorClass::Cancelled,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LlmError::Cancelled)
    }
}

/// Map an upstream HTTP status to its retry class.
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        401..=403 => ErrorClass::Fatal,
        408 | 429 => ErrorClass::Transient,
        400..=499 => ErrorClass::Rejected,
        500..=599 => ErrorClass::Transient,
        _ => ErrorClass::Rejected,
    }
}
