//! LLM Client Layer - OpenRouter integration with streaming
//!
//! This module provides:
//! - LlmClient trait for the two model capabilities (complete, stream)
//! - Error classification driving the retry policy
//! - OpenRouterClient implementation
//! - SSE chunk parsing
//! - MockLlmClient for scripted runs

pub mod client;
pub mod mock;
pub mod openrouter;
pub mod streaming;

pub use client::{CompletionRequest, ErrorClass, LlmClient, LlmError, TokenStream, classify_status};
pub use mock::{CallKind, MockCall, MockLlmClient, MockReply};
pub use openrouter::{API_KEY_ENV, DEFAULT_BASE_URL, OpenRouterClient, OpenRouterConfig};
pub use streaming::{SseData, parse_sse_data};
