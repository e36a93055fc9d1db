//! The generation/grading engine.
//!
//! - `context`: token estimates and suffix trimming
//! - `retry`: exponential backoff for transient upstream failures
//! - `requester`: one streamed candidate
//! - `fanout`: N candidates side by side, plus the empty-output streak
//! - `grader`: picks the winner
//! - `namer`: suggests a document title
//! - `controller`: the loop and its state machine
//! - `sink`: event delivery

pub mod context;
pub mod controller;
pub mod fanout;
pub mod grader;
pub mod namer;
pub mod params;
pub mod requester;
pub mod retry;
pub mod sink;

pub use context::{ContextWindow, ModelRole, estimate_tokens, trim};
pub use controller::{LoopController, RunReport, StopReason};
pub use fanout::{EmptyStreak, FanOut, IterationResult};
pub use grader::{FALLBACK_INDEX, GradeDecision, Grader, parse_choice};
pub use namer::{NamingAdvisor, clean_name, should_name};
pub use params::{DEFAULT_MODEL, GenerationParams, MAX_CANDIDATES};
pub use requester::CompletionRequester;
pub use retry::{Backoff, BackoffPolicy, retry_transient};
pub use sink::{DEFAULT_EVENT_BUFFER, EventSink};
