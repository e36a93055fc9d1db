//! selfloom - an autonomous text-growing loop
//!
//! Each iteration fans out N streamed completions from a generation model,
//! asks a grading model to pick the most interesting one, appends the winner
//! to the document, and streams every step to a live client.

pub mod config;
pub mod domain;
pub mod error;
pub mod llm;
pub mod loom;
pub mod prompt;
pub mod server;
pub mod storage;

pub use error::{LoomError, Result};
