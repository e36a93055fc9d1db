//! Domain types for selfloom
//!
//! The document being grown, per-iteration candidates, the run state machine,
//! and the client-facing event protocol.

pub mod candidate;
pub mod document;
pub mod event;
pub mod run_state;

pub use candidate::{Candidate, CandidateStatus};
pub use document::Document;
pub use event::{ErrorKind, LoomEvent};
pub use run_state::RunState;
