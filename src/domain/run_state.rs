//! Run state machine

use serde::{Deserialize, Serialize};

use crate::error::{LoomError, Result};

/// State of one generation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No generation active
    #[default]
    Idle,
    /// Iterating
    Running,
    /// Stop requested, tearing down in-flight work
    Stopping,
    /// Stopped cleanly
    Stopped,
    /// Stopped on a fatal condition
    Errored,
}

impl RunState {
    /// Returns true if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Stopped | RunState::Errored)
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Idle, RunState::Running)
                | (RunState::Running, RunState::Stopping)
                | (RunState::Running, RunState::Errored)
                | (RunState::Stopping, RunState::Stopped)
        )
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn transition(&mut self, next: RunState) -> Result<()> {
        if !self.can_transition_to(next) {
            return Err(LoomError::InvalidState(format!(
                "cannot move run from {} to {}",
                self, next
            )));
        }
        *self = next;
        Ok(())
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Stopped => "stopped",
            RunState::Errored => "errored",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_stop_path() {
        let mut state = RunState::default();
        assert_eq!(state, RunState::Idle);

        state.transition(RunState::Running).unwrap();
        state.transition(RunState::Stopping).unwrap();
        state.transition(RunState::Stopped).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_error_path() {
        let mut state = RunState::Idle;
        state.transition(RunState::Running).unwrap();
        state.transition(RunState::Errored).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn test_illegal_transitions() {
        let mut state = RunState::Idle;
        assert!(state.transition(RunState::Stopped).is_err());
        assert_eq!(state, RunState::Idle);

        let mut stopped = RunState::Stopped;
        assert!(stopped.transition(RunState::Running).is_err());

        let mut errored = RunState::Errored;
        let err = errored.transition(RunState::Running).unwrap_err();
        assert_eq!(err.to_string(), "Invalid state: cannot move run from errored to running");

        let mut running = RunState::Running;
        assert!(running.transition(RunState::Stopped).is_err());
    }

    #[test]
    fn test_serialization() {
        assert_eq!(serde_json::to_string(&RunState::Stopping).unwrap(), "\"stopping\"");
    }
}
