//! The run state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::RunStatus;
use crate::errors::InvalidTransitionError;
use crate::pipeline::Target;

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "stage")]
pub enum RunState {
    /// Created, no stage entered yet.
    Entry,
    /// Waiting on the validator of this stage.
    Stage(usize),
    /// All stages passed; the record is being written.
    Persisting,
    /// Terminal: the stage at this index rejected the record.
    Rejected(usize),
    /// Terminal: the record was persisted.
    Accepted,
    /// Terminal: a fault ended the run.
    Errored,
}

/// Inputs that move a run between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event", content = "target")]
pub enum RunEvent {
    /// Begin the run.
    Start,
    /// The current stage was decided.
    Routed(Target),
    /// The record was written.
    Persisted,
    /// An invocation, persistence or cancellation fault.
    Fault,
}

impl RunState {
    /// Applies an event and returns the next state.
    ///
    /// `stage_count` bounds the stage indices a run may enter.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransitionError`] for any pair not in the transition
    /// table, including every event applied to a terminal state.
    pub fn next(self, event: RunEvent, stage_count: usize) -> Result<Self, InvalidTransitionError> {
        let next = match (self, event) {
            (Self::Entry, RunEvent::Start) if stage_count > 0 => Self::Stage(0),
            (Self::Stage(i), RunEvent::Routed(Target::Stage(j)))
                if j == i + 1 && j < stage_count =>
            {
                Self::Stage(j)
            }
            (Self::Stage(_), RunEvent::Routed(Target::Persist)) => Self::Persisting,
            (Self::Stage(i), RunEvent::Routed(Target::Reject(j))) if j == i => Self::Rejected(i),
            (Self::Persisting, RunEvent::Persisted) => Self::Accepted,
            (state, RunEvent::Fault) if !state.is_terminal() => Self::Errored,
            (state, event) => return Err(InvalidTransitionError::new(state, event)),
        };
        Ok(next)
    }

    /// Returns true for `Rejected`, `Accepted` and `Errored`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::Accepted | Self::Errored)
    }

    /// Returns the externally visible status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        match self {
            Self::Entry | Self::Stage(_) | Self::Persisting => RunStatus::Running,
            Self::Rejected(_) => RunStatus::Rejected,
            Self::Accepted => RunStatus::Accepted,
            Self::Errored => RunStatus::Errored,
        }
    }

    /// Returns the current stage index while a stage is running.
    #[must_use]
    pub const fn stage_index(&self) -> Option<usize> {
        match self {
            Self::Stage(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry => write!(f, "entry"),
            Self::Stage(i) => write!(f, "stage[{i}]"),
            Self::Persisting => write!(f, "persisting"),
            Self::Rejected(i) => write!(f, "rejected[{i}]"),
            Self::Accepted => write!(f, "accepted"),
            Self::Errored => write!(f, "errored"),
        }
    }
}
