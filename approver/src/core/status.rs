//! Run status and error kind enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The externally visible status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run has not reached a terminal state yet.
    Running,
    /// A validator rejected the record.
    Rejected,
    /// Every validator passed and the record was persisted.
    Accepted,
    /// An infrastructure fault ended the run.
    Errored,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Running
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Rejected => write!(f, "rejected"),
            Self::Accepted => write!(f, "accepted"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

impl RunStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Classifies the fault behind an `errored` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A validator was unreachable or answered with a malformed response.
    Invocation,
    /// A validator call exceeded its timeout.
    Timeout,
    /// The durable write failed.
    Persistence,
    /// The run was cancelled before it could finish.
    Cancelled,
    /// The engine itself misbehaved.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invocation => write!(f, "invocation"),
            Self::Timeout => write!(f, "timeout"),
            Self::Persistence => write!(f, "persistence"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// What happened at a single stage of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageVerdict {
    /// The validator passed the record on.
    Passed,
    /// The validator returned the rejection code.
    Rejected,
    /// The validator could not produce a result.
    Errored,
}

impl fmt::Display for StageVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Rejected => write!(f, "rejected"),
            Self::Errored => write!(f, "errored"),
        }
    }
}
