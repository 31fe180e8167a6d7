//! Error types for the approver workflow engine.
//!
//! Validation rejections are not errors: they are an expected terminal
//! outcome of a run and live in [`crate::core::RunReport`]. Everything in
//! this module describes infrastructure faults, malformed input, or
//! misconfiguration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::core::ErrorKind;

/// The main error type for approver operations.
#[derive(Debug, Error)]
pub enum ApproverError {
    /// The pipeline definition violates a structural invariant.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// Configuration could not be loaded or bound.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A submission was refused at intake.
    #[error("{0}")]
    Intake(#[from] IntakeError),

    /// A validator could not be invoked.
    #[error("{0}")]
    Invocation(#[from] InvocationFailure),

    /// The persistence step failed.
    #[error("{0}")]
    Persistence(#[from] PersistenceError),

    /// The run state machine was driven with an illegal event.
    #[error("{0}")]
    Transition(#[from] InvalidTransitionError),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata attached to pipeline validation errors for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "PIPELINE-EMPTY").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline definition is structurally invalid.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Errors raised while loading configuration or binding it to validators.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The layered configuration sources could not be extracted.
    #[error("Failed to load configuration: {0}")]
    Load(String),

    /// A stage references a validator that is neither registered nor reachable.
    #[error("Stage '{stage}' references unknown validator '{validator}'")]
    UnknownValidator {
        /// The stage name.
        stage: String,
        /// The validator name.
        validator: String,
    },

    /// The configured pipeline is invalid.
    #[error("{0}")]
    Pipeline(#[from] PipelineValidationError),

    /// The persistence settings are unusable.
    #[error("Invalid persistence settings: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Reasons a raw submission is refused before any run starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntakeError {
    /// The submission was not a JSON object.
    #[error("Submission must be a JSON object, got {found}")]
    NotAnObject {
        /// The JSON type that was received.
        found: String,
    },

    /// The submission carried no record fields.
    #[error("Submission payload is empty")]
    EmptyPayload,

    /// The `id` field was present but unusable.
    #[error("Submission id must be a non-empty string or number")]
    InvalidId,

    /// The `metadata` field was present but not an object.
    #[error("Submission metadata must be a JSON object")]
    InvalidMetadata,
}

/// A failure to obtain a usable result from a validator.
///
/// All variants are retryable by the orchestrator; once the retry budget is
/// exhausted the run ends in `errored`, never `rejected`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationFailure {
    /// The validator could not be called or reported a transport fault.
    #[error("Validator for stage '{stage}' could not be invoked: {cause}")]
    Unreachable {
        /// The stage name.
        stage: String,
        /// The underlying cause.
        cause: String,
    },

    /// The validator answered with a response that does not fit the envelope.
    #[error("Validator for stage '{stage}' returned a malformed response: {cause}")]
    Malformed {
        /// The stage name.
        stage: String,
        /// What was wrong with the response.
        cause: String,
    },

    /// The validator did not answer within the stage timeout.
    #[error("Validator for stage '{stage}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The stage name.
        stage: String,
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },
}

impl InvocationFailure {
    /// Creates an unreachable failure.
    #[must_use]
    pub fn unreachable(stage: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::Unreachable {
            stage: stage.into(),
            cause: cause.into(),
        }
    }

    /// Creates a malformed-response failure.
    #[must_use]
    pub fn malformed(stage: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::Malformed {
            stage: stage.into(),
            cause: cause.into(),
        }
    }

    /// Creates a timeout failure.
    #[must_use]
    pub fn timeout(stage: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            stage: stage.into(),
            timeout_ms,
        }
    }

    /// Returns the stage the failure belongs to.
    #[must_use]
    pub fn stage(&self) -> &str {
        match self {
            Self::Unreachable { stage, .. }
            | Self::Malformed { stage, .. }
            | Self::Timeout { stage, .. } => stage,
        }
    }

    /// Returns the reported error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Unreachable { .. } | Self::Malformed { .. } => ErrorKind::Invocation,
        }
    }

    /// Whether the failure is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors raised by the persistence step or a record store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// A record with the same key already exists and the write mode forbids overwriting.
    #[error("Record '{key}' already exists in '{table}'")]
    DuplicateKey {
        /// The target table.
        table: String,
        /// The conflicting key.
        key: String,
    },

    /// The store could not be reached.
    #[error("Store '{table}' is unavailable: {cause}")]
    Unavailable {
        /// The target table.
        table: String,
        /// The underlying cause.
        cause: String,
    },

    /// The record cannot be keyed or encoded.
    #[error("Invalid record: {reason}")]
    InvalidRecord {
        /// Why the record was refused.
        reason: String,
    },

    /// The store failed while reading or writing.
    #[error("Store '{table}' failed: {cause}")]
    Io {
        /// The target table.
        table: String,
        /// The underlying cause.
        cause: String,
    },

    /// The store did not acknowledge the write in time.
    #[error("Write to '{table}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The target table.
        table: String,
        /// The write deadline in milliseconds.
        timeout_ms: u64,
    },
}

impl PersistenceError {
    /// Creates a duplicate key error.
    #[must_use]
    pub fn duplicate_key(table: impl Into<String>, key: impl Into<String>) -> Self {
        Self::DuplicateKey {
            table: table.into(),
            key: key.into(),
        }
    }

    /// Creates an unavailable error.
    #[must_use]
    pub fn unavailable(table: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::Unavailable {
            table: table.into(),
            cause: cause.into(),
        }
    }

    /// Creates an invalid record error.
    #[must_use]
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }

    /// Creates an IO error.
    #[must_use]
    pub fn io(table: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Io {
            table: table.into(),
            cause: cause.to_string(),
        }
    }

    /// Creates a write timeout error.
    #[must_use]
    pub fn timeout(table: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            table: table.into(),
            timeout_ms,
        }
    }

    /// Whether the failure is a duplicate key conflict.
    #[must_use]
    pub const fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    /// Whether the store missed its write deadline.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();

        match self {
            Self::DuplicateKey { table, key } => {
                map.insert("type".to_string(), serde_json::json!("DuplicateKey"));
                map.insert("table".to_string(), serde_json::json!(table));
                map.insert("key".to_string(), serde_json::json!(key));
            }
            Self::Unavailable { table, cause } => {
                map.insert("type".to_string(), serde_json::json!("Unavailable"));
                map.insert("table".to_string(), serde_json::json!(table));
                map.insert("cause".to_string(), serde_json::json!(cause));
            }
            Self::InvalidRecord { reason } => {
                map.insert("type".to_string(), serde_json::json!("InvalidRecord"));
                map.insert("reason".to_string(), serde_json::json!(reason));
            }
            Self::Io { table, cause } => {
                map.insert("type".to_string(), serde_json::json!("Io"));
                map.insert("table".to_string(), serde_json::json!(table));
                map.insert("cause".to_string(), serde_json::json!(cause));
            }
            Self::Timeout { table, timeout_ms } => {
                map.insert("type".to_string(), serde_json::json!("Timeout"));
                map.insert("table".to_string(), serde_json::json!(table));
                map.insert("timeout_ms".to_string(), serde_json::json!(timeout_ms));
            }
        }

        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Error raised when the run state machine receives an event its current state does not accept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Illegal transition from {state} on {event}")]
pub struct InvalidTransitionError {
    /// The state the run was in.
    pub state: String,
    /// The event that was applied.
    pub event: String,
}

impl InvalidTransitionError {
    /// Creates a new invalid transition error.
    #[must_use]
    pub fn new(state: impl std::fmt::Debug, event: impl std::fmt::Debug) -> Self {
        Self {
            state: format!("{state:?}"),
            event: format!("{event:?}"),
        }
    }
}
