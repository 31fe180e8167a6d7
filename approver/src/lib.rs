//! # Approver
//!
//! A workflow engine that runs submitted records through an ordered chain of
//! external validators and persists the records every validator accepts.
//!
//! Each run is a small state machine:
//!
//! - **Stages**: validators are called strictly in order, each receiving the
//!   body forwarded by the previous one
//! - **Decisions**: a response carrying the rejection code (400 by default)
//!   ends the run as rejected; any other code moves the run forward
//! - **Persistence**: a record that passes every stage is written exactly once
//! - **Faults**: unreachable or slow validators are retried, then end the run
//!   as errored, distinctly from a rejection
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use approver::prelude::*;
//!
//! let pipeline = PipelineBuilder::new("signup")
//!     .stage("check_email", email_validator)
//!     .stage("check_pincode", pincode_validator)
//!     .build()?;
//!
//! let persistence = PersistenceStep::new(
//!     Arc::new(InMemoryRecordStore::new()),
//!     PersistenceConfig::new("users"),
//! );
//! let trigger = Trigger::new(Arc::new(Orchestrator::new(Arc::new(pipeline), persistence)));
//!
//! let response = trigger.submit_and_wait(json!({"email": "jane@example.com", "pincode": "560001"})).await;
//! assert_eq!(response.status_code, 200);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod persistence;
pub mod pipeline;
pub mod testing;
pub mod trigger;
pub mod validators;
pub mod workflow;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{load_config, ApproverConfig, StageConfig};
    pub use crate::core::{
        ErrorKind, Payload, RunReport, RunStatus, StageRecord, StageResult, StageVerdict,
        Submission,
    };
    pub use crate::errors::{
        ApproverError, ConfigError, IntakeError, InvocationFailure, PersistenceError,
        PipelineValidationError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, LogFormat, LoggingConfig};
    pub use crate::persistence::{
        FileRecordStore, InMemoryRecordStore, PersistenceConfig, PersistenceStep, RecordStore,
        WriteMode, WriteOutcome,
    };
    pub use crate::pipeline::{
        decide, PipelineBuilder, PipelineDefinition, RetryConfig, StageDefinition, StageSpec,
        Target,
    };
    pub use crate::trigger::{IntakeResponse, IntakeStatus, RunHandle, Trigger};
    pub use crate::validators::{FnValidator, Validator, ValidatorRegistry};
    pub use crate::workflow::{Orchestrator, RunState};
}
