//! Lifecycle events emitted while a run executes.
//!
//! The orchestrator reports every step of a run to an [`EventSink`]. Event
//! names are stable strings so sinks can filter on prefixes (`run.`,
//! `stage.`, `persist.`).

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A run was created and is about to enter its first stage.
pub const RUN_STARTED: &str = "run.started";
/// A validator call is about to be made.
pub const STAGE_STARTED: &str = "stage.started";
/// A validator call failed and will be attempted again.
pub const STAGE_RETRYING: &str = "stage.retrying";
/// A validator passed the record.
pub const STAGE_PASSED: &str = "stage.passed";
/// A validator rejected the record.
pub const STAGE_REJECTED: &str = "stage.rejected";
/// A validator could not produce a usable result.
pub const STAGE_ERRORED: &str = "stage.errored";
/// The accepted record is being written.
pub const PERSIST_STARTED: &str = "persist.started";
/// The run ended accepted.
pub const RUN_ACCEPTED: &str = "run.accepted";
/// The run ended rejected.
pub const RUN_REJECTED: &str = "run.rejected";
/// The run ended errored.
pub const RUN_ERRORED: &str = "run.errored";
/// One wide event summarizing a finished run.
pub const RUN_SUMMARY: &str = "run.summary";
