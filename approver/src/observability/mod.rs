//! Logging setup and run summaries.
//!
//! This module provides:
//! - `init_tracing` for installing the global subscriber
//! - Wide run-summary events built from terminal reports

mod subscriber;
mod wide_events;

pub use subscriber::{init_tracing, LogFormat, LoggingConfig};
pub use wide_events::{build_run_payload, build_stage_payload, RunSummaryEmitter};
