//! Workflow orchestration.
//!
//! A run moves `Entry -> Stage(0) -> ... -> Persisting -> Accepted`, leaving
//! early to `Rejected(i)` when a validator answers with the rejection code or
//! to `Errored` on any fault. The [`Orchestrator`] drives runs; [`RunState`]
//! holds the transition table.

mod orchestrator;
mod run;
mod state;


pub use orchestrator::Orchestrator;
pub use run::WorkflowRun;
pub use state::{RunEvent, RunState};
