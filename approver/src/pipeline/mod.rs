//! Pipeline definition and routing.
//!
//! This module provides:
//! - Stage and pipeline definitions with structural validation
//! - A builder that wires stages linearly
//! - The decision evaluator
//! - Retry policies for validator calls

mod builder;
mod decision;
mod definition;
mod retry;

pub use builder::{PipelineBuilder, StageSpec};
pub use decision::decide;
pub use definition::{
    PipelineDefinition, StageDefinition, Target, DEFAULT_REJECTION_CODE, DEFAULT_STAGE_TIMEOUT,
};
pub use retry::{
    should_retry, with_retry, BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision,
    RetryOutcome, RetryState,
};
