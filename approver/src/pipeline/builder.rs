//! Pipeline builder with validation.

use super::definition::{DEFAULT_REJECTION_CODE, DEFAULT_STAGE_TIMEOUT};
use super::{PipelineDefinition, RetryConfig, StageDefinition, Target};
use crate::errors::PipelineValidationError;
use crate::validators::Validator;
use std::sync::Arc;
use std::time::Duration;

/// Specification for a stage before it is placed in a pipeline.
///
/// Unset targets are wired linearly at build time: success goes to the next
/// stage (or persistence for the last one), failure rejects at this stage.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The validator implementation.
    pub validator: Arc<dyn Validator>,
    /// Explicit success target.
    pub on_success: Option<Target>,
    /// Explicit failure target.
    pub on_failure: Option<Target>,
    /// Per-call timeout override.
    pub timeout: Option<Duration>,
    /// Retry policy override.
    pub retry: Option<RetryConfig>,
}

impl StageSpec {
    /// Creates a new stage specification.
    #[must_use]
    pub fn new(name: impl Into<String>, validator: Arc<dyn Validator>) -> Self {
        Self {
            name: name.into(),
            validator,
            on_success: None,
            on_failure: None,
            timeout: None,
            retry: None,
        }
    }

    /// Sets the success target.
    #[must_use]
    pub fn on_success(mut self, target: Target) -> Self {
        self.on_success = Some(target);
        self
    }

    /// Sets the failure target.
    #[must_use]
    pub fn on_failure(mut self, target: Target) -> Self {
        self.on_failure = Some(target);
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// Builder for creating validated pipeline definitions.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: Vec<StageSpec>,
    rejection_code: i64,
    default_timeout: Duration,
    default_retry: RetryConfig,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            rejection_code: DEFAULT_REJECTION_CODE,
            default_timeout: DEFAULT_STAGE_TIMEOUT,
            default_retry: RetryConfig::default(),
        }
    }

    /// Appends a stage with linear wiring and default policies.
    #[must_use]
    pub fn stage(mut self, name: impl Into<String>, validator: Arc<dyn Validator>) -> Self {
        self.stages.push(StageSpec::new(name, validator));
        self
    }

    /// Appends a stage specification.
    #[must_use]
    pub fn stage_spec(mut self, spec: StageSpec) -> Self {
        self.stages.push(spec);
        self
    }

    /// Sets the status code that means "rejected".
    #[must_use]
    pub fn rejection_code(mut self, code: i64) -> Self {
        self.rejection_code = code;
        self
    }

    /// Sets the timeout used by stages without an override.
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets the retry policy used by stages without an override.
    #[must_use]
    pub fn default_retry(mut self, retry: RetryConfig) -> Self {
        self.default_retry = retry;
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages added so far.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline is empty, a name is blank or
    /// duplicated, or a target breaks the linear accept/reject shape.
    pub fn build(self) -> Result<PipelineDefinition, PipelineValidationError> {
        let count = self.stages.len();
        let stages = self
            .stages
            .into_iter()
            .enumerate()
            .map(|(index, spec)| {
                let linear_next = if index + 1 < count {
                    Target::Stage(index + 1)
                } else {
                    Target::Persist
                };
                StageDefinition {
                    name: spec.name,
                    validator: spec.validator,
                    on_success: spec.on_success.unwrap_or(linear_next),
                    on_failure: spec.on_failure.unwrap_or(Target::Reject(index)),
                    timeout: spec.timeout.unwrap_or(self.default_timeout),
                    retry: spec.retry.unwrap_or_else(|| self.default_retry.clone()),
                }
            })
            .collect();

        PipelineDefinition::new(self.name, stages, self.rejection_code)
    }
}
