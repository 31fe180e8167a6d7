//! Pipeline and stage definitions.

use crate::errors::{ContractErrorInfo, PipelineValidationError};
use crate::pipeline::RetryConfig;
use crate::validators::Validator;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The status code validators use to reject a record.
pub const DEFAULT_REJECTION_CODE: i64 = 400;

/// Default per-call validator timeout.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Where execution goes after a stage has been decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "stage")]
pub enum Target {
    /// Run the stage at this index.
    Stage(usize),
    /// All validation passed; persist the record.
    Persist,
    /// Terminal rejection attributed to the stage at this index.
    Reject(usize),
}

impl Target {
    /// Returns true for targets that end validation.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Persist | Self::Reject(_))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stage(i) => write!(f, "stage[{i}]"),
            Self::Persist => write!(f, "persist"),
            Self::Reject(i) => write!(f, "rejected[{i}]"),
        }
    }
}

/// One validated stage of a pipeline.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    /// The unique name of the stage.
    pub name: String,
    /// The external validator backing this stage.
    pub validator: Arc<dyn Validator>,
    /// Target when the validator passes the record.
    pub on_success: Target,
    /// Target when the validator rejects the record.
    pub on_failure: Target,
    /// Timeout for a single validator call.
    pub timeout: Duration,
    /// Retry policy for invocation faults and timeouts.
    pub retry: RetryConfig,
}

impl StageDefinition {
    /// Returns the timeout in milliseconds.
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

/// An ordered, immutable sequence of stages shared by every run.
///
/// Only [`crate::pipeline::PipelineBuilder`] constructs definitions, and it
/// checks the structural invariants first: stage 0 is the single entry,
/// failure targets reject at their own stage, success targets move strictly
/// forward, so the graph is acyclic.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    name: String,
    stages: Vec<StageDefinition>,
    rejection_code: i64,
}

impl PipelineDefinition {
    pub(crate) fn new(
        name: String,
        stages: Vec<StageDefinition>,
        rejection_code: i64,
    ) -> Result<Self, PipelineValidationError> {
        let definition = Self {
            name,
            stages,
            rejection_code,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    /// Returns the stage at `index`.
    #[must_use]
    pub fn stage(&self, index: usize) -> Option<&StageDefinition> {
        self.stages.get(index)
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the status code that means "rejected".
    #[must_use]
    pub const fn rejection_code(&self) -> i64 {
        self.rejection_code
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new(
                "Pipeline name cannot be empty or whitespace-only",
            )
            .with_error_info(ContractErrorInfo::new(
                "PIPELINE-NAME",
                "Pipeline name is blank",
            )));
        }

        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages")
                .with_error_info(
                    ContractErrorInfo::new("PIPELINE-EMPTY", "Cannot build an empty pipeline")
                        .with_fix_hint("Add at least one validation stage before building."),
                ));
        }

        let mut seen = HashSet::new();
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.name.trim().is_empty() {
                return Err(PipelineValidationError::new(format!(
                    "Stage at index {index} has an empty name"
                ))
                .with_error_info(ContractErrorInfo::new(
                    "PIPELINE-STAGE-NAME",
                    "Stage name is blank",
                )));
            }

            if !seen.insert(stage.name.as_str()) {
                return Err(PipelineValidationError::new(format!(
                    "Duplicate stage name '{}'",
                    stage.name
                ))
                .with_stages(vec![stage.name.clone()])
                .with_error_info(
                    ContractErrorInfo::new("PIPELINE-DUPLICATE", "Stage names must be unique")
                        .with_fix_hint("Rename one of the stages."),
                ));
            }

            if stage.on_failure != Target::Reject(index) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' must reject at its own index on failure, got {}",
                    stage.name, stage.on_failure
                ))
                .with_stages(vec![stage.name.clone()])
                .with_error_info(
                    ContractErrorInfo::new(
                        "PIPELINE-FAILURE-TARGET",
                        "Failure targets must be terminal rejections",
                    )
                    .with_context_entry("stage", stage.name.clone())
                    .with_fix_hint(format!("Use {} as the failure target.", Target::Reject(index))),
                ));
            }

            let next_ok = match stage.on_success {
                Target::Persist => index + 1 == self.stages.len(),
                Target::Stage(next) => next == index + 1 && next < self.stages.len(),
                Target::Reject(_) => false,
            };
            if !next_ok {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' has invalid success target {}",
                    stage.name, stage.on_success
                ))
                .with_stages(vec![stage.name.clone()])
                .with_error_info(
                    ContractErrorInfo::new(
                        "PIPELINE-SUCCESS-TARGET",
                        "Only the last stage may persist; every other stage continues to the next",
                    )
                    .with_context_entry("stage", stage.name.clone())
                    .with_fix_hint(if index + 1 == self.stages.len() {
                        format!("Use {} as the success target.", Target::Persist)
                    } else {
                        format!("Use {} as the success target.", Target::Stage(index + 1))
                    }),
                ));
            }

            if stage.timeout.is_zero() {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' has a zero timeout",
                    stage.name
                ))
                .with_stages(vec![stage.name.clone()]));
            }
        }

        Ok(())
    }
}
