//! The decision evaluator.

use super::{StageDefinition, Target};
use crate::core::StageResult;

/// Routes a stage result to the stage's success or failure target.
///
/// The comparison is an exact match against `rejection_code`: only that
/// code routes to failure. Any other code, or no code at all, passes.
#[must_use]
pub fn decide(result: &StageResult, stage: &StageDefinition, rejection_code: i64) -> Target {
    if result.is_rejection(rejection_code) {
        stage.on_failure
    } else {
        stage.on_success
    }
}
