//! Test assertions for run reports.

use crate::core::{ErrorKind, RunReport, RunStatus};

/// Asserts that the run was accepted.
pub fn assert_accepted(report: &RunReport) {
    assert_eq!(
        report.status,
        RunStatus::Accepted,
        "Expected accepted, got {} (reason: {:?})",
        report.status,
        report.reason
    );
    assert!(report.record_key.is_some(), "Accepted run has no record key");
}

/// Asserts that the run was rejected at `stage`.
pub fn assert_rejected_at(report: &RunReport, stage: &str) {
    assert_eq!(
        report.status,
        RunStatus::Rejected,
        "Expected rejected, got {} (reason: {:?})",
        report.status,
        report.reason
    );
    assert_eq!(report.failed_stage.as_deref(), Some(stage));
    assert!(report.error_kind.is_none(), "Rejected run carries an error kind");
}

/// Asserts that the run errored with `kind`.
pub fn assert_errored_with(report: &RunReport, kind: ErrorKind) {
    assert_eq!(
        report.status,
        RunStatus::Errored,
        "Expected errored, got {} (reason: {:?})",
        report.status,
        report.reason
    );
    assert_eq!(report.error_kind, Some(kind));
}

/// Asserts the exact sequence of stages the run invoked.
pub fn assert_stages_invoked(report: &RunReport, expected: &[&str]) {
    assert_eq!(
        report.stages_invoked(),
        expected,
        "Unexpected stage sequence"
    );
}
