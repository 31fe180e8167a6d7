//! Entry point that turns raw submissions into runs.
//!
//! A [`Trigger`] checks the shape of a submission, assigns a run id, and
//! spawns the run on the tokio runtime. Callers either keep the
//! [`RunHandle`] (fire-and-forget) or wait for the [`IntakeResponse`].

mod archive;

pub use archive::{ArchiveEntry, RunArchive, DEFAULT_MAX_FINISHED};

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cancellation::CancellationToken;
use crate::core::{ErrorKind, RunReport, RunStatus, Submission};
use crate::errors::{ApproverError, IntakeError};
use crate::workflow::Orchestrator;

/// Outcome class of an intake request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeStatus {
    /// The record passed every stage and was stored.
    Accepted,
    /// The run was started and not awaited.
    Submitted,
    /// The submission failed the shape check; no run was started.
    Invalid,
    /// A validator rejected the record.
    Rejected,
    /// A fault ended the run.
    Errored,
}

impl IntakeStatus {
    /// HTTP-style status code for this outcome.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::Accepted => 200,
            Self::Submitted => 202,
            Self::Invalid => 400,
            Self::Rejected => 422,
            Self::Errored => 503,
        }
    }
}

impl fmt::Display for IntakeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Submitted => write!(f, "submitted"),
            Self::Invalid => write!(f, "invalid"),
            Self::Rejected => write!(f, "rejected"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// Response returned to whoever submitted a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeResponse {
    /// HTTP-style status code.
    pub status_code: u16,
    /// The run id, when a run was started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    /// Outcome class.
    pub status: IntakeStatus,
    /// Compact run outcome, when the run finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<HashMap<String, serde_json::Value>>,
    /// Message for the submitter.
    pub message: String,
}

impl IntakeResponse {
    fn new(status: IntakeStatus, run_id: Option<Uuid>, message: impl Into<String>) -> Self {
        Self {
            status_code: status.status_code(),
            run_id,
            status,
            outcome: None,
            message: message.into(),
        }
    }

    /// A submission that failed the shape check.
    #[must_use]
    pub fn invalid(error: &IntakeError) -> Self {
        Self::new(IntakeStatus::Invalid, None, error.to_string())
    }

    /// A run that was started and not awaited.
    #[must_use]
    pub fn submitted(run_id: Uuid) -> Self {
        Self::new(IntakeStatus::Submitted, Some(run_id), "Submission received")
    }

    /// The response for a finished run.
    #[must_use]
    pub fn from_report(report: &RunReport) -> Self {
        let reason = report.reason.as_deref().unwrap_or("no reason given");
        let (status, message) = match report.status {
            RunStatus::Accepted => (IntakeStatus::Accepted, "Record accepted".to_string()),
            RunStatus::Rejected => (
                IntakeStatus::Rejected,
                format!(
                    "Rejected at stage '{}': {reason}. Correct the data and resubmit",
                    report.failed_stage.as_deref().unwrap_or("unknown")
                ),
            ),
            RunStatus::Errored | RunStatus::Running => (
                IntakeStatus::Errored,
                format!("Processing failed: {reason}. Try again later"),
            ),
        };

        Self {
            outcome: Some(report.to_dict()),
            ..Self::new(status, Some(report.run_id), message)
        }
    }

    /// A run whose task was lost before it reported.
    #[must_use]
    pub fn lost(run_id: Uuid, error: &ApproverError) -> Self {
        Self::new(
            IntakeStatus::Errored,
            Some(run_id),
            format!("Processing failed: {error}. Try again later"),
        )
    }
}

/// Handle to a spawned run.
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    submission_id: String,
    cancel: Arc<CancellationToken>,
    task: JoinHandle<RunReport>,
}

impl RunHandle {
    /// Returns the run id.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the submission id.
    #[must_use]
    pub fn submission_id(&self) -> &str {
        &self.submission_id
    }

    /// Requests cancellation of the run.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.cancel.cancel(reason);
    }

    /// Returns true once the run task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the run to reach a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`ApproverError::Internal`] if the run task panicked or was
    /// aborted.
    pub async fn wait(self) -> Result<RunReport, ApproverError> {
        let run_id = self.run_id;
        self.task
            .await
            .map_err(|e| ApproverError::Internal(format!("run {run_id} task failed: {e}")))
    }
}

/// Accepts submissions and starts runs.
#[derive(Debug, Clone)]
pub struct Trigger {
    orchestrator: Arc<Orchestrator>,
    archive: Arc<RunArchive>,
}

impl Trigger {
    /// Creates a trigger with a fresh archive.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self::with_archive(orchestrator, Arc::new(RunArchive::new()))
    }

    /// Creates a trigger recording runs into `archive`.
    #[must_use]
    pub fn with_archive(orchestrator: Arc<Orchestrator>, archive: Arc<RunArchive>) -> Self {
        Self {
            orchestrator,
            archive,
        }
    }

    /// Returns the run archive.
    #[must_use]
    pub fn archive(&self) -> &Arc<RunArchive> {
        &self.archive
    }

    /// Starts a run for `raw` without waiting for it.
    ///
    /// Must be called from within a tokio runtime. A run that panics is
    /// archived as errored with [`ErrorKind::Internal`].
    ///
    /// # Errors
    ///
    /// Returns an [`IntakeError`] when the submission is not a non-empty
    /// JSON object; no run is started.
    pub fn submit(&self, raw: serde_json::Value) -> Result<RunHandle, IntakeError> {
        let submission = Submission::from_raw(raw).map_err(|e| {
            warn!(error = %e, "Submission refused");
            e
        })?;

        let run_id = Uuid::new_v4();
        let submission_id = submission.id.clone();
        let cancel = Arc::new(CancellationToken::new());
        self.archive.register(run_id);
        info!(run_id = %run_id, submission_id = %submission_id, "Submission received");

        let orchestrator = Arc::clone(&self.orchestrator);
        let archive = Arc::clone(&self.archive);
        let token = Arc::clone(&cancel);
        let task_submission_id = submission_id.clone();
        let started_at = Utc::now();
        let task = tokio::spawn(async move {
            let run = AssertUnwindSafe(orchestrator.execute(run_id, submission, token));
            let report = match run.catch_unwind().await {
                Ok(report) => report,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(run_id = %run_id, panic = %message, "Run panicked");
                    RunReport::aborted(
                        run_id,
                        task_submission_id,
                        orchestrator.pipeline().name(),
                        started_at,
                        ErrorKind::Internal,
                        format!("run panicked: {message}"),
                    )
                }
            };
            archive.finish(report.clone());
            report
        });

        Ok(RunHandle {
            run_id,
            submission_id,
            cancel,
            task,
        })
    }

    /// Starts a run for `raw` and answers with `202` immediately.
    pub fn submit_detached(&self, raw: serde_json::Value) -> IntakeResponse {
        match self.submit(raw) {
            Ok(handle) => IntakeResponse::submitted(handle.run_id()),
            Err(e) => IntakeResponse::invalid(&e),
        }
    }

    /// Runs `raw` to completion and answers with its outcome.
    pub async fn submit_and_wait(&self, raw: serde_json::Value) -> IntakeResponse {
        let handle = match self.submit(raw) {
            Ok(handle) => handle,
            Err(e) => return IntakeResponse::invalid(&e),
        };

        let run_id = handle.run_id();
        match handle.wait().await {
            Ok(report) => IntakeResponse::from_report(&report),
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Run task lost");
                IntakeResponse::lost(run_id, &e)
            }
        }
    }

    /// Returns the terminal report of a run.
    #[must_use]
    pub fn report(&self, run_id: Uuid) -> Option<RunReport> {
        self.archive.report(run_id)
    }

    /// Returns the status of a run.
    #[must_use]
    pub fn status(&self, run_id: Uuid) -> Option<RunStatus> {
        self.archive.status(run_id)
    }

    /// Removes the terminal report of a run from the archive and returns it.
    pub fn take_report(&self, run_id: Uuid) -> Option<RunReport> {
        self.archive.take(run_id)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        email_validator, invalid_email_submission, pincode_validator, valid_submission,
        ScriptedValidator, Step, TestHarness,
    };
    use crate::validators::Validator;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn trigger() -> Trigger {
        let (harness, _store) = TestHarness::new(vec![email_validator(), pincode_validator()]);
        Trigger::new(harness.orchestrator)
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(IntakeStatus::Accepted.status_code(), 200);
        assert_eq!(IntakeStatus::Submitted.status_code(), 202);
        assert_eq!(IntakeStatus::Invalid.status_code(), 400);
        assert_eq!(IntakeStatus::Rejected.status_code(), 422);
        assert_eq!(IntakeStatus::Errored.status_code(), 503);
    }

    #[tokio::test]
    async fn test_accepted_response() {
        let trigger = trigger();

        let response = trigger.submit_and_wait(valid_submission()).await;

        assert_eq!(response.status_code, 200);
        assert_eq!(response.status, IntakeStatus::Accepted);
        let run_id = response.run_id.unwrap();
        assert_eq!(response.outcome.unwrap()["status"], "accepted");
        assert!(trigger.report(run_id).unwrap().is_accepted());
    }

    #[tokio::test]
    async fn test_rejected_response_names_stage() {
        let trigger = trigger();

        let response = trigger.submit_and_wait(invalid_email_submission()).await;

        assert_eq!(response.status_code, 422);
        assert!(response.message.contains("check_email"));
        assert!(response.message.contains("Invalid email address"));
        assert_eq!(
            trigger.status(response.run_id.unwrap()),
            Some(RunStatus::Rejected)
        );
    }

    #[tokio::test]
    async fn test_errored_response() {
        let validator: Arc<dyn Validator> =
            Arc::new(ScriptedValidator::failing("check_email", "unreachable"));
        let (harness, _store) = TestHarness::new(vec![validator]);
        let trigger = Trigger::new(harness.orchestrator);

        let response = trigger.submit_and_wait(valid_submission()).await;

        assert_eq!(response.status_code, 503);
        assert_eq!(response.status, IntakeStatus::Errored);
    }

    #[tokio::test]
    async fn test_panicking_run_is_archived_as_errored() {
        let validator: Arc<dyn Validator> = Arc::new(ScriptedValidator::new(
            "check_email",
            Step::Panic("validator blew up".to_string()),
        ));
        let (harness, store) = TestHarness::new(vec![validator]);
        let trigger = Trigger::new(harness.orchestrator);

        let handle = trigger.submit(valid_submission()).unwrap();
        let run_id = handle.run_id();
        let report = handle.wait().await.unwrap();

        assert_eq!(report.status, RunStatus::Errored);
        assert_eq!(report.error_kind, Some(ErrorKind::Internal));
        assert!(report.reason.unwrap().contains("validator blew up"));
        assert_eq!(trigger.status(run_id), Some(RunStatus::Errored));
        assert!(trigger.archive().running().is_empty());
        assert_eq!(store.write_count(), 0);

        let response = trigger.submit_and_wait(valid_submission()).await;
        assert_eq!(response.status_code, 503);
        assert_eq!(
            trigger.status(response.run_id.unwrap()),
            Some(RunStatus::Errored)
        );
    }

    #[tokio::test]
    async fn test_invalid_submission_starts_no_run() {
        let trigger = trigger();

        for raw in [json!([1, 2]), json!({}), json!({"id": "only-an-id"}), json!("text")] {
            let response = trigger.submit_and_wait(raw).await;
            assert_eq!(response.status_code, 400);
            assert!(response.run_id.is_none());
        }
        assert!(trigger.archive().is_empty());
    }

    #[tokio::test]
    async fn test_detached_submission() {
        let trigger = trigger();

        let response = trigger.submit_detached(valid_submission());

        assert_eq!(response.status_code, 202);
        assert!(trigger.status(response.run_id.unwrap()).is_some());
    }

    #[tokio::test]
    async fn test_handle_wait_and_archive() {
        let trigger = trigger();

        let handle = trigger
            .submit(json!({"id": "sub-42", "email": "a@example.com", "pincode": "560001"}))
            .unwrap();
        assert_eq!(handle.submission_id(), "sub-42");
        let run_id = handle.run_id();

        let report = handle.wait().await.unwrap();

        assert_eq!(report.run_id, run_id);
        assert_eq!(report.submission_id, "sub-42");
        assert_eq!(trigger.report(run_id), Some(report.clone()));

        assert_eq!(trigger.take_report(run_id), Some(report));
        assert!(trigger.status(run_id).is_none());
        assert!(trigger.archive().is_empty());
    }

    #[tokio::test]
    async fn test_archive_retention_is_bounded() {
        let (harness, _store) = TestHarness::new(vec![email_validator(), pincode_validator()]);
        let trigger = Trigger::with_archive(
            harness.orchestrator,
            Arc::new(RunArchive::with_max_finished(2)),
        );

        let mut run_ids = Vec::new();
        for _ in 0..5 {
            let response = trigger.submit_and_wait(valid_submission()).await;
            run_ids.push(response.run_id.unwrap());
        }

        assert_eq!(trigger.archive().len(), 2);
        assert!(trigger.status(run_ids[0]).is_none());
        assert_eq!(trigger.status(run_ids[4]), Some(RunStatus::Accepted));
    }

    #[tokio::test]
    async fn test_handle_cancel() {
        let validator: Arc<dyn Validator> = Arc::new(ScriptedValidator::hanging("check_email"));
        let (harness, _store) = TestHarness::new(vec![validator]);
        let trigger = Trigger::new(harness.orchestrator);

        let handle = trigger.submit(valid_submission()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        handle.cancel("client went away");
        let report = handle.wait().await.unwrap();

        assert_eq!(report.error_kind, Some(ErrorKind::Cancelled));
        assert_eq!(IntakeResponse::from_report(&report).status_code, 503);
    }
}
