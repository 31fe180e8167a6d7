//! Mutable state of a single run.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::state::{RunEvent, RunState};
use crate::core::{ErrorKind, Payload, RunReport, StageRecord, Submission};
use crate::errors::InvalidTransitionError;

/// One execution of the pipeline for one submission.
///
/// Owned by the task driving it; nothing else observes it until it is
/// turned into a [`RunReport`].
#[derive(Debug, Clone)]
pub struct WorkflowRun {
    run_id: Uuid,
    submission_id: String,
    pipeline: String,
    stage_count: usize,
    state: RunState,
    payload: Payload,
    history: Vec<StageRecord>,
    failed_stage: Option<(usize, String)>,
    reason: Option<String>,
    error_kind: Option<ErrorKind>,
    record_key: Option<String>,
    started_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// Creates a run in the `Entry` state with the submission fields as payload.
    #[must_use]
    pub fn new(run_id: Uuid, submission: &Submission, pipeline: &str, stage_count: usize) -> Self {
        Self {
            run_id,
            submission_id: submission.id.clone(),
            pipeline: pipeline.to_string(),
            stage_count,
            state: RunState::Entry,
            payload: submission.fields.clone(),
            history: Vec::with_capacity(stage_count),
            failed_stage: None,
            reason: None,
            error_kind: None,
            record_key: None,
            started_at: Utc::now(),
        }
    }

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

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> RunState {
        self.state
    }

    /// Returns the payload the next step receives.
    #[must_use]
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Returns the audit trail so far.
    #[must_use]
    pub fn history(&self) -> &[StageRecord] {
        &self.history
    }

    /// Drives the state machine.
    ///
    /// # Errors
    ///
    /// Returns an error if the event is illegal in the current state; the
    /// state is left unchanged.
    pub fn apply(&mut self, event: RunEvent) -> Result<RunState, InvalidTransitionError> {
        let next = self.state.next(event, self.stage_count)?;
        tracing::trace!(run_id = %self.run_id, from = %self.state, to = %next, "Run transition");
        self.state = next;
        Ok(next)
    }

    /// Appends a stage audit record.
    pub fn record_stage(&mut self, record: StageRecord) {
        self.history.push(record);
    }

    /// Replaces the payload forwarded to the next step.
    pub fn forward(&mut self, payload: Payload) {
        self.payload = payload;
    }

    /// Records the stage a rejection happened at.
    pub fn mark_rejected(&mut self, index: usize, stage: &str, reason: impl Into<String>) {
        self.failed_stage = Some((index, stage.to_string()));
        self.reason = Some(reason.into());
    }

    /// Records a fault, optionally attributed to a stage.
    pub fn mark_errored(
        &mut self,
        stage: Option<(usize, &str)>,
        kind: ErrorKind,
        reason: impl Into<String>,
    ) {
        self.failed_stage = stage.map(|(i, name)| (i, name.to_string()));
        self.error_kind = Some(kind);
        self.reason = Some(reason.into());
    }

    /// Records the key an accepted record was stored under.
    pub fn set_record_key(&mut self, key: impl Into<String>) {
        self.record_key = Some(key.into());
    }

    /// Freezes the run into its report.
    #[must_use]
    pub fn into_report(self) -> RunReport {
        let (failed_stage_index, failed_stage) = self.failed_stage.unzip();
        RunReport {
            run_id: self.run_id,
            submission_id: self.submission_id,
            pipeline: self.pipeline,
            status: self.state.status(),
            failed_stage,
            failed_stage_index,
            reason: self.reason,
            error_kind: self.error_kind,
            record_key: self.record_key,
            history: self.history,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}
