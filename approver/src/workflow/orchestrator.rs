//! Drives runs through the pipeline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::run::WorkflowRun;
use super::state::{RunEvent, RunState};
use crate::cancellation::CancellationToken;
use crate::core::{ErrorKind, RunReport, StageRecord, StageResult, StageVerdict, Submission};
use crate::errors::{InvocationFailure, InvalidTransitionError};
use crate::events::{
    EventSink, NoOpEventSink, PERSIST_STARTED, RUN_ACCEPTED, RUN_ERRORED, RUN_REJECTED,
    RUN_STARTED, STAGE_ERRORED, STAGE_PASSED, STAGE_REJECTED, STAGE_RETRYING, STAGE_STARTED,
};
use crate::observability::RunSummaryEmitter;
use crate::persistence::PersistenceStep;
use crate::pipeline::{decide, PipelineDefinition, RetryOutcome, StageDefinition, Target};
use crate::validators::invoke_with_retry;

/// Body fields checked, in order, for a validator's rejection message.
const REASON_FIELDS: [&str; 3] = ["reason", "message", "error"];

/// Runs submissions through a fixed pipeline and persists the survivors.
///
/// The orchestrator is shared by every concurrent run; all per-run state
/// lives in the [`WorkflowRun`] owned by the task executing it.
pub struct Orchestrator {
    pipeline: Arc<PipelineDefinition>,
    persistence: PersistenceStep,
    events: Arc<dyn EventSink>,
    summaries: RunSummaryEmitter,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pipeline", &self.pipeline.name())
            .field("stages", &self.pipeline.stage_names())
            .field("persistence", &self.persistence)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator that reports events nowhere.
    #[must_use]
    pub fn new(pipeline: Arc<PipelineDefinition>, persistence: PersistenceStep) -> Self {
        Self::with_event_sink(pipeline, persistence, Arc::new(NoOpEventSink))
    }

    /// Creates an orchestrator reporting lifecycle events to `events`.
    #[must_use]
    pub fn with_event_sink(
        pipeline: Arc<PipelineDefinition>,
        persistence: PersistenceStep,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            pipeline,
            persistence,
            summaries: RunSummaryEmitter::new(Arc::clone(&events)),
            events,
        }
    }

    /// Returns the pipeline definition.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<PipelineDefinition> {
        &self.pipeline
    }

    /// Returns the persistence step.
    #[must_use]
    pub fn persistence(&self) -> &PersistenceStep {
        &self.persistence
    }

    /// Runs a submission to completion under a fresh run id.
    pub async fn run(&self, submission: Submission) -> RunReport {
        self.execute(Uuid::new_v4(), submission, Arc::new(CancellationToken::new()))
            .await
    }

    /// Runs a submission to completion.
    ///
    /// The report is always terminal: rejections, validator faults,
    /// persistence failures and cancellation are all outcomes, not errors.
    pub async fn execute(
        &self,
        run_id: Uuid,
        submission: Submission,
        cancel: Arc<CancellationToken>,
    ) -> RunReport {
        let span = tracing::info_span!(
            "workflow_run",
            run_id = %run_id,
            submission_id = %submission.id,
            pipeline = %self.pipeline.name(),
        );

        async move {
            let mut run = WorkflowRun::new(
                run_id,
                &submission,
                self.pipeline.name(),
                self.pipeline.stage_count(),
            );

            if let Err(e) = self.drive(&mut run, &cancel).await {
                warn!(error = %e, "Run state machine violated");
                run.mark_errored(None, ErrorKind::Internal, e.to_string());
                if !run.state().is_terminal() {
                    let _ = run.apply(RunEvent::Fault);
                }
            }

            let report = run.into_report();
            self.finish(&report);
            report
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        run: &mut WorkflowRun,
        cancel: &CancellationToken,
    ) -> Result<(), InvalidTransitionError> {
        info!("Run started");
        self.events.try_emit(
            RUN_STARTED,
            Some(json!({
                "run_id": run.run_id().to_string(),
                "submission_id": run.submission_id(),
                "pipeline": self.pipeline.name(),
            })),
        );

        loop {
            match run.state() {
                RunState::Stage(index) => {
                    if Self::cancelled(run, cancel, Some(index), self.pipeline.as_ref())? {
                        return Ok(());
                    }
                    let Some(stage) = self.pipeline.stage(index) else {
                        run.mark_errored(
                            None,
                            ErrorKind::Internal,
                            format!("stage index {index} out of range"),
                        );
                        run.apply(RunEvent::Fault)?;
                        return Ok(());
                    };
                    self.run_stage(run, index, stage, cancel).await?;
                }
                RunState::Persisting => {
                    if Self::cancelled(run, cancel, None, self.pipeline.as_ref())? {
                        return Ok(());
                    }
                    self.persist(run).await?;
                }
                RunState::Entry => {
                    run.apply(RunEvent::Start)?;
                }
                RunState::Rejected(_) | RunState::Accepted | RunState::Errored => return Ok(()),
            }
        }
    }

    fn cancelled(
        run: &mut WorkflowRun,
        cancel: &CancellationToken,
        index: Option<usize>,
        pipeline: &PipelineDefinition,
    ) -> Result<bool, InvalidTransitionError> {
        if !cancel.is_cancelled() {
            return Ok(false);
        }
        let reason = cancel
            .reason()
            .unwrap_or_else(|| "cancelled".to_string());
        let stage = index.and_then(|i| pipeline.stage(i).map(|s| (i, s.name.as_str())));
        info!(reason = %reason, "Run cancelled");
        run.mark_errored(stage, ErrorKind::Cancelled, format!("Run cancelled: {reason}"));
        run.apply(RunEvent::Fault)?;
        Ok(true)
    }

    async fn run_stage(
        &self,
        run: &mut WorkflowRun,
        index: usize,
        stage: &StageDefinition,
        cancel: &CancellationToken,
    ) -> Result<(), InvalidTransitionError> {
        let run_id = run.run_id().to_string();
        debug!(stage = %stage.name, index, "Invoking validator");
        self.events.try_emit(
            STAGE_STARTED,
            Some(json!({"run_id": run_id, "stage": stage.name, "index": index})),
        );

        let started_at = Utc::now();
        let payload = run.payload().clone();
        let events = &self.events;
        let on_retry = |attempt: usize, failure: &InvocationFailure, delay: Duration| {
            warn!(stage = %stage.name, attempt, error = %failure, "Validator call failed, retrying");
            events.try_emit(
                STAGE_RETRYING,
                Some(json!({
                    "run_id": run_id,
                    "stage": stage.name,
                    "attempt": attempt,
                    "error": failure.to_string(),
                    "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                })),
            );
        };

        let outcome: Option<RetryOutcome<StageResult, InvocationFailure>> = tokio::select! {
            outcome = invoke_with_retry(stage, &payload, on_retry) => Some(outcome),
            () = cancel.cancelled() => None,
        };

        let Some(RetryOutcome { result, attempts }) = outcome else {
            Self::cancelled(run, cancel, Some(index), self.pipeline.as_ref())?;
            return Ok(());
        };

        match result {
            Ok(result) => {
                let target = decide(&result, stage, self.pipeline.rejection_code());
                let rejected = matches!(target, Target::Reject(_));
                let StageResult {
                    status_code,
                    data,
                    raw,
                } = result;

                run.record_stage(StageRecord {
                    stage: stage.name.clone(),
                    index,
                    verdict: if rejected {
                        StageVerdict::Rejected
                    } else {
                        StageVerdict::Passed
                    },
                    status_code,
                    attempts,
                    forwarded: (!rejected).then(|| data.clone()),
                    raw_response: Some(raw),
                    error: None,
                    started_at,
                    finished_at: Utc::now(),
                });

                if rejected {
                    let reason = rejection_reason(&stage.name, status_code, &data);
                    info!(stage = %stage.name, status_code, reason = %reason, "Record rejected");
                    self.events.try_emit(
                        STAGE_REJECTED,
                        Some(json!({
                            "run_id": run_id,
                            "stage": stage.name,
                            "index": index,
                            "status_code": status_code,
                            "reason": reason,
                        })),
                    );
                    run.mark_rejected(index, &stage.name, reason);
                } else {
                    debug!(stage = %stage.name, status_code, next = %target, "Stage passed");
                    self.events.try_emit(
                        STAGE_PASSED,
                        Some(json!({
                            "run_id": run_id,
                            "stage": stage.name,
                            "index": index,
                            "status_code": status_code,
                            "attempts": attempts,
                        })),
                    );
                    run.forward(data);
                }

                run.apply(RunEvent::Routed(target))?;
            }
            Err(failure) => {
                warn!(stage = %stage.name, attempts, error = %failure, "Validator failed");
                self.events.try_emit(
                    STAGE_ERRORED,
                    Some(json!({
                        "run_id": run_id,
                        "stage": stage.name,
                        "index": index,
                        "attempts": attempts,
                        "error_kind": failure.kind().to_string(),
                        "error": failure.to_string(),
                    })),
                );
                run.record_stage(StageRecord {
                    stage: stage.name.clone(),
                    index,
                    verdict: StageVerdict::Errored,
                    status_code: None,
                    attempts,
                    forwarded: None,
                    raw_response: None,
                    error: Some(failure.to_string()),
                    started_at,
                    finished_at: Utc::now(),
                });
                run.mark_errored(
                    Some((index, stage.name.as_str())),
                    failure.kind(),
                    failure.to_string(),
                );
                run.apply(RunEvent::Fault)?;
            }
        }

        Ok(())
    }

    async fn persist(&self, run: &mut WorkflowRun) -> Result<(), InvalidTransitionError> {
        let run_id = run.run_id();
        self.events.try_emit(
            PERSIST_STARTED,
            Some(json!({
                "run_id": run_id.to_string(),
                "table": self.persistence.config().table,
            })),
        );

        match self
            .persistence
            .persist(run_id, run.submission_id(), run.payload())
            .await
        {
            Ok(receipt) => {
                info!(key = %receipt.key, outcome = %receipt.outcome, "Record persisted");
                run.set_record_key(receipt.key);
                run.apply(RunEvent::Persisted)?;
            }
            Err(e) => {
                warn!(error = %e, "Persistence failed");
                let kind = if e.is_timeout() {
                    ErrorKind::Timeout
                } else {
                    ErrorKind::Persistence
                };
                run.mark_errored(None, kind, e.to_string());
                run.apply(RunEvent::Fault)?;
            }
        }

        Ok(())
    }

    fn finish(&self, report: &RunReport) {
        let (event, message) = if report.is_accepted() {
            (RUN_ACCEPTED, "Run accepted")
        } else if report.is_rejected() {
            (RUN_REJECTED, "Run rejected")
        } else {
            (RUN_ERRORED, "Run errored")
        };

        info!(
            status = %report.status,
            failed_stage = report.failed_stage.as_deref().unwrap_or_default(),
            duration_ms = report.duration_ms(),
            "{}",
            message
        );

        self.events.try_emit(
            event,
            Some(json!({
                "run_id": report.run_id.to_string(),
                "status": report.status.to_string(),
                "failed_stage": report.failed_stage,
                "reason": report.reason,
                "error_kind": report.error_kind.map(|k| k.to_string()),
                "record_key": report.record_key,
            })),
        );
        self.summaries.emit(report);
    }
}

/// Picks a human-readable rejection reason from the validator's body.
fn rejection_reason(stage: &str, status_code: Option<i64>, body: &crate::core::Payload) -> String {
    REASON_FIELDS
        .iter()
        .find_map(|field| body.get(*field).and_then(serde_json::Value::as_str))
        .map_or_else(
            || {
                format!(
                    "Stage '{stage}' rejected the record with status {}",
                    status_code.unwrap_or_default()
                )
            },
            ToString::to_string,
        )
}
