//! Wide events summarizing finished runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::{RunReport, StageRecord};
use crate::events::{EventSink, RUN_SUMMARY};

/// Builds the payload describing one stage of a finished run.
#[must_use]
pub fn build_stage_payload(record: &StageRecord) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "stage": record.stage,
        "index": record.index,
        "verdict": record.verdict.to_string(),
        "status_code": record.status_code,
        "attempts": record.attempts,
        "started_at": record.started_at.to_rfc3339(),
        "finished_at": record.finished_at.to_rfc3339(),
        "duration_ms": record.duration_ms(),
    });

    if let Some(ref err) = record.error {
        payload["error"] = serde_json::json!(err);
    }

    if let Some(ref forwarded) = record.forwarded {
        let mut keys: Vec<&String> = forwarded.keys().collect();
        keys.sort();
        payload["data_keys"] = serde_json::json!(keys);
    }

    payload
}

/// Builds the payload describing a finished run.
#[must_use]
pub fn build_run_payload(report: &RunReport) -> serde_json::Value {
    let mut verdict_counts: BTreeMap<String, u32> = BTreeMap::new();
    for record in &report.history {
        *verdict_counts.entry(record.verdict.to_string()).or_insert(0) += 1;
    }

    let retries: usize = report
        .history
        .iter()
        .map(|r| r.attempts.saturating_sub(1))
        .sum();

    serde_json::json!({
        "run_id": report.run_id.to_string(),
        "submission_id": report.submission_id,
        "pipeline_name": report.pipeline,
        "status": report.status.to_string(),
        "failed_stage": report.failed_stage,
        "error_kind": report.error_kind.map(|k| k.to_string()),
        "record_key": report.record_key,
        "duration_ms": report.duration_ms(),
        "retries": retries,
        "verdict_counts": verdict_counts,
        "stage_details": report.history.iter().map(build_stage_payload).collect::<Vec<_>>(),
    })
}

/// Emits one `run.summary` event per finished run.
pub struct RunSummaryEmitter {
    sink: Arc<dyn EventSink>,
}

impl RunSummaryEmitter {
    /// Creates an emitter writing to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Emits the summary of `report`.
    pub fn emit(&self, report: &RunReport) {
        self.sink.try_emit(RUN_SUMMARY, Some(build_run_payload(report)));
    }
}

impl std::fmt::Debug for RunSummaryEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunSummaryEmitter").finish_non_exhaustive()
    }
}
