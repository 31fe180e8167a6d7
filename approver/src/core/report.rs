//! Audit records and terminal run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::{ErrorKind, Payload, RunStatus, StageVerdict};

/// Audit entry for one stage a run traversed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    /// Stage name.
    pub stage: String,
    /// Position of the stage in the pipeline.
    pub index: usize,
    /// What the stage decided.
    pub verdict: StageVerdict,
    /// Status code returned by the validator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i64>,
    /// Number of validator calls made, retries included.
    pub attempts: usize,
    /// Payload forwarded to the next step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded: Option<Payload>,
    /// Raw validator response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,
    /// Error message when the stage errored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the first attempt started.
    pub started_at: DateTime<Utc>,
    /// When the verdict was reached.
    pub finished_at: DateTime<Utc>,
}

impl StageRecord {
    /// Returns the stage duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Terminal outcome of a workflow run.
///
/// Serialized in camelCase so the wire shape is
/// `{ runId, status, failedStage?, reason?, ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Identifier of the submission the run processed.
    pub submission_id: String,
    /// Name of the pipeline that governed the run.
    pub pipeline: String,
    /// Terminal status.
    pub status: RunStatus,
    /// Name of the stage that ended the run, for rejections and stage faults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<String>,
    /// Index of the stage that ended the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage_index: Option<usize>,
    /// Human-readable reason for a rejection or fault.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Fault classification for errored runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Key under which an accepted record was stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_key: Option<String>,
    /// Per-stage audit trail, in execution order.
    #[serde(default)]
    pub history: Vec<StageRecord>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached its terminal state.
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// An errored report for a run that ended without producing one.
    #[must_use]
    pub fn aborted(
        run_id: Uuid,
        submission_id: impl Into<String>,
        pipeline: impl Into<String>,
        started_at: DateTime<Utc>,
        kind: ErrorKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            submission_id: submission_id.into(),
            pipeline: pipeline.into(),
            status: RunStatus::Errored,
            failed_stage: None,
            failed_stage_index: None,
            reason: Some(reason.into()),
            error_kind: Some(kind),
            record_key: None,
            history: Vec::new(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Returns true if the record was accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.status == RunStatus::Accepted
    }

    /// Returns true if a validator rejected the record.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.status == RunStatus::Rejected
    }

    /// Returns true if an infrastructure fault ended the run.
    #[must_use]
    pub fn is_errored(&self) -> bool {
        self.status == RunStatus::Errored
    }

    /// Returns the names of the stages the run invoked, in order.
    #[must_use]
    pub fn stages_invoked(&self) -> Vec<&str> {
        self.history.iter().map(|r| r.stage.as_str()).collect()
    }

    /// Returns the run duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// Converts to the compact outcome view exposed to callers.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("runId".to_string(), serde_json::json!(self.run_id.to_string()));
        map.insert("status".to_string(), serde_json::json!(self.status.to_string()));

        if let Some(ref stage) = self.failed_stage {
            map.insert("failedStage".to_string(), serde_json::json!(stage));
        }
        if let Some(ref reason) = self.reason {
            map.insert("reason".to_string(), serde_json::json!(reason));
        }
        if let Some(kind) = self.error_kind {
            map.insert("errorKind".to_string(), serde_json::json!(kind.to_string()));
        }

        map
    }
}
