//! Normalized validator results.

use super::Payload;
use serde::{Deserialize, Serialize};

/// The output of invoking one validator.
///
/// Only `data` travels to the next stage. The raw envelope is kept so the
/// run's audit trail shows exactly what the validator answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Status code reported by the validator, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i64>,
    /// The forwarded payload.
    pub data: Payload,
    /// The validator's full response.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub raw: serde_json::Value,
}

impl StageResult {
    /// Creates a result with a status code and forwarded payload.
    #[must_use]
    pub fn new(status_code: Option<i64>, data: Payload) -> Self {
        Self {
            status_code,
            data,
            raw: serde_json::Value::Null,
        }
    }

    /// Attaches the raw validator response.
    #[must_use]
    pub fn with_raw(mut self, raw: serde_json::Value) -> Self {
        self.raw = raw;
        self
    }

    /// Returns true when the status code equals `rejection_code` exactly.
    #[must_use]
    pub fn is_rejection(&self, rejection_code: i64) -> bool {
        self.status_code == Some(rejection_code)
    }
}
