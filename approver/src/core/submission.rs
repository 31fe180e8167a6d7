//! Submitted records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::IntakeError;

/// A mapping of named fields, as carried between stages.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Field holding the caller-supplied submission identifier.
pub const ID_FIELD: &str = "id";

/// Field holding free-form caller metadata.
pub const METADATA_FIELD: &str = "metadata";

/// A record a user wants ingested.
///
/// The record fields are immutable once the submission is built; stages
/// forward new payloads rather than editing this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Unique identifier, assigned at intake when the caller sent none.
    pub id: String,
    /// The named record fields (contact address, location code, ...).
    pub fields: Payload,
    /// Free-form metadata that never reaches the validators.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: Payload,
}

impl Submission {
    /// Creates a submission with a generated identifier.
    #[must_use]
    pub fn new(fields: Payload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            fields,
            metadata: Payload::new(),
        }
    }

    /// Sets the identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Builds a submission from a raw JSON document.
    ///
    /// `id` and `metadata` are lifted out of the document; every other
    /// top-level entry is a record field. At least one record field is
    /// required.
    ///
    /// # Errors
    ///
    /// Returns an [`IntakeError`] when the document is not an object, has no
    /// record fields, or carries an unusable `id` or `metadata`.
    pub fn from_raw(raw: serde_json::Value) -> Result<Self, IntakeError> {
        let mut fields = match raw {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(IntakeError::NotAnObject {
                    found: json_type_name(&other).to_string(),
                })
            }
        };

        let id = match fields.remove(ID_FIELD) {
            None | Some(serde_json::Value::Null) => Uuid::new_v4().to_string(),
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            Some(_) => return Err(IntakeError::InvalidId),
        };

        let metadata = match fields.remove(METADATA_FIELD) {
            None | Some(serde_json::Value::Null) => Payload::new(),
            Some(serde_json::Value::Object(map)) => map,
            Some(_) => return Err(IntakeError::InvalidMetadata),
        };

        if fields.is_empty() {
            return Err(IntakeError::EmptyPayload);
        }

        Ok(Self {
            id,
            fields,
            metadata,
        })
    }

    /// Returns a record field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
