//! The persistence step and the record stores behind it.
//!
//! Persistence runs only after every validation stage has passed, exactly
//! once per accepted run. Store failures are surfaced as
//! [`PersistenceError`] and end the run in `errored`; the orchestrator
//! never retries them.

mod file;
mod memory;

pub use file::FileRecordStore;
pub use memory::InMemoryRecordStore;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::core::Payload;
use crate::errors::PersistenceError;

/// Default target table.
pub const DEFAULT_TABLE: &str = "records";

/// Default field the record key is read from.
pub const DEFAULT_KEY_FIELD: &str = "email";

/// Default write deadline in milliseconds.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;

/// Checks that a table name is a single plain path segment.
///
/// Table names become directory names in file-backed stores, so anything
/// outside `[A-Za-z0-9_-]` is refused.
///
/// # Errors
///
/// Returns [`PersistenceError::InvalidRecord`] for an empty name or one
/// containing separators, dots or other characters.
pub fn validate_table(table: &str) -> Result<(), PersistenceError> {
    if table.is_empty() {
        return Err(PersistenceError::invalid_record("table name is empty"));
    }
    if let Some(c) = table
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(PersistenceError::invalid_record(format!(
            "table name '{table}' contains '{c}'"
        )));
    }
    Ok(())
}

/// How a write treats an existing record with the same key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Overwrite an existing record.
    #[default]
    Upsert,
    /// Refuse to overwrite; an existing key is a [`PersistenceError::DuplicateKey`].
    InsertOnly,
}

/// What a successful write did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// No record existed under the key.
    Inserted,
    /// A record with different content was replaced.
    Overwritten,
    /// A record with identical content already existed.
    Unchanged,
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inserted => write!(f, "inserted"),
            Self::Overwritten => write!(f, "overwritten"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// A record as written to a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    /// Target table.
    pub table: String,
    /// Unique record key.
    pub key: String,
    /// The run that accepted the record.
    pub run_id: Uuid,
    /// The submission the record came from.
    pub submission_id: String,
    /// The final forwarded payload.
    pub fields: Payload,
    /// SHA-256 of the serialized fields, hex encoded.
    pub fingerprint: String,
    /// When the record was handed to the store.
    pub persisted_at: DateTime<Utc>,
}

impl PersistedRecord {
    /// Creates a record and computes its fingerprint.
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        key: impl Into<String>,
        run_id: Uuid,
        submission_id: impl Into<String>,
        fields: Payload,
    ) -> Self {
        let fingerprint = fingerprint(&fields);
        Self {
            table: table.into(),
            key: key.into(),
            run_id,
            submission_id: submission_id.into(),
            fields,
            fingerprint,
            persisted_at: Utc::now(),
        }
    }

    /// Whether two records carry the same content.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

/// Computes the content fingerprint of a payload.
///
/// Payload maps keep their keys sorted, so equal payloads always serialize
/// to the same bytes.
#[must_use]
pub fn fingerprint(fields: &Payload) -> String {
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(fields).unwrap_or_default());
    hex::encode(hasher.finalize())
}

/// A durable store for accepted records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Writes a record.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::DuplicateKey`] in insert-only mode when
    /// the key exists, or a connectivity/IO error.
    async fn put(
        &self,
        record: PersistedRecord,
        mode: WriteMode,
    ) -> Result<WriteOutcome, PersistenceError>;

    /// Reads a record back.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn get(&self, table: &str, key: &str)
        -> Result<Option<PersistedRecord>, PersistenceError>;
}

/// Persistence settings, fixed for the lifetime of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Target table.
    pub table: String,
    /// Payload field holding the record key. `None` keys by submission id.
    pub key_field: Option<String>,
    /// Write mode.
    pub write_mode: WriteMode,
    /// How long a store may take to acknowledge a write.
    pub timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            key_field: Some(DEFAULT_KEY_FIELD.to_string()),
            write_mode: WriteMode::default(),
            timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

impl PersistenceConfig {
    /// Creates a config for `table` with default key field and mode.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Sets the key field.
    #[must_use]
    pub fn with_key_field(mut self, field: Option<impl Into<String>>) -> Self {
        self.key_field = field.map(Into::into);
        self
    }

    /// Sets the write mode.
    #[must_use]
    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// Sets the write deadline.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Returns the write deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Checks the table name and write deadline.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::InvalidRecord`] for an unsafe table name
    /// or a zero deadline.
    pub fn validate(&self) -> Result<(), PersistenceError> {
        validate_table(&self.table)?;
        if self.timeout_ms == 0 {
            return Err(PersistenceError::invalid_record(
                "write timeout must be positive",
            ));
        }
        Ok(())
    }
}

/// Proof that a record was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistReceipt {
    /// Target table.
    pub table: String,
    /// The record key.
    pub key: String,
    /// What the write did.
    pub outcome: WriteOutcome,
    /// Content fingerprint of the written record.
    pub fingerprint: String,
}

/// Writes accepted records to a [`RecordStore`].
#[derive(Clone)]
pub struct PersistenceStep {
    store: Arc<dyn RecordStore>,
    config: PersistenceConfig,
}

impl fmt::Debug for PersistenceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceStep")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PersistenceStep {
    /// Creates a persistence step.
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, config: PersistenceConfig) -> Self {
        Self { store, config }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Resolves the record key for a payload.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::InvalidRecord`] when the key field is
    /// missing, blank, or not a string or number.
    pub fn record_key(
        &self,
        submission_id: &str,
        payload: &Payload,
    ) -> Result<String, PersistenceError> {
        let Some(field) = self.config.key_field.as_deref() else {
            return Ok(submission_id.to_string());
        };

        match payload.get(field) {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
            Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
            Some(serde_json::Value::String(_)) => Err(PersistenceError::invalid_record(format!(
                "key field '{field}' is blank"
            ))),
            Some(_) => Err(PersistenceError::invalid_record(format!(
                "key field '{field}' must be a string or number"
            ))),
            None => Err(PersistenceError::invalid_record(format!(
                "key field '{field}' is missing"
            ))),
        }
    }

    /// Persists the final forwarded payload of an accepted run.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistenceError`] when the record cannot be keyed, the
    /// table name is unsafe, or the store refuses, fails or stalls the write.
    pub async fn persist(
        &self,
        run_id: Uuid,
        submission_id: &str,
        payload: &Payload,
    ) -> Result<PersistReceipt, PersistenceError> {
        validate_table(&self.config.table)?;
        let key = self.record_key(submission_id, payload)?;
        let record = PersistedRecord::new(
            &self.config.table,
            &key,
            run_id,
            submission_id,
            payload.clone(),
        );
        let fingerprint = record.fingerprint.clone();

        let write = self.store.put(record, self.config.write_mode);
        let outcome = tokio::time::timeout(self.config.timeout(), write)
            .await
            .map_err(|_| {
                tracing::warn!(
                    run_id = %run_id,
                    table = %self.config.table,
                    timeout_ms = self.config.timeout_ms,
                    "Record write timed out"
                );
                PersistenceError::timeout(&self.config.table, self.config.timeout_ms)
            })??;

        tracing::debug!(
            run_id = %run_id,
            table = %self.config.table,
            key = %key,
            outcome = %outcome,
            "Record persisted"
        );

        Ok(PersistReceipt {
            table: self.config.table.clone(),
            key,
            outcome,
            fingerprint,
        })
    }
}
