//! Record store backed by one JSON document per record.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{validate_table, PersistedRecord, RecordStore, WriteMode, WriteOutcome};
use crate::errors::PersistenceError;

/// Stores records under `<root>/<table>/<sha256(key)>.json`.
///
/// Table names must be a single `[A-Za-z0-9_-]` segment, so every file
/// stays under the root.
///
/// Every write goes to a temporary file first. Upserts rename it over the
/// target; insert-only writes hard-link it into place, which fails if the
/// target exists. Readers never observe a partially written record.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    root: PathBuf,
}

impl FileRecordStore {
    /// Creates a store rooted at `root`. Directories are created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the path a record is stored at.
    #[must_use]
    pub fn record_path(&self, table: &str, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        self.root
            .join(table)
            .join(format!("{}.json", hex::encode(hasher.finalize())))
    }

    async fn read_record(
        path: &Path,
        table: &str,
    ) -> Result<Option<PersistedRecord>, PersistenceError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| PersistenceError::io(table, e)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::io(table, e)),
        }
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn put(
        &self,
        record: PersistedRecord,
        mode: WriteMode,
    ) -> Result<WriteOutcome, PersistenceError> {
        validate_table(&record.table)?;
        let table = record.table.clone();
        let path = self.record_path(&record.table, &record.key);
        let dir = self.root.join(&record.table);

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PersistenceError::unavailable(&table, e.to_string()))?;

        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| PersistenceError::invalid_record(e.to_string()))?;
        let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| PersistenceError::io(&table, e))?;

        let result = match mode {
            WriteMode::InsertOnly => match tokio::fs::hard_link(&tmp, &path).await {
                Ok(()) => Ok(WriteOutcome::Inserted),
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                    Err(PersistenceError::duplicate_key(&table, &record.key))
                }
                Err(e) => Err(PersistenceError::io(&table, e)),
            },
            WriteMode::Upsert => {
                let outcome = match Self::read_record(&path, &table).await {
                    Ok(None) => WriteOutcome::Inserted,
                    Ok(Some(existing)) if existing.same_content(&record) => {
                        WriteOutcome::Unchanged
                    }
                    Ok(Some(_)) | Err(_) => WriteOutcome::Overwritten,
                };
                tokio::fs::rename(&tmp, &path)
                    .await
                    .map(|()| outcome)
                    .map_err(|e| PersistenceError::io(&table, e))
            }
        };

        if mode == WriteMode::InsertOnly || result.is_err() {
            if let Err(e) = tokio::fs::remove_file(&tmp).await {
                if e.kind() != IoErrorKind::NotFound {
                    tracing::warn!(path = %tmp.display(), error = %e, "Failed to remove temp file");
                }
            }
        }

        result
    }

    async fn get(
        &self,
        table: &str,
        key: &str,
    ) -> Result<Option<PersistedRecord>, PersistenceError> {
        validate_table(table)?;
        Self::read_record(&self.record_path(table, key), table).await
    }
}
