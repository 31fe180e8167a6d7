//! In-process record store.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{PersistedRecord, RecordStore, WriteMode, WriteOutcome};
use crate::errors::PersistenceError;

/// A record store held in memory, keyed by `(table, key)`.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: DashMap<(String, String), PersistedRecord>,
    writes: AtomicUsize,
}

impl InMemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls that reached the store.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored records across all tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns every record in `table`, sorted by key.
    #[must_use]
    pub fn records(&self, table: &str) -> Vec<PersistedRecord> {
        let mut records: Vec<PersistedRecord> = self
            .records
            .iter()
            .filter(|entry| entry.key().0 == table)
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    /// Removes every record.
    pub fn clear(&self) {
        self.records.clear();
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn put(
        &self,
        record: PersistedRecord,
        mode: WriteMode,
    ) -> Result<WriteOutcome, PersistenceError> {
        self.writes.fetch_add(1, Ordering::SeqCst);

        let id = (record.table.clone(), record.key.clone());
        match self.records.entry(id) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(WriteOutcome::Inserted)
            }
            Entry::Occupied(mut existing) => match mode {
                WriteMode::InsertOnly => {
                    Err(PersistenceError::duplicate_key(record.table, record.key))
                }
                WriteMode::Upsert => {
                    let outcome = if existing.get().same_content(&record) {
                        WriteOutcome::Unchanged
                    } else {
                        WriteOutcome::Overwritten
                    };
                    existing.insert(record);
                    Ok(outcome)
                }
            },
        }
    }

    async fn get(
        &self,
        table: &str,
        key: &str,
    ) -> Result<Option<PersistedRecord>, PersistenceError> {
        Ok(self
            .records
            .get(&(table.to_string(), key.to_string()))
            .map(|entry| entry.value().clone()))
    }
}
