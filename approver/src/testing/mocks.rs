//! Mock validators and stores for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::Payload;
use crate::errors::PersistenceError;
use crate::persistence::{InMemoryRecordStore, PersistedRecord, RecordStore, WriteMode, WriteOutcome};
use crate::validators::{envelope, Validator};

/// One scripted validator answer.
#[derive(Debug, Clone)]
pub enum Step {
    /// Echo the request body with status 200.
    Pass,
    /// Echo the request body with status 400.
    Reject,
    /// Answer with status 400 and a `message` in the body.
    RejectWith(String),
    /// Echo the request body with an arbitrary status code.
    Status(i64),
    /// Answer with this exact raw response.
    Respond(serde_json::Value),
    /// Fail the call as if the validator were unreachable.
    Fail(String),
    /// Never answer within any reasonable timeout.
    Hang,
    /// Panic inside the call.
    Panic(String),
}

/// Shared log of validator names, in call order across validators.
pub type CallOrder = Arc<Mutex<Vec<String>>>;

/// A validator that follows a script and records every call.
///
/// Scripted steps are consumed in order; once exhausted the fallback step
/// answers every further call.
#[derive(Debug)]
pub struct ScriptedValidator {
    name: String,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: Mutex<Vec<Payload>>,
    order: Option<CallOrder>,
}

impl ScriptedValidator {
    /// Creates a validator whose fallback is `fallback`.
    #[must_use]
    pub fn new(name: impl Into<String>, fallback: Step) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: Mutex::new(Vec::new()),
            order: None,
        }
    }

    /// A validator that passes every record.
    #[must_use]
    pub fn passing(name: impl Into<String>) -> Self {
        Self::new(name, Step::Pass)
    }

    /// A validator that rejects every record.
    #[must_use]
    pub fn rejecting(name: impl Into<String>) -> Self {
        Self::new(name, Step::Reject)
    }

    /// A validator that is always unreachable.
    #[must_use]
    pub fn failing(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(name, Step::Fail(error.into()))
    }

    /// A validator that never answers.
    #[must_use]
    pub fn hanging(name: impl Into<String>) -> Self {
        Self::new(name, Step::Hang)
    }

    /// Queues a step ahead of the fallback.
    #[must_use]
    pub fn then(self, step: Step) -> Self {
        self.script.lock().push_back(step);
        self
    }

    /// Records calls into a log shared with other validators.
    #[must_use]
    pub fn with_call_order(mut self, order: CallOrder) -> Self {
        self.order = Some(order);
        self
    }

    /// Returns the number of calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the payload of every call, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Payload> {
        self.calls.lock().clone()
    }

    /// Returns the payload of the most recent call.
    #[must_use]
    pub fn last_call(&self) -> Option<Payload> {
        self.calls.lock().last().cloned()
    }
}

#[async_trait]
impl Validator for ScriptedValidator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let body = request.get("body").cloned().unwrap_or_default();
        self.calls
            .lock()
            .push(body.as_object().cloned().unwrap_or_default());
        if let Some(order) = &self.order {
            order.lock().push(self.name.clone());
        }

        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Pass => Ok(envelope(200, body)),
            Step::Reject => Ok(envelope(400, body)),
            Step::RejectWith(message) => Ok(envelope(400, serde_json::json!({ "message": message }))),
            Step::Status(code) => Ok(envelope(code, body)),
            Step::Respond(raw) => Ok(raw),
            Step::Fail(error) => Err(anyhow::anyhow!(error)),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(envelope(200, body))
            }
            Step::Panic(message) => panic!("{message}"),
        }
    }
}

/// A store that fails a number of writes before delegating to memory.
#[derive(Debug, Default)]
pub struct FlakyRecordStore {
    inner: InMemoryRecordStore,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyRecordStore {
    /// Fails the first `failures` writes with an unavailable error.
    #[must_use]
    pub fn new(failures: usize) -> Self {
        Self {
            inner: InMemoryRecordStore::new(),
            failures_left: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }

    /// A store that never accepts a write.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::new(usize::MAX)
    }

    /// Number of writes attempted, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// The records that were actually stored.
    #[must_use]
    pub fn inner(&self) -> &InMemoryRecordStore {
        &self.inner
    }
}

#[async_trait]
impl RecordStore for FlakyRecordStore {
    async fn put(
        &self,
        record: PersistedRecord,
        mode: WriteMode,
    ) -> Result<WriteOutcome, PersistenceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PersistenceError::unavailable(record.table, "connection reset"));
        }
        self.inner.put(record, mode).await
    }

    async fn get(
        &self,
        table: &str,
        key: &str,
    ) -> Result<Option<PersistedRecord>, PersistenceError> {
        self.inner.get(table, key).await
    }
}

/// A store whose writes never complete.
#[derive(Debug, Default, Clone, Copy)]
pub struct StalledRecordStore;

#[async_trait]
impl RecordStore for StalledRecordStore {
    async fn put(
        &self,
        _record: PersistedRecord,
        _mode: WriteMode,
    ) -> Result<WriteOutcome, PersistenceError> {
        std::future::pending().await
    }

    async fn get(
        &self,
        _table: &str,
        _key: &str,
    ) -> Result<Option<PersistedRecord>, PersistenceError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let validator = ScriptedValidator::passing("check")
            .then(Step::Fail("down".to_string()))
            .then(Step::Reject);

        assert!(validator.call(json!({"body": {"a": 1}})).await.is_err());
        let rejected = validator.call(json!({"body": {"a": 1}})).await.unwrap();
        assert_eq!(rejected["statusCode"], 400);
        let passed = validator.call(json!({"body": {"a": 2}})).await.unwrap();
        assert_eq!(passed["statusCode"], 200);

        assert_eq!(validator.call_count(), 3);
        assert_eq!(validator.last_call().unwrap()["a"], 2);
    }

    #[tokio::test]
    async fn test_shared_call_order() {
        let order = CallOrder::default();
        let a = ScriptedValidator::passing("a").with_call_order(Arc::clone(&order));
        let b = ScriptedValidator::passing("b").with_call_order(Arc::clone(&order));

        b.call(json!({"body": {}})).await.unwrap();
        a.call(json!({"body": {}})).await.unwrap();

        assert_eq!(*order.lock(), vec!["b".to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn test_flaky_store() {
        let store = FlakyRecordStore::new(1);
        let fields = json!({"email": "a@b.c"}).as_object().cloned().unwrap();
        let record = PersistedRecord::new("users", "a@b.c", uuid::Uuid::new_v4(), "s", fields);

        assert!(store.put(record.clone(), WriteMode::Upsert).await.is_err());
        assert!(store.put(record, WriteMode::Upsert).await.is_ok());
        assert_eq!(store.attempts(), 2);
        assert_eq!(store.inner().len(), 1);
    }
}
