//! Sample validators, submissions and a ready-made harness.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::{json, Value};

use crate::events::CollectingEventSink;
use crate::persistence::{InMemoryRecordStore, PersistenceConfig, PersistenceStep, RecordStore};
use crate::pipeline::{PipelineBuilder, RetryConfig};
use crate::validators::{envelope, FnValidator, Validator};
use crate::workflow::Orchestrator;

const EMAIL_PATTERN: &str = r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$";
const PINCODE_PATTERN: &str = r"^[1-9][0-9]{5}$";

fn field_check(
    name: &'static str,
    field: &'static str,
    pattern: &'static str,
    message: &'static str,
) -> Arc<dyn Validator> {
    Arc::new(FnValidator::new(name, move |request: Value| -> anyhow::Result<Value> {
        let body = request.get("body").cloned().unwrap_or_else(|| json!({}));
        let re = Regex::new(pattern)?;
        let valid = body
            .get(field)
            .and_then(Value::as_str)
            .is_some_and(|v| re.is_match(v));

        if valid {
            Ok(envelope(200, body))
        } else {
            Ok(envelope(400, json!({ "message": message })))
        }
    }))
}

/// A `check_email` validator that rejects malformed addresses.
#[must_use]
pub fn email_validator() -> Arc<dyn Validator> {
    field_check("check_email", "email", EMAIL_PATTERN, "Invalid email address")
}

/// A `check_pincode` validator that rejects anything but a six digit code.
#[must_use]
pub fn pincode_validator() -> Arc<dyn Validator> {
    field_check("check_pincode", "pincode", PINCODE_PATTERN, "Invalid pincode")
}

/// A submission both sample validators accept.
#[must_use]
pub fn valid_submission() -> Value {
    json!({
        "email": "jane@example.com",
        "user_name": "jane",
        "pincode": "560001",
    })
}

/// A submission with a malformed email address.
#[must_use]
pub fn invalid_email_submission() -> Value {
    json!({
        "email": "jane-at-example",
        "user_name": "jane",
        "pincode": "560001",
    })
}

/// A submission with a malformed pincode.
#[must_use]
pub fn invalid_pincode_submission() -> Value {
    json!({
        "email": "jane@example.com",
        "user_name": "jane",
        "pincode": "56",
    })
}

/// An orchestrator wired to in-memory collaborators.
#[derive(Debug)]
pub struct TestHarness {
    /// The orchestrator under test.
    pub orchestrator: Arc<Orchestrator>,
    /// Collected lifecycle events.
    pub events: Arc<CollectingEventSink>,
}

impl TestHarness {
    /// Builds a linear pipeline over `validators` with an in-memory store.
    ///
    /// Stages time out after 100ms and retry up to three times with a 1ms
    /// base delay.
    ///
    /// # Panics
    ///
    /// Panics if the validators do not form a valid pipeline.
    #[must_use]
    pub fn new(validators: Vec<Arc<dyn Validator>>) -> (Self, Arc<InMemoryRecordStore>) {
        let store = Arc::new(InMemoryRecordStore::new());
        let harness = Self::with_store(validators, store.clone(), PersistenceConfig::new("users"));
        (harness, store)
    }

    /// Builds a linear pipeline over `validators` with a caller-provided store.
    ///
    /// # Panics
    ///
    /// Panics if the validators do not form a valid pipeline.
    #[must_use]
    pub fn with_store(
        validators: Vec<Arc<dyn Validator>>,
        store: Arc<dyn RecordStore>,
        persistence: PersistenceConfig,
    ) -> Self {
        let builder = validators.into_iter().fold(
            PipelineBuilder::new("ingest")
                .default_timeout(Duration::from_millis(100))
                .default_retry(RetryConfig::new().with_max_attempts(3).with_base_delay_ms(1)),
            |builder, validator| {
                let name = validator.name().to_string();
                builder.stage(name, validator)
            },
        );

        #[allow(clippy::expect_used)]
        let pipeline = builder.build().expect("test pipeline must be valid");

        let events = Arc::new(CollectingEventSink::new());
        let orchestrator = Orchestrator::with_event_sink(
            Arc::new(pipeline),
            PersistenceStep::new(store, persistence),
            events.clone(),
        );

        Self {
            orchestrator: Arc::new(orchestrator),
            events,
        }
    }
}
