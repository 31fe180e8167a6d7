//! Uniform adapter between stages and their validators.

use std::time::Duration;

use serde_json::Value;

use crate::core::{Payload, StageResult};
use crate::errors::InvocationFailure;
use crate::pipeline::{with_retry, RetryOutcome, StageDefinition};

const STATUS_CODE_FIELD: &str = "statusCode";
const PAYLOAD_FIELD: &str = "Payload";
const BODY_FIELD: &str = "body";

/// Wraps a payload in the request envelope validators expect.
#[must_use]
pub fn request_envelope(payload: &Payload) -> Value {
    serde_json::json!({ "body": payload })
}

/// Normalizes a raw validator response into a [`StageResult`].
///
/// Accepts `{ "statusCode", "Payload": { "body" } }` and the flat
/// `{ "statusCode", "body" }`. The body may be an object or a string holding
/// an encoded object. An absent status code is kept as `None`.
///
/// # Errors
///
/// Returns [`InvocationFailure::Malformed`] when the response is not an
/// object, the status code is not an integer, or no object body is found.
pub fn normalize_response(stage: &str, raw: Value) -> Result<StageResult, InvocationFailure> {
    let Some(envelope) = raw.as_object() else {
        return Err(InvocationFailure::malformed(
            stage,
            "response is not a JSON object",
        ));
    };

    let status_code = match envelope.get(STATUS_CODE_FIELD) {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(n.as_i64().ok_or_else(|| {
            InvocationFailure::malformed(stage, format!("statusCode {n} is not an integer"))
        })?),
        Some(other) => {
            return Err(InvocationFailure::malformed(
                stage,
                format!("statusCode must be an integer, got {other}"),
            ))
        }
    };

    let body = match envelope.get(PAYLOAD_FIELD) {
        Some(Value::Object(inner)) => inner.get(BODY_FIELD),
        Some(_) => {
            return Err(InvocationFailure::malformed(
                stage,
                "Payload is not a JSON object",
            ))
        }
        None => envelope.get(BODY_FIELD),
    };

    let data = match body {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(InvocationFailure::malformed(
                    stage,
                    "encoded body is not a JSON object",
                ))
            }
            Err(e) => {
                return Err(InvocationFailure::malformed(
                    stage,
                    format!("body is not valid JSON: {e}"),
                ))
            }
        },
        Some(_) => {
            return Err(InvocationFailure::malformed(
                stage,
                "body is not a JSON object",
            ))
        }
        None => return Err(InvocationFailure::malformed(stage, "response has no body")),
    };

    Ok(StageResult::new(status_code, data).with_raw(raw))
}

/// Invokes a stage's validator once, bounded by the stage timeout.
///
/// # Errors
///
/// Returns an [`InvocationFailure`] when the validator cannot be reached,
/// answers with a malformed response, or does not answer in time.
pub async fn invoke(
    stage: &StageDefinition,
    payload: &Payload,
) -> Result<StageResult, InvocationFailure> {
    let request = request_envelope(payload);

    match tokio::time::timeout(stage.timeout, stage.validator.call(request)).await {
        Ok(Ok(raw)) => normalize_response(&stage.name, raw),
        Ok(Err(e)) => Err(InvocationFailure::unreachable(&stage.name, format!("{e:#}"))),
        Err(_) => Err(InvocationFailure::timeout(&stage.name, stage.timeout_ms())),
    }
}

/// Invokes a stage's validator under the stage retry policy.
///
/// Every [`InvocationFailure`] is retried until the policy is exhausted.
/// Rejections are successful calls and are never retried. `on_retry`
/// receives the failed attempt number, the failure and the delay before the
/// next attempt.
pub async fn invoke_with_retry<R>(
    stage: &StageDefinition,
    payload: &Payload,
    on_retry: R,
) -> RetryOutcome<StageResult, InvocationFailure>
where
    R: FnMut(usize, &InvocationFailure, Duration),
{
    with_retry(&stage.retry, |_| true, on_retry, || invoke(stage, payload)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineBuilder, RetryConfig, StageSpec};
    use crate::validators::{envelope, FnValidator, Validator};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    fn single_stage(validator: Arc<dyn Validator>, retry: RetryConfig) -> StageDefinition {
        PipelineBuilder::new("test")
            .stage_spec(
                StageSpec::new("check", validator)
                    .with_timeout(Duration::from_millis(50))
                    .with_retry(retry),
            )
            .build()
            .unwrap()
            .stages()[0]
            .clone()
    }

    #[derive(Debug)]
    struct SlowValidator;

    #[async_trait]
    impl Validator for SlowValidator {
        fn name(&self) -> &str {
            "slow"
        }

        async fn call(&self, request: Value) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(envelope(200, request["body"].clone()))
        }
    }

    #[test]
    fn test_request_envelope() {
        let p = payload(json!({"email": "x@y.com"}));
        assert_eq!(request_envelope(&p), json!({"body": {"email": "x@y.com"}}));
    }

    #[test]
    fn test_normalize_lambda_envelope() {
        let raw = json!({"statusCode": 200, "Payload": {"body": {"email": "x@y.com"}}});
        let result = normalize_response("check", raw.clone()).unwrap();

        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.data, payload(json!({"email": "x@y.com"})));
        assert_eq!(result.raw, raw);
    }

    #[test]
    fn test_normalize_flat_envelope_with_encoded_body() {
        let raw = json!({"statusCode": 400, "body": "{\"email\": \"bad\"}"});
        let result = normalize_response("check", raw).unwrap();

        assert_eq!(result.status_code, Some(400));
        assert_eq!(result.data, payload(json!({"email": "bad"})));
    }

    #[test]
    fn test_normalize_missing_status_code() {
        let result = normalize_response("check", json!({"body": {"a": 1}})).unwrap();
        assert_eq!(result.status_code, None);
    }

    #[test]
    fn test_normalize_malformed_responses() {
        let cases = [
            json!("ok"),
            json!({"statusCode": "200", "body": {}}),
            json!({"statusCode": 200.5, "body": {}}),
            json!({"statusCode": 200}),
            json!({"statusCode": 200, "Payload": []}),
            json!({"statusCode": 200, "body": [1, 2]}),
            json!({"statusCode": 200, "body": "not json"}),
            json!({"statusCode": 200, "body": "[1]"}),
        ];

        for raw in cases {
            let err = normalize_response("check", raw.clone()).unwrap_err();
            assert!(
                matches!(err, InvocationFailure::Malformed { .. }),
                "expected malformed for {raw}"
            );
        }
    }

    #[tokio::test]
    async fn test_invoke_forwards_body_only() {
        let validator = Arc::new(FnValidator::new("check", |request| {
            let mut body = request["body"].clone();
            body["checked"] = json!(true);
            Ok(envelope(200, body))
        }));
        let stage = single_stage(validator, RetryConfig::none());

        let result = invoke(&stage, &payload(json!({"email": "x@y.com"}))).await.unwrap();
        assert_eq!(
            result.data,
            payload(json!({"email": "x@y.com", "checked": true}))
        );
    }

    #[tokio::test]
    async fn test_invoke_transport_error_is_unreachable() {
        let validator = Arc::new(FnValidator::new("check", |_| {
            Err(anyhow::anyhow!("connection refused"))
        }));
        let stage = single_stage(validator, RetryConfig::none());

        let err = invoke(&stage, &Payload::new()).await.unwrap_err();
        assert!(matches!(err, InvocationFailure::Unreachable { .. }));
        assert_eq!(err.stage(), "check");
    }

    #[tokio::test]
    async fn test_invoke_timeout() {
        let stage = single_stage(Arc::new(SlowValidator), RetryConfig::none());

        let err = invoke(&stage, &Payload::new()).await.unwrap_err();
        assert_eq!(err, InvocationFailure::timeout("check", 50));
    }

    #[tokio::test]
    async fn test_invoke_with_retry_recovers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let validator = Arc::new(FnValidator::new("check", move |request| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow::anyhow!("throttled"))
            } else {
                Ok(envelope(200, request["body"].clone()))
            }
        }));
        let retry = RetryConfig::new().with_max_attempts(3).with_base_delay_ms(1);
        let stage = single_stage(validator, retry);

        let mut retries = Vec::new();
        let outcome = invoke_with_retry(&stage, &Payload::new(), |attempt, _, _| {
            retries.push(attempt);
        })
        .await;

        assert!(outcome.result.is_ok());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(retries, vec![1, 2]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invoke_with_retry_never_retries_rejection() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let validator = Arc::new(FnValidator::new("check", move |request| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(envelope(400, request["body"].clone()))
        }));
        let retry = RetryConfig::new().with_max_attempts(3).with_base_delay_ms(1);
        let stage = single_stage(validator, retry);

        let outcome = invoke_with_retry(&stage, &Payload::new(), |_, _, _| {}).await;

        assert_eq!(outcome.result.unwrap().status_code, Some(400));
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invoke_with_retry_exhausts_on_timeout() {
        let retry = RetryConfig::new().with_max_attempts(2).with_base_delay_ms(1);
        let stage = single_stage(Arc::new(SlowValidator), retry);

        let outcome = invoke_with_retry(&stage, &Payload::new(), |_, _, _| {}).await;

        assert_eq!(outcome.attempts, 2);
        assert!(outcome.result.unwrap_err().is_timeout());
    }
}
