//! External validators and the adapter that calls them.
//!
//! A validator is a black box: it receives `{ "body": payload }` and answers
//! with a status code plus the payload to forward. The engine never looks
//! inside a validator; it only normalizes what comes back.

#[cfg(feature = "http")]
mod http;
mod invoker;
mod registry;

#[cfg(feature = "http")]
pub use http::HttpValidator;
pub use invoker::{invoke, invoke_with_retry, normalize_response, request_envelope};
pub use registry::ValidatorRegistry;

use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for external validation functions.
#[async_trait]
pub trait Validator: Send + Sync + Debug {
    /// Returns the name of the validator.
    fn name(&self) -> &str;

    /// Calls the validator with a request envelope and returns its raw response.
    ///
    /// Errors mean the validator could not be reached or did not answer;
    /// a business rejection is a successful call carrying the rejection code.
    async fn call(&self, request: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

/// A validator backed by a synchronous closure.
pub struct FnValidator<F>
where
    F: Fn(serde_json::Value) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnValidator<F>
where
    F: Fn(serde_json::Value) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    /// Creates a new closure-backed validator.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnValidator<F>
where
    F: Fn(serde_json::Value) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnValidator")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F> Validator for FnValidator<F>
where
    F: Fn(serde_json::Value) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        (self.func)(request)
    }
}

/// A validator that forwards every payload unchanged with status 200.
#[derive(Debug, Clone)]
pub struct PassThroughValidator {
    name: String,
}

impl PassThroughValidator {
    /// Creates a new pass-through validator.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Validator for PassThroughValidator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let body = request
            .get("body")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        Ok(envelope(200, body))
    }
}

/// Builds a response in the invoke envelope validators answer with:
/// `{ "statusCode": code, "Payload": { "body": body } }`.
#[must_use]
pub fn envelope(status_code: i64, body: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "statusCode": status_code,
        "Payload": { "body": body },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_validator() {
        let validator = FnValidator::new("echo", |request| Ok(envelope(200, request["body"].clone())));
        assert_eq!(validator.name(), "echo");

        let response = validator.call(json!({"body": {"a": 1}})).await.unwrap();
        assert_eq!(response["statusCode"], 200);
        assert_eq!(response["Payload"]["body"]["a"], 1);
    }

    #[tokio::test]
    async fn test_fn_validator_error() {
        let validator = FnValidator::new("down", |_| Err(anyhow::anyhow!("connection refused")));
        let err = validator.call(json!({"body": {}})).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_pass_through_validator() {
        let validator = PassThroughValidator::new("noop");
        let response = validator.call(json!({"body": {"x": "y"}})).await.unwrap();
        assert_eq!(response, envelope(200, json!({"x": "y"})));
    }
}
