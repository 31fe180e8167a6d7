//! Validators reached over HTTP.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use super::Validator;

/// A validator that POSTs the request envelope to an HTTP endpoint.
///
/// When a JSON body has no `statusCode`, the HTTP status is used instead, so
/// endpoints may answer a rejection with a plain `400` and a JSON body. A body
/// that is not JSON is passed on as a string and fails normalization as
/// malformed. Transport failures and `5xx` answers are call errors.
#[derive(Debug, Clone)]
pub struct HttpValidator {
    name: String,
    endpoint: String,
    client: Client,
}

impl HttpValidator {
    /// Creates a validator for `endpoint` with a default client.
    #[must_use]
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::with_client(name, endpoint, Client::new())
    }

    /// Creates a validator sharing an existing client.
    #[must_use]
    pub fn with_client(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        client: Client,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            client,
        }
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Validator for HttpValidator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: Value) -> anyhow::Result<Value> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            anyhow::bail!("validator endpoint {} answered {status}", self.endpoint);
        }

        let text = response.text().await?;
        Ok(decode_body(status, &text))
    }
}

fn decode_body(status: StatusCode, text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(mut body) => {
            if let Value::Object(map) = &mut body {
                map.entry("statusCode")
                    .or_insert_with(|| Value::from(status.as_u16()));
            }
            body
        }
        Err(e) => {
            tracing::debug!(
                status = %status,
                error = %e,
                "Validator answered with a non-JSON body"
            );
            Value::String(text.to_string())
        }
    }
}
