//! API polling executor: one HTTP request per tick.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{Executor, parse_payload};
use crate::error::ExecutionError;
use crate::process::ProcessKind;

/// Longest response body excerpt carried in an error message.
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Deserialize)]
struct ApiPollingPayload {
    endpoint: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<serde_json::Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Issues the configured request; non-2xx responses are failures.
pub struct ApiPollingExecutor {
    client: reqwest::Client,
    timeout: Duration,
}

impl ApiPollingExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl Executor for ApiPollingExecutor {
    fn kind(&self) -> ProcessKind {
        ProcessKind::ApiPolling
    }

    async fn execute(
        &self,
        process_id: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ExecutionError> {
        let payload: ApiPollingPayload = parse_payload(self.kind(), payload)?;

        let method = reqwest::Method::from_bytes(payload.method.to_uppercase().as_bytes())
            .map_err(|_| ExecutionError::InvalidPayload {
                kind: self.kind().to_string(),
                reason: format!("unsupported HTTP method: {}", payload.method),
            })?;

        let mut request = self
            .client
            .request(method.clone(), &payload.endpoint)
            .timeout(self.timeout);
        for (name, value) in &payload.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request = match payload.body {
            Some(serde_json::Value::String(text)) => request.body(text),
            Some(body) => request.json(&body),
            None => request,
        };

        tracing::debug!(
            process_id = %process_id,
            method = %method,
            endpoint = %payload.endpoint,
            "Polling endpoint"
        );

        let response = request
            .send()
            .await
            .map_err(|e| ExecutionError::Http(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExecutionError::Http(format!("reading response body: {e}")))?;

        if !status.is_success() {
            return Err(ExecutionError::HttpStatus {
                endpoint: payload.endpoint,
                status: status.as_u16(),
                body: truncate(&text, MAX_ERROR_BODY),
            });
        }

        Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
