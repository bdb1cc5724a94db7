//! HTTP trigger that asks the backend to restart a job's analysis.
//!
//! The controller is stateless apart from its HTTP client: it never touches
//! a manager's connection. Callers reconnect explicitly afterwards.

use std::time::Duration;

use pulse_core::{DocumentId, ProgressError};
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::endpoint::EndpointResolver;

/// Successful restart response.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct RestartAccepted {
    /// Server message.
    #[serde(default)]
    pub message: Option<String>,
    /// Document the server restarted, as it reported it.
    #[serde(default)]
    pub document_id: Option<Value>,
}

/// Issues `POST {http_base}/api/documents/{id}/reanalyze`.
#[derive(Clone, Debug)]
pub struct RestartController {
    client: reqwest::Client,
    resolver: EndpointResolver,
}

impl RestartController {
    /// Build a controller with its own HTTP client.
    pub fn new(resolver: EndpointResolver, timeout: Duration) -> Result<Self, ProgressError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProgressError::RestartRequestFailed {
                status: None,
                detail: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self::with_client(client, resolver))
    }

    /// Build a controller around an existing HTTP client.
    pub fn with_client(client: reqwest::Client, resolver: EndpointResolver) -> Self {
        Self { client, resolver }
    }

    /// Ask the backend to restart the analysis of `id`.
    pub async fn restart_analysis(&self, id: &DocumentId) -> Result<RestartAccepted, ProgressError> {
        let url = self.resolver.restart_url(id);
        info!(document_id = %id, %url, "requesting analysis restart");

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| ProgressError::RestartRequestFailed {
                status: None,
                detail: format!("could not reach {url}: {e}"),
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let detail = parse_detail(&body).unwrap_or_else(|| generic_failure(status));
            warn!(document_id = %id, status = status.as_u16(), %detail, "analysis restart rejected");
            return Err(ProgressError::RestartRequestFailed {
                status: Some(status.as_u16()),
                detail,
            });
        }

        let accepted = serde_json::from_str(&body).unwrap_or_else(|error| {
            debug!(%error, "restart response is not a JSON object");
            RestartAccepted::default()
        });
        info!(document_id = %id, "analysis restart accepted");
        Ok(accepted)
    }
}

/// Extract the `detail` field of an error body.
fn parse_detail(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::String(_) | Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn generic_failure(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("server returned {} {reason}", status.as_u16()),
        None => format!("server returned {}", status.as_u16()),
    }
}
