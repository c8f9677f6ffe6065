//! NanoBanana wire protocol
//!
//! Submission returns only an opaque task id; completion is discovered by
//! polling the record-info endpoint. The API requires a callback URL in every
//! submission but no callback is ever consumed, so a dummy value is sent.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Callback URL required by the API but never called back
pub const DUMMY_CALLBACK: &str = "https://example.com/callback";

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);
const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Which submission endpoint a task goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Flash generation and edits
    Generate,
    /// Pro generation and combines
    GeneratePro,
}

impl Endpoint {
    fn path(&self) -> &'static str {
        match self {
            Endpoint::Generate => "nanobanana/generate",
            Endpoint::GeneratePro => "nanobanana/generate-pro",
        }
    }
}

/// Provider-reported state of one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// successFlag 0 - still generating
    Generating,
    /// successFlag 1
    Succeeded { image_url: String },
    /// successFlag 2 (create failed) or 3 (generate failed)
    Failed { reason: String },
}

/// Seam between the task client and the remote API
#[async_trait]
pub trait ProviderApi: Send + Sync {
    /// Submit a task, returning the provider-issued task id
    async fn create_task(&self, endpoint: Endpoint, payload: Value) -> Result<String>;

    /// Query the current status of a task
    async fn query_task(&self, task_id: &str) -> Result<TaskStatus>;

    /// Remaining credit balance for the account
    async fn credit_balance(&self) -> Result<f64>;
}

/// HTTP implementation against the NanoBanana API
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpProvider {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Network(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl ProviderApi for HttpProvider {
    async fn create_task(&self, endpoint: Endpoint, payload: Value) -> Result<String> {
        let response = self
            .client
            .post(self.url(endpoint.path()))
            .bearer_auth(&self.api_key)
            .timeout(SUBMIT_TIMEOUT)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Provider(format!(
                "task creation returned HTTP {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("malformed task creation response: {}", e)))?;

        extract_task_id(&body)
            .ok_or_else(|| Error::Provider("no task id in creation response".to_string()))
    }

    async fn query_task(&self, task_id: &str) -> Result<TaskStatus> {
        let response = self
            .client
            .get(self.url("nanobanana/record-info"))
            .bearer_auth(&self.api_key)
            .timeout(QUERY_TIMEOUT)
            .query(&[("taskId", task_id)])
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Provider(format!(
                "status query returned HTTP {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("malformed status response: {}", e)))?;

        parse_task_status(&body)
    }

    async fn credit_balance(&self) -> Result<f64> {
        let response = self
            .client
            .get(self.url("common/credit"))
            .bearer_auth(&self.api_key)
            .timeout(QUERY_TIMEOUT)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Provider(format!(
                "credit query returned HTTP {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("malformed credit response: {}", e)))?;

        if body.get("code").and_then(Value::as_i64) != Some(200) {
            let msg = body
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(Error::Provider(msg.to_string()));
        }

        Ok(body.get("data").and_then(Value::as_f64).unwrap_or(0.0))
    }
}

/// Pull the task id out of a creation response.
///
/// The API is inconsistent about the field name (`taskId` on the standard
/// endpoint, `task_id` seen from Pro), so both spellings are accepted.
fn extract_task_id(body: &Value) -> Option<String> {
    if body.get("code").and_then(Value::as_i64) != Some(200) {
        return None;
    }
    let data = body.get("data")?;
    data.get("taskId")
        .or_else(|| data.get("task_id"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn parse_task_status(body: &Value) -> Result<TaskStatus> {
    if body.get("code").and_then(Value::as_i64) != Some(200) {
        return Err(Error::Provider("status query returned non-200 code".to_string()));
    }
    let data = body
        .get("data")
        .ok_or_else(|| Error::Provider("status response missing data".to_string()))?;

    match data.get("successFlag").and_then(Value::as_i64) {
        Some(0) | None => Ok(TaskStatus::Generating),
        Some(1) => {
            let image_url = data
                .get("response")
                .and_then(|r| r.get("resultImageUrl"))
                .and_then(Value::as_str)
                .map(str::to_string);
            match image_url {
                Some(url) if !url.is_empty() => Ok(TaskStatus::Succeeded { image_url: url }),
                _ => Ok(TaskStatus::Failed {
                    reason: "task succeeded but no result image URL was returned".to_string(),
                }),
            }
        }
        Some(2) | Some(3) => {
            let reason = data
                .get("errorMessage")
                .and_then(Value::as_str)
                .unwrap_or("unknown generation error")
                .to_string();
            Ok(TaskStatus::Failed { reason })
        }
        Some(other) => Err(Error::Provider(format!(
            "unknown successFlag value {}",
            other
        ))),
    }
}
