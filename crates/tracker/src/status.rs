//! Remote job status probes.
//!
//! Consumed contract: `GET {api_url}/api/jobs/{job_id}/status` answering
//! `{ "success": bool, "job": { "status", "response_content"?, "error_message"? } }`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use docent_core::{JobId, JobStatus};

use crate::config::TrackerConfig;
use crate::error::TrackerError;

/// Job state as reported by the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteJobStatus {
    pub status: JobStatus,
    #[serde(default)]
    pub response_content: Option<Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl RemoteJobStatus {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            response_content: None,
            error_message: None,
        }
    }

    pub fn completed(content: Value) -> Self {
        Self {
            response_content: Some(content),
            ..Self::new(JobStatus::Completed)
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::new(JobStatus::Failed)
        }
    }
}

/// Body of the status endpoint.
#[derive(Debug, Deserialize)]
struct JobStatusResponse {
    success: bool,
    #[serde(default)]
    job: Option<RemoteJobStatus>,
    #[serde(default)]
    error: Option<String>,
}

/// A status probe that did not yield a usable answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("network error: {0}")]
    Network(String),
    #[error("API error ({0}): {1}")]
    Api(u16, String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Source of job status answers.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, job_id: &JobId) -> Result<RemoteJobStatus, ProbeError>;
}

/// `reqwest` client for the backend status endpoint.
#[derive(Debug, Clone)]
pub struct HttpStatusClient {
    api_url: reqwest::Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpStatusClient {
    pub fn new(api_url: &str, request_timeout: Duration) -> Result<Self, TrackerError> {
        let api_url = reqwest::Url::parse(api_url)
            .map_err(|e| TrackerError::HttpClient(format!("invalid API URL {api_url:?}: {e}")))?;
        if api_url.cannot_be_a_base() {
            return Err(TrackerError::HttpClient(format!(
                "API URL {api_url} cannot be used as a base"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TrackerError::HttpClient(e.to_string()))?;

        Ok(Self {
            api_url,
            token: None,
            client,
        })
    }

    pub fn from_config(config: &TrackerConfig) -> Result<Self, TrackerError> {
        let client = Self::new(&config.api_url, config.request_timeout)?;
        Ok(match &config.auth_token {
            Some(token) => client.with_token(token.clone()),
            None => client,
        })
    }

    pub fn with_token(mut self, token: String) -> Self {
        self.token = Some(token);
        self
    }

    /// `{api_url}/api/jobs/{job_id}/status`, with the id encoded as one segment.
    pub fn status_url(&self, job_id: &JobId) -> reqwest::Url {
        let mut url = self.api_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["api", "jobs", job_id.as_str(), "status"]);
        }
        url
    }
}

#[async_trait]
impl StatusSource for HttpStatusClient {
    async fn fetch_status(&self, job_id: &JobId) -> Result<RemoteJobStatus, ProbeError> {
        let mut req = self.client.get(self.status_url(job_id));

        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ProbeError::Api(
                resp.status().as_u16(),
                resp.text().await.unwrap_or_default(),
            ));
        }

        let body: JobStatusResponse = resp
            .json()
            .await
            .map_err(|e| ProbeError::Parse(format!("failed to parse job status: {}", e)))?;

        if !body.success {
            return Err(ProbeError::Rejected(
                body.error.unwrap_or_else(|| "success: false".to_string()),
            ));
        }

        body.job
            .ok_or_else(|| ProbeError::Parse("job missing from status response".to_string()))
    }
}
