//! Stateless HTTP client for the control-plane API. Carries the bearer
//! token on every request; 30 s default timeout.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub agent_id: String,
    pub project_id: String,
    pub os: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeasedJob {
    pub job_id: Uuid,
    pub tenant_id: String,
    pub project_id: String,
    pub state: String,
    pub payload: serde_json::Value,
}

/// The three lease outcomes the protocol distinguishes by status.
#[derive(Debug)]
pub enum LeaseResponse {
    Leased(Box<LeasedJob>),
    NotAvailable,
    Conflict,
}

pub struct ControlPlaneClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl ControlPlaneClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|err| Error::Internal(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub async fn register(&self, req: &RegisterRequest) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/api/agents/register", self.base_url))
            .bearer_auth(&self.token)
            .json(req)
            .send()
            .await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(()),
            status => Err(status_error("registration", status, response).await),
        }
    }

    pub async fn heartbeat(&self, state: &str, active_jobs: u32) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/api/agents/heartbeat", self.base_url))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "state": state, "active_jobs": active_jobs }))
            .send()
            .await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(()),
            status => Err(status_error("heartbeat", status, response).await),
        }
    }

    pub async fn lease(&self, job_id: Uuid) -> Result<LeaseResponse> {
        let response = self
            .client
            .post(format!("{}/api/jobs/{job_id}/lease", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => {
                let job: LeasedJob = response.json().await?;
                Ok(LeaseResponse::Leased(Box::new(job)))
            }
            StatusCode::NO_CONTENT => Ok(LeaseResponse::NotAvailable),
            StatusCode::CONFLICT => Ok(LeaseResponse::Conflict),
            status => Err(status_error("lease", status, response).await),
        }
    }

    /// Reports the workflow outcome. A non-204 answer is returned as an
    /// error, but callers treat it as potentially delivered: the
    /// server's completion is idempotent under the owner guard.
    pub async fn complete(&self, job_id: Uuid, success: bool) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/api/jobs/{job_id}/complete", self.base_url))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "success": success }))
            .send()
            .await?;
        match response.status() {
            StatusCode::NO_CONTENT => Ok(()),
            status => Err(status_error("completion", status, response).await),
        }
    }
}

async fn status_error(what: &str, status: StatusCode, response: reqwest::Response) -> Error {
    let body = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED => Error::Unauthorized(format!("{what} rejected: {body}")),
        StatusCode::FORBIDDEN => Error::Forbidden(format!("{what} rejected: {body}")),
        _ => Error::Transport(format!("{what} failed with status {status}: {body}")),
    }
}
