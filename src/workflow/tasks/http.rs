use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};

use super::{parse_config, DEFAULT_TASK_TIMEOUT};

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// HTTP probe: the status must be in the expected set.
#[derive(Debug, Clone)]
pub struct HttpTask {
    pub url: String,
    pub method: String,
    pub expected_status: Vec<u16>,
    pub headers: HashMap<String, String>,
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct Config {
    url: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    expected_status: Option<Vec<u16>>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default, with = "humantime_serde")]
    timeout: Option<Duration>,
}

impl HttpTask {
    pub fn configure(config: &serde_json::Value) -> Result<Self> {
        let config: Config = parse_config(config)?;
        if config.url.is_empty() {
            return Err(Error::InvalidInput("url is required".to_string()));
        }
        Ok(Self {
            url: config.url,
            method: config.method.unwrap_or_else(|| "GET".to_string()),
            expected_status: config.expected_status.unwrap_or_else(|| vec![200]),
            headers: config.headers,
            timeout: config.timeout.unwrap_or(DEFAULT_TASK_TIMEOUT),
        })
    }

    pub async fn execute(&self) -> Result<serde_json::Value> {
        let method: reqwest::Method = self
            .method
            .parse()
            .map_err(|_| Error::InvalidInput(format!("bad HTTP method: {}", self.method)))?;

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| Error::Internal(format!("failed to build HTTP client: {err}")))?;

        let mut request = client.request(method, &self.url);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        let body = String::from_utf8_lossy(&body[..body.len().min(MAX_BODY_BYTES)]).to_string();

        if !self.expected_status.contains(&status) {
            return Err(Error::Internal(format!(
                "unexpected status code: {status} (expected one of {:?})",
                self.expected_status
            )));
        }

        Ok(json!({
            "status_code": status,
            "body": body,
        }))
    }
}
