//! Broker-native HTTP publish used by the control plane.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{AgentMessage, Publisher};

#[derive(Serialize)]
struct PublishRequest<'a> {
    channel: &'a str,
    data: &'a AgentMessage,
}

#[derive(Deserialize, Default)]
struct PublishResponse {
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpPublisher {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpPublisher {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| Error::Internal(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, channel: &str, message: &AgentMessage) -> Result<()> {
        let url = format!("{}/api/publish", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("apikey {}", self.api_key))
            .json(&PublishRequest {
                channel,
                data: message,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!(
                "broker publish returned {status}"
            )));
        }
        let body: PublishResponse = response.json().await.unwrap_or_default();
        if let Some(err) = body.error {
            return Err(Error::Transport(format!("broker error: {err}")));
        }
        Ok(())
    }
}
