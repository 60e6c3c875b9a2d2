use crate::error::ChatError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

const STATUS_PATH: &str = "/voice/auto-voice/status";
const ENABLE_PATH: &str = "/voice/auto-voice/enable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoVoiceStatus {
    pub enabled: bool,
}

/// Client for the server-side auto-voice preference
#[derive(Debug, Clone)]
pub struct AutoVoiceClient {
    client: reqwest::Client,
    base_url: String,
}

impl AutoVoiceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Connection(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn status(&self) -> Result<bool, ChatError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, STATUS_PATH))
            .send()
            .await
            .map_err(|e| ChatError::Connection(format!("auto-voice status failed: {}", e)))?;

        Self::read_status(response).await
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<bool, ChatError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, ENABLE_PATH))
            .json(&AutoVoiceStatus { enabled })
            .send()
            .await
            .map_err(|e| ChatError::Connection(format!("auto-voice update failed: {}", e)))?;

        let enabled = Self::read_status(response).await?;
        info!("Auto-voice is now {}", if enabled { "on" } else { "off" });
        Ok(enabled)
    }

    async fn read_status(response: reqwest::Response) -> Result<bool, ChatError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Connection(format!(
                "settings endpoint returned {}",
                status
            )));
        }

        let body: AutoVoiceStatus = response
            .json()
            .await
            .map_err(|e| ChatError::Connection(format!("malformed settings response: {}", e)))?;

        Ok(body.enabled)
    }
}
