use crate::agent::Agent;
use crate::error::ChatError;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// Maximum text size accepted for one synthesis request (64 KiB)
pub const MAX_SYNTHESIS_INPUT_BYTES: usize = 64 * 1024;

/// Body of a synthesis request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub agent: Agent,
    pub language: String,
    pub quality: String,
    pub format: String,
}

/// Voice parameters applied to every request
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSettings {
    pub agent: Agent,
    pub language: String,
    pub quality: String,
    pub format: String,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            agent: Agent::default(),
            language: "en".to_string(),
            quality: "high".to_string(),
            format: "mp3".to_string(),
        }
    }
}

impl VoiceSettings {
    pub fn request(&self, text: &str) -> SynthesisRequest {
        SynthesisRequest {
            text: text.to_string(),
            agent: self.agent,
            language: self.language.clone(),
            quality: self.quality.clone(),
            format: self.format.clone(),
        }
    }
}

/// Text-to-speech backend
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Returns encoded audio in the requested format
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, ChatError>;
}

/// Synthesizer backed by the remote voice service
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSynthesizer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Synthesis(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, ChatError> {
        if request.text.len() > MAX_SYNTHESIS_INPUT_BYTES {
            return Err(ChatError::Synthesis(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                request.text.len(),
                MAX_SYNTHESIS_INPUT_BYTES
            )));
        }

        debug!(
            "Requesting synthesis of {} chars for {}",
            request.text.chars().count(),
            request.agent
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| ChatError::Synthesis(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Synthesis(format!(
                "voice service returned {}: {}",
                status, body
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| ChatError::Synthesis(format!("failed to read audio: {}", e)))?;

        if audio.is_empty() {
            return Err(ChatError::Synthesis("voice service returned no audio".to_string()));
        }

        info!("Synthesized {} bytes of {} audio", audio.len(), request.format);
        Ok(audio.to_vec())
    }
}
