use crate::agent::Agent;
use crate::transport::ReconnectPolicy;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variables override file settings, e.g. `BUDDY_TRANSPORT__URL`
const ENV_PREFIX: &str = "BUDDY";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub transport: TransportConfig,
    pub voice: VoiceConfig,
    pub storage: StorageConfig,
    pub session: SessionDefaults,
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "buddy-agents".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Chat backend WebSocket endpoint
    pub url: String,
    /// Capacity of the inbound event and outbound frame channels
    pub event_capacity: usize,
    pub reconnect: ReconnectConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000/ws".to_string(),
            event_capacity: 256,
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectStrategy {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub strategy: ReconnectStrategy,
    /// Fixed delay, or the first delay for exponential backoff
    pub delay_ms: u64,
    pub max_delay_ms: u64,
    /// Give up after this many consecutive failures (exponential only)
    pub max_retries: Option<u32>,
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            strategy: ReconnectStrategy::Fixed,
            delay_ms: 5000,
            max_delay_ms: 60_000,
            max_retries: None,
            jitter: true,
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        match self.strategy {
            ReconnectStrategy::Fixed => ReconnectPolicy::Fixed {
                delay: Duration::from_millis(self.delay_ms),
            },
            ReconnectStrategy::Exponential => ReconnectPolicy::ExponentialBackoff {
                initial_delay: Duration::from_millis(self.delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
                max_retries: self.max_retries,
                jitter: self.jitter,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Speech synthesis endpoint (POST)
    pub tts_url: String,
    /// Base URL of the auto-voice settings endpoints
    pub settings_url: String,
    pub language: String,
    pub quality: String,
    pub format: String,
    pub timeout_secs: u64,
    pub auto_voice: bool,
    pub continuous_listening: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            tts_url: "http://localhost:8000/voice/synthesize".to_string(),
            settings_url: "http://localhost:8000".to_string(),
            language: "en".to_string(),
            quality: "high".to_string(),
            format: "mp3".to_string(),
            timeout_secs: 30,
            auto_voice: false,
            continuous_listening: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionDefaults {
    pub default_agent: Agent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Where played clips are written
    pub output_dir: PathBuf,
    /// Hold each playback for the clip's duration
    pub pace: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data/audio"),
            pace: true,
        }
    }
}

impl Config {
    /// Load configuration from `path` (extension optional, file optional),
    /// layered with `BUDDY_*` environment variables.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn voice_timeout(&self) -> Duration {
        Duration::from_secs(self.voice.timeout_secs)
    }
}
