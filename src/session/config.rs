use crate::agent::Agent;
use crate::config::Config;
use serde::{Deserialize, Serialize};

/// Configuration for a chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Agent focused when no saved state says otherwise
    pub default_agent: Agent,

    /// Speak agent replies automatically once they complete
    pub auto_voice: bool,

    /// Keep recognition running across utterances
    pub continuous_listening: bool,

    /// Capacity of the session event channel
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_agent: Agent::Mitra,
            auto_voice: false,
            continuous_listening: true,
            event_capacity: 64,
        }
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            default_agent: config.session.default_agent,
            auto_voice: config.voice.auto_voice,
            continuous_listening: config.voice.continuous_listening,
            event_capacity: config.transport.event_capacity.max(1),
        }
    }
}
