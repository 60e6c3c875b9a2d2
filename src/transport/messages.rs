use crate::agent::Agent;
use crate::error::ChatError;
use serde::{Deserialize, Serialize};

/// Frame sent to the chat backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    UserMessage {
        message: String,
        agent: Agent,
        voice: String,
    },
}

impl OutboundFrame {
    pub fn user_message(message: impl Into<String>, agent: Agent) -> Self {
        OutboundFrame::UserMessage {
            message: message.into(),
            agent,
            voice: agent.voice_id().to_string(),
        }
    }

    pub fn encode(&self) -> Result<String, ChatError> {
        serde_json::to_string(self)
            .map_err(|e| ChatError::Connection(format!("failed to encode frame: {}", e)))
    }
}

/// Frame received from the chat backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// A chunk of the agent's reply. A frame without `done` completes the
    /// reply, so non-streaming backends send a single frame.
    AgentResponse {
        message: String,
        #[serde(default)]
        agent: Option<String>,
        #[serde(default = "default_done")]
        done: bool,
    },

    /// Pre-synthesized audio for the latest reply
    AudioUrl {
        url: String,
        #[serde(default)]
        agent: Option<String>,
    },

    Error {
        message: String,
    },

    Status {
        #[serde(default)]
        status: String,
        #[serde(default)]
        message: Option<String>,
    },
}

fn default_done() -> bool {
    true
}

impl InboundFrame {
    pub fn decode(text: &str) -> Result<Self, ChatError> {
        Ok(serde_json::from_str(text)?)
    }
}
