use crate::error::ChatError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A chat persona served by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    /// Friend and emotional companion
    Mitra,
    /// Mentor for learning and career guidance
    Guru,
    /// Interview and assessment coach
    Parikshak,
}

impl Agent {
    pub const ALL: [Agent; 3] = [Agent::Mitra, Agent::Guru, Agent::Parikshak];

    /// Identifier used on the wire and in persisted state
    pub fn id(&self) -> &'static str {
        match self {
            Agent::Mitra => "mitra",
            Agent::Guru => "guru",
            Agent::Parikshak => "parikshak",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Agent::Mitra => "Mitra",
            Agent::Guru => "Guru",
            Agent::Parikshak => "Parikshak",
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Agent::Mitra => "Friend & Companion",
            Agent::Guru => "Mentor & Guide",
            Agent::Parikshak => "Interview Coach",
        }
    }

    /// Voice requested from the synthesis service for this persona
    pub fn voice_id(&self) -> &'static str {
        self.id()
    }
}

impl Default for Agent {
    fn default() -> Self {
        Agent::Mitra
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Agent {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Agent::ALL
            .into_iter()
            .find(|agent| agent.id() == wanted)
            .ok_or_else(|| ChatError::Validation(format!("unknown agent: {}", s.trim())))
    }
}
