use serde::Serialize;

/// How the user is composing their turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    Listening,
    Typing,
}

/// Position in the conversational turn cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TurnState {
    Idle,
    UserTurn(InputMode),
    Sending,
    AgentStreaming,
    AgentSpeaking,
}

impl TurnState {
    /// A reply for the focused conversation is outstanding
    pub fn awaiting_reply(&self) -> bool {
        matches!(self, TurnState::Sending | TurnState::AgentStreaming)
    }

    pub fn accepts_input(&self) -> bool {
        matches!(
            self,
            TurnState::Idle | TurnState::UserTurn(_) | TurnState::AgentSpeaking
        )
    }
}

impl Default for TurnState {
    fn default() -> Self {
        TurnState::Idle
    }
}

/// Transient voice state of a session. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VoiceSession {
    pub listening: bool,
    pub interim_transcript: String,
    pub last_final_transcript: Option<String>,
    pub speaking: bool,
    pub audio_ready: bool,
    pub auto_play_enabled: bool,
}

/// Notable things the front-end should show
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A reply finished streaming
    ReplyCompleted {
        conversation_id: String,
        content: String,
    },

    /// A system message was added to a conversation
    SystemMessage {
        conversation_id: String,
        content: String,
    },

    /// Transport link lost; reconnecting in the background
    Offline,

    /// Transport link (re-)established
    Online,

    /// Voice input or output cannot be used right now
    VoiceUnavailable(String),

    /// Conversation history could not be saved; the session keeps going
    StorageUnavailable(String),

    /// Status text from the backend
    Status(String),
}
