pub mod agent;
pub mod audio;
pub mod config;
pub mod conversation;
pub mod error;
pub mod session;
pub mod speech;
pub mod transport;

pub use agent::Agent;
pub use audio::{AudioClip, AudioPlayer, ClipInfo, FilePlayer};
pub use config::Config;
pub use conversation::{
    Conversation, ConversationFilter, ConversationStore, ConversationSummary, JsonFileStorage,
    Message, Role,
};
pub use error::ChatError;
pub use session::{
    InputMode, SessionConfig, SessionEvent, SessionOrchestrator, SessionStats, TurnState,
    VoiceSession,
};
pub use speech::{
    AutoVoiceClient, ChannelRecognizer, HttpSynthesizer, InteractionGate, SpeechInput,
    SpeechOutput, TranscriptFeed, VoiceSettings,
};
pub use transport::{ConnectionState, TransportClient, TransportEvent, WsConnector};
