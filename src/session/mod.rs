//! Chat session management
//!
//! This module provides the `SessionOrchestrator` that manages:
//! - The turn cycle (listen or type, send, stream, speak)
//! - Routing of streamed replies to the conversation that asked
//! - Barge-in: user input stops agent playback
//! - Agent switching and New Chat with voice cleanup
//! - Session statistics and state notifications

mod config;
mod orchestrator;
mod state;
mod stats;

pub use config::SessionConfig;
pub use orchestrator::SessionOrchestrator;
pub use state::{InputMode, SessionEvent, TurnState, VoiceSession};
pub use stats::SessionStats;
