use thiserror::Error;

/// Errors surfaced by the chat session engine.
///
/// Connection errors are recovered by the transport's reconnect loop,
/// synthesis and recognition errors disable voice temporarily, and
/// validation errors block the action without a user-facing message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("recognition error: {0}")]
    Recognition(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ChatError {
    pub fn is_connection(&self) -> bool {
        matches!(self, ChatError::Connection(_))
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Validation(format!("malformed JSON: {}", e))
    }
}

impl From<std::io::Error> for ChatError {
    fn from(e: std::io::Error) -> Self {
        ChatError::Storage(e.to_string())
    }
}
