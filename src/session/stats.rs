use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about a chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// When the session was created
    pub started_at: DateTime<Utc>,

    /// Session age in seconds
    pub duration_secs: f64,

    /// User messages handed to the transport
    pub messages_sent: usize,

    /// Agent replies received to completion
    pub replies_received: usize,

    /// Replies that started playing
    pub replies_spoken: usize,

    /// Turns that ended with an error message
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub messages_sent: usize,
    pub replies_received: usize,
    pub replies_spoken: usize,
    pub errors: usize,
}

impl Counters {
    pub fn snapshot(&self, started_at: DateTime<Utc>) -> SessionStats {
        let duration = Utc::now().signed_duration_since(started_at);
        SessionStats {
            started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            messages_sent: self.messages_sent,
            replies_received: self.replies_received,
            replies_spoken: self.replies_spoken,
            errors: self.errors,
        }
    }
}
