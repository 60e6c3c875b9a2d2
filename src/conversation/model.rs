use crate::agent::Agent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder title of a conversation nobody has named yet
pub const DEFAULT_TITLE: &str = "New Conversation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,

    /// Synthesized audio for this message, if the backend provided one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_reference: Option<String>,

    /// Content is still arriving; the message is frozen once this is false
    #[serde(default)]
    pub is_streaming: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            audio_reference: None,
            is_streaming: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Empty message that receives streamed chunks
    pub fn streaming(role: Role) -> Self {
        Self {
            is_streaming: true,
            ..Self::new(role, String::new())
        }
    }
}

/// Where a conversation's title came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleSource {
    Default,
    Derived,
    Explicit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub agent: Agent,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub title_source: TitleSource,
}

impl Conversation {
    pub fn new(agent: Agent) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            title: DEFAULT_TITLE.to_string(),
            title_source: TitleSource::Default,
        }
    }

    pub fn first_user_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.role == Role::User)
    }

    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    pub(crate) fn message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn matches(&self, query: &str) -> bool {
        self.title.to_lowercase().contains(query)
            || self
                .messages
                .iter()
                .any(|m| m.content.to_lowercase().contains(query))
    }
}

/// Criteria for listing conversations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationFilter {
    pub agent: Option<Agent>,
    /// Case-insensitive match against title and message text
    pub query: Option<String>,
}

impl ConversationFilter {
    pub fn agent(agent: Agent) -> Self {
        Self {
            agent: Some(agent),
            query: None,
        }
    }

    pub fn query(query: impl Into<String>) -> Self {
        Self {
            agent: None,
            query: Some(query.into()),
        }
    }

    pub fn accepts(&self, conversation: &Conversation) -> bool {
        if let Some(agent) = self.agent {
            if conversation.agent != agent {
                return false;
            }
        }

        match self.query.as_deref().map(str::trim) {
            Some(query) if !query.is_empty() => conversation.matches(&query.to_lowercase()),
            _ => true,
        }
    }
}

/// Row of a conversation listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub agent: Agent,
    pub title: String,
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
    /// Start of the latest message
    pub preview: String,
}

const PREVIEW_CHARS: usize = 60;

impl From<&Conversation> for ConversationSummary {
    fn from(conversation: &Conversation) -> Self {
        let preview = conversation
            .messages
            .last()
            .map(|m| m.content.chars().take(PREVIEW_CHARS).collect())
            .unwrap_or_default();

        Self {
            id: conversation.id.clone(),
            agent: conversation.agent,
            title: conversation.title.clone(),
            message_count: conversation.messages.len(),
            updated_at: conversation.updated_at,
            preview,
        }
    }
}
