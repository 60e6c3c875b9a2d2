use super::model::{Conversation, ConversationFilter, ConversationSummary, Message, Role, TitleSource};
use super::storage::{ConversationStorage, MemoryStorage, Snapshot, SCHEMA_VERSION};
use super::title::derive_title;
use crate::agent::Agent;
use crate::error::ChatError;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Per-agent conversation history
///
/// Keeps one active conversation per agent and one focused agent, and
/// saves the whole list after every change that must survive a restart.
/// A failed save never undoes the change in memory; the error is kept
/// until the owner collects it with [`ConversationStore::take_save_error`].
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    active: BTreeMap<Agent, String>,
    focused: Agent,
    storage: Box<dyn ConversationStorage>,
    save_error: Option<ChatError>,
}

impl ConversationStore {
    /// Open the store, restoring whatever `storage` holds
    pub fn open(storage: Box<dyn ConversationStorage>, default_agent: Agent) -> Result<Self, ChatError> {
        let snapshot = storage.load()?.unwrap_or_default();

        let mut store = Self {
            focused: snapshot.focused_agent.unwrap_or(default_agent),
            conversations: snapshot.conversations,
            active: snapshot.active,
            storage,
            save_error: None,
        };

        // Drop pointers to conversations that no longer exist
        let known: Vec<String> = store.conversations.iter().map(|c| c.id.clone()).collect();
        store.active.retain(|_, id| known.contains(id));

        info!(
            "Conversation store opened: {} conversations, focused on {}",
            store.conversations.len(),
            store.focused
        );
        Ok(store)
    }

    pub fn in_memory(default_agent: Agent) -> Self {
        Self {
            conversations: Vec::new(),
            active: BTreeMap::new(),
            focused: default_agent,
            storage: Box::new(MemoryStorage::new()),
            save_error: None,
        }
    }

    pub fn focused_agent(&self) -> Agent {
        self.focused
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn active_conversation_id(&self, agent: Agent) -> Option<&str> {
        self.active.get(&agent).map(String::as_str)
    }

    /// Active conversation of the focused agent
    pub fn current(&self) -> Option<&Conversation> {
        self.active_conversation_id(self.focused)
            .and_then(|id| self.get(id))
    }

    /// Active conversation of the focused agent, created on demand
    pub fn ensure_current(&mut self) -> Result<String, ChatError> {
        match self.active_conversation_id(self.focused) {
            Some(id) => Ok(id.to_string()),
            None => self.create_conversation(self.focused),
        }
    }

    /// Start a new conversation, which becomes the agent's active one
    pub fn create_conversation(&mut self, agent: Agent) -> Result<String, ChatError> {
        let conversation = Conversation::new(agent);
        let id = conversation.id.clone();

        self.conversations.push(conversation);
        self.active.insert(agent, id.clone());

        info!("Created conversation {} with {}", id, agent);
        self.persist();
        Ok(id)
    }

    /// Append a message, deriving the title once enough history exists
    pub fn append_message(&mut self, conversation_id: &str, message: Message) -> Result<(), ChatError> {
        let conversation = self.conversation_mut(conversation_id)?;

        debug!(
            "Appending {:?} message {} to {}",
            message.role, message.id, conversation_id
        );
        conversation.messages.push(message);
        conversation.touch();
        Self::apply_auto_title(conversation);

        self.persist();
        Ok(())
    }

    /// Add streamed text to a message that is still streaming
    pub fn append_chunk(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        chunk: &str,
    ) -> Result<(), ChatError> {
        let conversation = self.conversation_mut(conversation_id)?;
        let message = conversation
            .message_mut(message_id)
            .ok_or_else(|| ChatError::NotFound(format!("message {}", message_id)))?;

        if !message.is_streaming {
            return Err(ChatError::Validation(format!(
                "message {} is already complete",
                message_id
            )));
        }

        message.content.push_str(chunk);
        conversation.touch();
        Ok(())
    }

    /// Freeze a streaming message and return its final text
    pub fn finish_message(&mut self, conversation_id: &str, message_id: &str) -> Result<String, ChatError> {
        let conversation = self.conversation_mut(conversation_id)?;
        let message = conversation
            .message_mut(message_id)
            .ok_or_else(|| ChatError::NotFound(format!("message {}", message_id)))?;

        if !message.is_streaming {
            return Err(ChatError::Validation(format!(
                "message {} is already complete",
                message_id
            )));
        }

        message.is_streaming = false;
        let content = message.content.clone();
        conversation.touch();
        Self::apply_auto_title(conversation);

        self.persist();
        Ok(content)
    }

    /// Attach audio to the latest assistant message
    pub fn set_audio_reference(&mut self, conversation_id: &str, reference: &str) -> Result<(), ChatError> {
        let conversation = self.conversation_mut(conversation_id)?;
        let message = conversation
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .ok_or_else(|| ChatError::NotFound("assistant message".to_string()))?;

        message.audio_reference = Some(reference.to_string());
        self.persist();
        Ok(())
    }

    /// Focus `agent` and return its active conversation, creating one if needed
    pub fn switch_agent(&mut self, agent: Agent) -> Result<String, ChatError> {
        if self.focused != agent {
            info!("Switching from {} to {}", self.focused, agent);
        }
        self.focused = agent;

        match self.active_conversation_id(agent) {
            Some(id) => {
                let id = id.to_string();
                self.persist();
                Ok(id)
            }
            None => self.create_conversation(agent),
        }
    }

    /// Make an existing conversation active and focus its agent
    pub fn activate(&mut self, conversation_id: &str) -> Result<Agent, ChatError> {
        let agent = self
            .get(conversation_id)
            .map(|c| c.agent)
            .ok_or_else(|| ChatError::NotFound(format!("conversation {}", conversation_id)))?;

        self.focused = agent;
        self.active.insert(agent, conversation_id.to_string());
        self.persist();
        Ok(agent)
    }

    pub fn rename_conversation(&mut self, conversation_id: &str, title: &str) -> Result<(), ChatError> {
        let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
        if title.is_empty() {
            return Err(ChatError::Validation("title must not be empty".to_string()));
        }

        let conversation = self.conversation_mut(conversation_id)?;
        conversation.title = title;
        conversation.title_source = TitleSource::Explicit;
        conversation.touch();

        self.persist();
        Ok(())
    }

    pub fn delete_conversation(&mut self, conversation_id: &str) -> Result<Conversation, ChatError> {
        let index = self
            .conversations
            .iter()
            .position(|c| c.id == conversation_id)
            .ok_or_else(|| ChatError::NotFound(format!("conversation {}", conversation_id)))?;

        let removed = self.conversations.remove(index);
        self.active.retain(|_, id| id.as_str() != conversation_id);

        info!("Deleted conversation {} ({})", removed.id, removed.title);
        self.persist();
        Ok(removed)
    }

    /// Conversations matching `filter`, most recently updated first
    pub fn list_conversations(&self, filter: &ConversationFilter) -> Vec<ConversationSummary> {
        let mut matching: Vec<&Conversation> = self
            .conversations
            .iter()
            .filter(|c| filter.accepts(c))
            .collect();

        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        matching.into_iter().map(ConversationSummary::from).collect()
    }

    /// Most recent save failure not yet reported, if any
    pub fn take_save_error(&mut self) -> Option<ChatError> {
        self.save_error.take()
    }

    fn conversation_mut(&mut self, id: &str) -> Result<&mut Conversation, ChatError> {
        self.conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ChatError::NotFound(format!("conversation {}", id)))
    }

    fn apply_auto_title(conversation: &mut Conversation) {
        if conversation.title_source != TitleSource::Default || conversation.messages.len() < 2 {
            return;
        }

        let derived = conversation
            .first_user_message()
            .and_then(|m| derive_title(&m.content));

        if let Some(title) = derived {
            debug!("Titled conversation {}: {}", conversation.id, title);
            conversation.title = title;
            conversation.title_source = TitleSource::Derived;
        }
    }

    fn persist(&mut self) {
        let snapshot = Snapshot {
            version: SCHEMA_VERSION,
            conversations: self.conversations.clone(),
            active: self.active.clone(),
            focused_agent: Some(self.focused),
        };

        if let Err(e) = self.storage.save(&snapshot) {
            warn!("Failed to save conversations: {}", e);
            self.save_error = Some(e);
        }
    }
}
