//! Conversation history
//!
//! This module provides the `ConversationStore` that manages:
//! - Per-agent conversations and the active one for each agent
//! - Streaming assistant messages that freeze once complete
//! - Automatic titles derived from the first user message
//! - Persistence through a `ConversationStorage` backend

mod model;
mod storage;
mod store;
mod title;

pub use model::{
    Conversation, ConversationFilter, ConversationSummary, Message, Role, TitleSource,
    DEFAULT_TITLE,
};
pub use storage::{ConversationStorage, JsonFileStorage, MemoryStorage, Snapshot, SCHEMA_KEY, SCHEMA_VERSION};
pub use store::ConversationStore;
pub use title::{derive_title, TITLE_MAX_CHARS};
