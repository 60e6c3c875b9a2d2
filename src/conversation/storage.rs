use super::model::Conversation;
use crate::agent::Agent;
use crate::error::ChatError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Storage key of the persisted conversation list
pub const SCHEMA_KEY: &str = "buddyagents-conversations";
pub const SCHEMA_VERSION: u32 = 1;

/// Everything persisted about the conversation list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub conversations: Vec<Conversation>,
    /// Active conversation per agent
    #[serde(default)]
    pub active: BTreeMap<Agent, String>,
    #[serde(default)]
    pub focused_agent: Option<Agent>,
}

/// Durable home of the conversation list
pub trait ConversationStorage: Send + Sync {
    /// `None` when nothing compatible has been saved yet
    fn load(&self) -> Result<Option<Snapshot>, ChatError>;

    fn save(&self, snapshot: &Snapshot) -> Result<(), ChatError>;
}

/// JSON document on disk, named after the versioned schema key
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self, ChatError> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir).map_err(|e| {
            ChatError::Storage(format!(
                "failed to create data directory {}: {}",
                data_dir.display(),
                e
            ))
        })?;

        let path = data_dir.join(format!("{}-v{}.json", SCHEMA_KEY, SCHEMA_VERSION));
        info!("Conversation storage at {}", path.display());

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConversationStorage for JsonFileStorage {
    fn load(&self) -> Result<Option<Snapshot>, ChatError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let text = fs::read_to_string(&self.path)?;
        let snapshot: Snapshot = serde_json::from_str(&text).map_err(|e| {
            ChatError::Storage(format!("corrupt conversation file {}: {}", self.path.display(), e))
        })?;

        if snapshot.version != SCHEMA_VERSION {
            warn!(
                "Ignoring conversations saved with schema v{} (expected v{})",
                snapshot.version, SCHEMA_VERSION
            );
            return Ok(None);
        }

        info!("Loaded {} conversations", snapshot.conversations.len());
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), ChatError> {
        let text = serde_json::to_string_pretty(snapshot)
            .map_err(|e| ChatError::Storage(format!("failed to encode conversations: {}", e)))?;

        // Write then rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;

        debug!(
            "Saved {} conversations to {}",
            snapshot.conversations.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Process-local storage
#[derive(Default)]
pub struct MemoryStorage {
    snapshot: std::sync::Mutex<Option<Snapshot>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationStorage for MemoryStorage {
    fn load(&self) -> Result<Option<Snapshot>, ChatError> {
        Ok(self
            .snapshot
            .lock()
            .map_err(|_| ChatError::Storage("memory storage poisoned".to_string()))?
            .clone())
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), ChatError> {
        *self
            .snapshot
            .lock()
            .map_err(|_| ChatError::Storage("memory storage poisoned".to_string()))? =
            Some(snapshot.clone());
        Ok(())
    }
}
