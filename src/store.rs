//! Persisted conversation identity slot
//!
//! Holds at most one conversation id, survives restarts, never expires.

use crate::conversation::ConversationId;
use crate::error::StoreError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Name of the slot inside the state directory
pub const CONVERSATION_ID_KEY: &str = "conversation_id";

/// Single key-value slot for the active conversation id
pub trait IdentityStore: Send + Sync {
    fn load(&self) -> Result<Option<ConversationId>, StoreError>;

    fn save(&self, id: &ConversationId) -> Result<(), StoreError>;

    /// Remove the slot; clearing an empty slot is fine
    fn clear(&self) -> Result<(), StoreError>;
}

/// Slot backed by a small file
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The slot file inside `state_dir`
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(CONVERSATION_ID_KEY))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStore for FileIdentityStore {
    fn load(&self) -> Result<Option<ConversationId>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let id = contents.trim();
                Ok((!id.is_empty()).then(|| ConversationId::new(id)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, id: &ConversationId) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // write-then-rename so a crash never leaves a torn id behind
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, id.as_str())?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local slot, for embedding without a filesystem and for tests
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    slot: Mutex<Option<ConversationId>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(ConversationId::new(id))),
        }
    }

    /// Current slot contents
    pub fn peek(&self) -> Option<ConversationId> {
        self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Result<Option<ConversationId>, StoreError> {
        Ok(self.peek())
    }

    fn save(&self, id: &ConversationId) -> Result<(), StoreError> {
        *self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(id.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        Ok(())
    }
}

impl<T: IdentityStore + ?Sized> IdentityStore for std::sync::Arc<T> {
    fn load(&self) -> Result<Option<ConversationId>, StoreError> {
        (**self).load()
    }

    fn save(&self, id: &ConversationId) -> Result<(), StoreError> {
        (**self).save(id)
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }
}
