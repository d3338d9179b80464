//! Conversation identity lifecycle
//!
//! Owns the active conversation id: creation, persistence across restarts,
//! restoration, invalidation. [`ConversationLifecycle::set_conversation_id`]
//! is the only code path that writes the persisted slot.

use crate::conversation::{ConversationId, Message, Timeline};
use crate::error::RemoteError;
use crate::remote::AnswerService;
use crate::store::IdentityStore;
use std::sync::{Arc, Mutex, PoisonError};

/// What a restore found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Nothing persisted, nothing to do
    NoConversation,
    /// The service no longer knows the persisted id; it has been cleared
    UnknownConversation,
    /// The active id changed during the fetch; nothing was applied
    Superseded,
    Restored {
        conversation_id: ConversationId,
        timeline: Timeline,
    },
}

pub struct ConversationLifecycle<R, S> {
    remote: Arc<R>,
    store: S,
    current: Mutex<Option<ConversationId>>,
    /// Serializes creation so one session never creates two conversations
    creating: tokio::sync::Mutex<()>,
    history_limit: u32,
}

impl<R, S> ConversationLifecycle<R, S>
where
    R: AnswerService,
    S: IdentityStore,
{
    /// Build the manager, seeding the in-memory id from the persisted slot
    pub fn new(remote: Arc<R>, store: S, history_limit: u32) -> Self {
        let current = load_or_warn(&store);
        Self {
            remote,
            store,
            current: Mutex::new(current),
            creating: tokio::sync::Mutex::new(()),
            history_limit,
        }
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Update the active id and mirror it to the persisted slot.
    ///
    /// Slot I/O failures are logged; the in-memory id is updated regardless.
    pub fn set_conversation_id(&self, id: Option<ConversationId>) {
        let persisted = match &id {
            Some(id) => self.store.save(id),
            None => self.store.clear(),
        };
        if let Err(e) = persisted {
            tracing::warn!(error = %e, "Failed to persist conversation id");
        }
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }

    /// The active id, creating a conversation first if there is none
    pub async fn ensure_conversation(&self) -> Result<ConversationId, RemoteError> {
        let _guard = self.creating.lock().await;
        if let Some(id) = self.conversation_id() {
            return Ok(id);
        }
        self.create_locked().await
    }

    /// Create a conversation on the service and make it the active one
    pub async fn create_conversation(&self) -> Result<ConversationId, RemoteError> {
        let _guard = self.creating.lock().await;
        self.create_locked().await
    }

    /// Drop the active id, then create a fresh conversation.
    ///
    /// If creation fails the old id stays dropped.
    pub async fn replace_conversation(&self) -> Result<ConversationId, RemoteError> {
        let _guard = self.creating.lock().await;
        self.set_conversation_id(None);
        self.create_locked().await
    }

    async fn create_locked(&self) -> Result<ConversationId, RemoteError> {
        let id = self.remote.create_conversation().await?;
        tracing::info!(conv_id = %id, "Created conversation");
        self.set_conversation_id(Some(id.clone()));
        Ok(id)
    }

    /// Reload the persisted conversation's most recent history page.
    ///
    /// Holds the creation guard for the whole fetch, and writes nothing if
    /// the active id changed while the page was in flight.
    pub async fn restore(&self) -> Result<RestoreOutcome, RemoteError> {
        let _guard = self.creating.lock().await;
        let Some(id) = load_or_warn(&self.store).or_else(|| self.conversation_id()) else {
            return Ok(RestoreOutcome::NoConversation);
        };
        let before = self.conversation_id();

        let fetched = self.remote.fetch_messages(&id, self.history_limit, 0).await;
        let would_write = match &fetched {
            Ok(_) => true,
            Err(e) => e.is_not_found(),
        };
        if would_write && self.conversation_id() != before {
            tracing::info!(conv_id = %id, "Conversation changed while restoring, discarding result");
            return Ok(RestoreOutcome::Superseded);
        }

        match fetched {
            Ok(page) => {
                self.set_conversation_id(Some(id.clone()));
                let timeline =
                    Timeline::from_messages(page.messages.into_iter().filter_map(Message::from_history));
                tracing::info!(conv_id = %id, messages = timeline.len(), "Restored conversation");
                Ok(RestoreOutcome::Restored {
                    conversation_id: id,
                    timeline,
                })
            }
            Err(e) if e.is_not_found() => {
                tracing::info!(conv_id = %id, "Persisted conversation is unknown, starting fresh");
                self.set_conversation_id(None);
                Ok(RestoreOutcome::UnknownConversation)
            }
            Err(e) => Err(e),
        }
    }
}

fn load_or_warn<S: IdentityStore>(store: &S) -> Option<ConversationId> {
    store.load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to read persisted conversation id");
        None
    })
}
