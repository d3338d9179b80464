//! Chat session
//!
//! Owns the mutable session state and runs turns against the answer service.
//! State sits behind a `std::sync::Mutex` that is never held across an
//! await, so each transition between suspension points is atomic. Every
//! change is published to [`ChatSession::subscribe`] observers.


use crate::assembler::{Applied, TurnAssembler};
use crate::citation::Citation;
use crate::config::{MalformedEventPolicy, DEFAULT_HISTORY_LIMIT};
use crate::conversation::{ConversationId, Message, Timeline};
use crate::error::SessionError;
use crate::lifecycle::{ConversationLifecycle, RestoreOutcome};
use crate::remote::{AnswerService, AskFilters, AskRequest};
use crate::selection::CitationSelection;
use crate::sse::{decode_stream, StreamEvent};
use crate::store::IdentityStore;
use futures::StreamExt;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Per-session tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Page size when restoring history
    pub history_limit: u32,
    /// Ask the service to use earlier turns as context
    pub use_context: bool,
    pub malformed_events: MalformedEventPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            use_context: true,
            malformed_events: MalformedEventPolicy::default(),
        }
    }
}

/// Observable session state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub conversation_id: Option<ConversationId>,
    pub timeline: Timeline,
    pub selection: CitationSelection,
    /// A turn or a restore is in flight
    pub loading: bool,
    pub error: Option<String>,
    /// Follow-up question the latest turn asked, if it asked one
    pub clarification_question: Option<String>,
    /// Bumped by every new conversation
    pub generation: u64,
}

impl SessionSnapshot {
    pub fn current_citations(&self) -> &[Citation] {
        self.selection.current()
    }

    pub fn selected_citation(&self) -> Option<&Citation> {
        self.selection.selected()
    }
}

struct Inner {
    view: SessionSnapshot,
    turn: Option<CancellationToken>,
}

/// State plus its publisher
struct Shared {
    inner: Mutex<Inner>,
    updates: watch::Sender<SessionSnapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate under the lock and publish the result
    fn update<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut inner = self.lock();
        let out = f(&mut inner);
        self.updates.send_replace(inner.view.clone());
        out
    }

    /// Like [`Shared::update`], but only while `generation` is current.
    /// Returns `None` when the session has moved on.
    fn update_if_current<T>(&self, generation: u64, f: impl FnOnce(&mut Inner) -> T) -> Option<T> {
        let mut inner = self.lock();
        if inner.view.generation != generation {
            return None;
        }
        let out = f(&mut inner);
        self.updates.send_replace(inner.view.clone());
        Some(out)
    }
}

/// Clears `loading` when a turn or restore ends, however it ends
struct TurnFinalizer<'a> {
    shared: &'a Shared,
    generation: u64,
}

impl Drop for TurnFinalizer<'_> {
    fn drop(&mut self) {
        self.shared.update_if_current(self.generation, |inner| {
            inner.view.loading = false;
            inner.turn = None;
        });
    }
}

pub struct ChatSession<R, S> {
    remote: Arc<R>,
    lifecycle: ConversationLifecycle<R, S>,
    options: SessionOptions,
    shared: Shared,
}

impl<R, S> ChatSession<R, S>
where
    R: AnswerService,
    S: IdentityStore,
{
    pub fn new(remote: Arc<R>, store: S, options: SessionOptions) -> Self {
        let lifecycle = ConversationLifecycle::new(Arc::clone(&remote), store, options.history_limit);
        let view = SessionSnapshot {
            conversation_id: lifecycle.conversation_id(),
            ..SessionSnapshot::default()
        };
        let (updates, _) = watch::channel(view.clone());
        Self {
            remote,
            lifecycle,
            options,
            shared: Shared {
                inner: Mutex::new(Inner { view, turn: None }),
                updates,
            },
        }
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.updates.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.lock().view.clone()
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.lifecycle.conversation_id()
    }

    /// Reload the persisted conversation.
    ///
    /// An unknown conversation is dropped silently; any other failure lands
    /// in the error state and is returned, leaving the session usable. The
    /// session counts as busy while the page is fetched, and a restore that
    /// finishes after a new conversation started changes nothing.
    pub async fn restore(&self) -> Result<(), SessionError> {
        let generation = self.shared.update(|inner| {
            if inner.view.loading {
                return Err(SessionError::TurnInProgress);
            }
            inner.view.loading = true;
            Ok(inner.view.generation)
        })?;
        let _finalizer = TurnFinalizer {
            shared: &self.shared,
            generation,
        };

        match self.lifecycle.restore().await {
            Ok(RestoreOutcome::NoConversation | RestoreOutcome::Superseded) => {}
            Ok(RestoreOutcome::UnknownConversation) => {
                self.shared.update_if_current(generation, |inner| {
                    inner.view.conversation_id = None;
                    inner.view.timeline.clear();
                    inner.view.selection.clear();
                });
            }
            Ok(RestoreOutcome::Restored {
                conversation_id,
                timeline,
            }) => {
                self.shared.update_if_current(generation, |inner| {
                    inner.view.conversation_id = Some(conversation_id);
                    inner.view.selection.focus_latest(&timeline);
                    inner.view.timeline = timeline;
                    inner.view.error = None;
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to restore conversation");
                self.shared
                    .update_if_current(generation, |inner| inner.view.error = Some(e.to_string()));
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Run one turn to completion.
    ///
    /// Failures after the turn opened are also recorded in the error state
    /// and in the assistant message. A turn cancelled by
    /// [`ChatSession::start_new_conversation`] returns `Ok`.
    pub async fn submit(&self, query: &str, filters: AskFilters) -> Result<(), SessionError> {
        if query.trim().is_empty() {
            return Err(SessionError::EmptyQuery);
        }

        let cancel = CancellationToken::new();
        let (generation, index) = self.shared.update(|inner| {
            if inner.view.loading {
                return Err(SessionError::TurnInProgress);
            }
            inner.view.loading = true;
            inner.view.error = None;
            inner.view.clarification_question = None;
            inner.view.timeline.push(Message::user(query));
            let index = inner.view.timeline.push(Message::assistant_placeholder());
            inner.turn = Some(cancel.clone());
            Ok((inner.view.generation, index))
        })?;
        let _finalizer = TurnFinalizer {
            shared: &self.shared,
            generation,
        };

        tracing::info!(generation, "Turn started");
        let mut turn = TurnAssembler::new(index);
        let result = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                tracing::info!(generation, "Turn cancelled");
                return Ok(());
            }

            result = self.run_turn(query, filters, generation, &mut turn) => result,
        };

        match result {
            Ok(()) => {
                tracing::info!(
                    generation,
                    clarification = turn.is_clarification(),
                    clarification_question = turn.clarification_question().unwrap_or_default(),
                    "Turn finished"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(generation, error = %e, "Turn failed");
                self.shared.update_if_current(generation, |inner| {
                    turn.fail(&mut inner.view.timeline);
                    inner.view.error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    async fn run_turn(
        &self,
        query: &str,
        filters: AskFilters,
        generation: u64,
        turn: &mut TurnAssembler,
    ) -> Result<(), SessionError> {
        let conversation_id = self.lifecycle.ensure_conversation().await?;
        self.shared.update_if_current(generation, |inner| {
            inner.view.conversation_id = Some(conversation_id.clone());
        });

        let request = AskRequest {
            query: query.to_string(),
            filters,
            conversation_id,
            use_context: self.options.use_context,
        };
        let body = self.remote.ask(&request).await?;

        let mut events = pin!(decode_stream(body));
        while let Some(raw) = events.next().await {
            let raw = raw?;
            let event = match StreamEvent::parse(&raw) {
                Ok(event) => event,
                Err(e) => match self.options.malformed_events {
                    MalformedEventPolicy::Skip => {
                        tracing::warn!(error = %e, "Skipping malformed stream event");
                        continue;
                    }
                    MalformedEventPolicy::Abort => return Err(e.into()),
                },
            };
            if self.apply_event(generation, turn, event) {
                break;
            }
        }
        Ok(())
    }

    /// Apply one event; `true` once the turn is finished
    fn apply_event(&self, generation: u64, turn: &mut TurnAssembler, event: StreamEvent) -> bool {
        let applied = self.shared.update_if_current(generation, |inner| {
            let applied = turn.apply(&mut inner.view.timeline, event);
            match &applied {
                Applied::ConversationAssigned(id) => {
                    self.lifecycle.set_conversation_id(Some(id.clone()));
                    inner.view.conversation_id = Some(id.clone());
                    inner.view.clarification_question = turn.clarification_question().map(str::to_string);
                }
                Applied::MetaRecorded => {
                    inner.view.clarification_question = turn.clarification_question().map(str::to_string);
                }
                Applied::CitationsAttached(citations) => {
                    inner.view.selection.set_current(citations.clone());
                }
                Applied::CitationsSuppressed(_) => inner.view.selection.set_current(Vec::new()),
                Applied::ContentAppended | Applied::Finished | Applied::Ignored => {}
            }
            applied
        });
        match applied {
            Some(applied) => applied == Applied::Finished,
            None => {
                tracing::debug!(generation, "Dropping event for a superseded turn");
                true
            }
        }
    }

    /// Abandon the current conversation and start a fresh one.
    ///
    /// Any in-flight turn is cancelled and can no longer touch the state. If
    /// creation fails the old conversation stays dropped.
    pub async fn start_new_conversation(&self) -> Result<ConversationId, SessionError> {
        let generation = self.shared.update(|inner| {
            if let Some(turn) = inner.turn.take() {
                turn.cancel();
            }
            inner.view = SessionSnapshot {
                generation: inner.view.generation + 1,
                ..SessionSnapshot::default()
            };
            inner.view.generation
        });
        tracing::info!(generation, "Starting new conversation");

        match self.lifecycle.replace_conversation().await {
            Ok(id) => {
                self.shared.update_if_current(generation, |inner| {
                    inner.view.conversation_id = Some(id.clone());
                });
                Ok(id)
            }
            Err(e) => {
                self.shared.update_if_current(generation, |inner| {
                    inner.view.error = Some(e.to_string());
                });
                Err(e.into())
            }
        }
    }

    /// Select exactly `citation`
    pub fn select_citation(&self, citation: Citation) {
        self.shared.update(|inner| inner.view.selection.select(citation));
    }

    /// Focus the message at `index`; `false` if there is none
    pub fn handle_message_click(&self, index: usize) -> bool {
        self.shared.update(|inner| {
            let Some(message) = inner.view.timeline.get(index).cloned() else {
                return false;
            };
            inner.view.selection.handle_message_click(&message);
            true
        })
    }

    /// Select the current citation behind marker `[k]`
    pub fn select_marker(&self, marker: u32) -> bool {
        self.shared.update(|inner| inner.view.selection.select_marker(marker))
    }
}
