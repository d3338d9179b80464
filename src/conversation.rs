//! Conversation data model
//!
//! Messages are immutable records. The [`Timeline`] only ever pushes a new
//! record or swaps the record at an index for a new one, so anything holding
//! an earlier snapshot keeps seeing exactly what it saw.

use crate::citation::{Citation, CitationPayload};
use crate::remote::HistoryRecord;
use crate::sse::truthy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque key the answer service uses to correlate turns
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn parse(role: &str) -> Option<Self> {
        match role {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One entry of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub citations: Vec<Citation>,
    pub is_clarification: bool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: new_local_id(),
            role: Role::User,
            content: content.into(),
            citations: Vec::new(),
            is_clarification: false,
        }
    }

    /// Empty assistant message opened at the start of a turn
    pub fn assistant_placeholder() -> Self {
        Self {
            id: new_local_id(),
            role: Role::Assistant,
            content: String::new(),
            citations: Vec::new(),
            is_clarification: false,
        }
    }

    /// Map a stored history record, or `None` for roles the timeline does
    /// not show (e.g. system summaries).
    pub fn from_history(record: HistoryRecord) -> Option<Self> {
        let role = Role::parse(&record.role)?;
        let (citations, is_clarification) = match role {
            Role::User => (Vec::new(), false),
            Role::Assistant => (
                record
                    .citations
                    .map(CitationPayload::from_value)
                    .map(CitationPayload::into_citations)
                    .unwrap_or_default(),
                record.is_clarification.as_ref().is_some_and(truthy),
            ),
        };
        Some(Self {
            id: record.id,
            role,
            content: record.content,
            citations,
            is_clarification,
        })
    }

    /// Copy with `fragment` appended to the content
    #[must_use]
    pub fn with_delta(&self, fragment: &str, is_clarification: bool) -> Self {
        let mut content = String::with_capacity(self.content.len() + fragment.len());
        content.push_str(&self.content);
        content.push_str(fragment);
        Self {
            content,
            is_clarification,
            ..self.clone()
        }
    }

    /// Copy with the citation list replaced wholesale
    #[must_use]
    pub fn with_citations(&self, citations: Vec<Citation>, is_clarification: bool) -> Self {
        Self {
            citations,
            is_clarification,
            ..self.clone()
        }
    }

    /// Copy whose content is replaced by a failure notice
    #[must_use]
    pub fn with_failure(&self, notice: &str) -> Self {
        Self {
            content: notice.to_string(),
            citations: Vec::new(),
            ..self.clone()
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    pub fn has_citations(&self) -> bool {
        !self.citations.is_empty()
    }
}

fn new_local_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Ordered, copy-on-write sequence of messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    messages: Vec<Arc<Message>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        Self {
            messages: messages.into_iter().map(Arc::new).collect(),
        }
    }

    /// Append a message, returning its index
    pub fn push(&mut self, message: Message) -> usize {
        self.messages.push(Arc::new(message));
        self.messages.len() - 1
    }

    /// Swap the record at `index`; `false` if there is no such index
    pub fn replace(&mut self, index: usize, message: Message) -> bool {
        match self.messages.get_mut(index) {
            Some(slot) => {
                *slot = Arc::new(message);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Message>> {
        self.messages.get(index)
    }

    pub fn messages(&self) -> &[Arc<Message>] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Newest assistant message that carries at least one citation
    pub fn latest_cited_answer(&self) -> Option<&Arc<Message>> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_assistant() && m.has_citations())
    }
}
