//! Answer service abstraction
//!
//! The retrieval/answer backend is an external collaborator. Everything the
//! session needs from it goes through [`AnswerService`].

mod http;

pub use http::HttpAnswerService;

use crate::conversation::ConversationId;
use crate::error::{RemoteError, StreamError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Raw answer stream body, chunked however the transport likes
pub type EventBody = BoxStream<'static, Result<Bytes, StreamError>>;

/// Body of `POST /api/ask`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AskRequest {
    pub query: String,
    pub filters: AskFilters,
    pub conversation_id: ConversationId,
    pub use_context: bool,
}

/// Optional restriction of retrieval to one book
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AskFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_title: Option<String>,
}

impl AskFilters {
    pub fn book_title(title: impl Into<String>) -> Self {
        Self {
            book_id: None,
            book_title: Some(title.into()),
        }
    }
}

/// One page of stored conversation history
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryPage {
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub messages: Vec<HistoryRecord>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// Stored message as the service returns it
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub citations: Option<Value>,
    #[serde(default)]
    pub is_clarification: Option<Value>,
}

#[async_trait]
pub trait AnswerService: Send + Sync {
    /// `POST /api/conversations`
    async fn create_conversation(&self) -> Result<ConversationId, RemoteError>;

    /// `GET /api/conversations/{id}/messages`; an unknown id fails with
    /// [`RemoteErrorKind::NotFound`](crate::error::RemoteErrorKind::NotFound)
    async fn fetch_messages(
        &self,
        id: &ConversationId,
        limit: u32,
        offset: u32,
    ) -> Result<HistoryPage, RemoteError>;

    /// `POST /api/ask` with an event-stream response
    async fn ask(&self, request: &AskRequest) -> Result<EventBody, RemoteError>;
}

#[async_trait]
impl<T: AnswerService + ?Sized> AnswerService for Arc<T> {
    async fn create_conversation(&self) -> Result<ConversationId, RemoteError> {
        (**self).create_conversation().await
    }

    async fn fetch_messages(
        &self,
        id: &ConversationId,
        limit: u32,
        offset: u32,
    ) -> Result<HistoryPage, RemoteError> {
        (**self).fetch_messages(id, limit, offset).await
    }

    async fn ask(&self, request: &AskRequest) -> Result<EventBody, RemoteError> {
        (**self).ask(request).await
    }
}

/// Logging wrapper for answer services
pub struct LoggingAnswerService<T> {
    inner: T,
}

impl<T: AnswerService> LoggingAnswerService<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    fn log_outcome<V>(operation: &str, started: std::time::Instant, result: &Result<V, RemoteError>) {
        let duration_ms = started.elapsed().as_millis();
        match result {
            Ok(_) => tracing::info!(operation, duration_ms = %duration_ms, "Answer service call completed"),
            Err(e) if e.is_not_found() => {
                tracing::info!(operation, duration_ms = %duration_ms, "Answer service reports unknown conversation");
            }
            Err(e) => tracing::error!(
                operation,
                duration_ms = %duration_ms,
                error = %e.message,
                retryable = e.kind.is_retryable(),
                "Answer service call failed"
            ),
        }
    }
}

#[async_trait]
impl<T: AnswerService> AnswerService for LoggingAnswerService<T> {
    async fn create_conversation(&self) -> Result<ConversationId, RemoteError> {
        let started = std::time::Instant::now();
        let result = self.inner.create_conversation().await;
        Self::log_outcome("create_conversation", started, &result);
        result
    }

    async fn fetch_messages(
        &self,
        id: &ConversationId,
        limit: u32,
        offset: u32,
    ) -> Result<HistoryPage, RemoteError> {
        let started = std::time::Instant::now();
        let result = self.inner.fetch_messages(id, limit, offset).await;
        Self::log_outcome("fetch_messages", started, &result);
        result
    }

    async fn ask(&self, request: &AskRequest) -> Result<EventBody, RemoteError> {
        let started = std::time::Instant::now();
        let result = self.inner.ask(request).await;
        Self::log_outcome("ask", started, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ask_request_wire_shape() {
        let request = AskRequest {
            query: "What does the note say about habits?".to_string(),
            filters: AskFilters::default(),
            conversation_id: ConversationId::new("c-1"),
            use_context: true,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "query": "What does the note say about habits?",
                "filters": {},
                "conversation_id": "c-1",
                "use_context": true
            })
        );

        let filtered = AskRequest {
            filters: AskFilters::book_title("Atomic Habits"),
            ..request
        };
        assert_eq!(
            serde_json::to_value(&filtered).unwrap()["filters"],
            json!({ "book_title": "Atomic Habits" })
        );
    }

    #[test]
    fn history_page_tolerates_missing_optionals() {
        let page: HistoryPage = serde_json::from_value(json!({
            "conversation_id": "c-1",
            "messages": [
                { "id": "m1", "role": "user", "content": "q" },
                { "id": "m2", "role": "assistant", "content": "a", "citations": null, "is_clarification": 0 }
            ],
            "limit": 50,
            "offset": 0,
            "total": 2
        }))
        .unwrap();
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.total, Some(2));
        assert!(page.messages[0].citations.is_none());
    }
}
