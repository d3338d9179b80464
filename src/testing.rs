//! Mock implementations for testing
//!
//! These mocks let the session run end to end without a real answer service.

use crate::conversation::ConversationId;
use crate::error::{RemoteError, StoreError, StreamError};
use crate::remote::{AnswerService, AskRequest, EventBody, HistoryPage, HistoryRecord};
use crate::store::IdentityStore;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Scripted response to one `ask` call
#[allow(dead_code)]
pub enum MockAnswer {
    /// Stream these chunks, then close
    Chunks(Vec<Bytes>),
    /// Stream these chunks, then break with a transport error
    ChunksThenError(Vec<Bytes>, StreamError),
    /// Stream these chunks, then never produce anything again
    ChunksThenHang(Vec<Bytes>),
    /// Reject the request outright
    Fail(RemoteError),
}

impl MockAnswer {
    /// Stream a body cut into the given pieces
    pub fn body(pieces: &[&str]) -> Self {
        MockAnswer::Chunks(to_chunks(pieces))
    }

    fn into_result(self) -> Result<EventBody, RemoteError> {
        let ok = |chunks: Vec<Bytes>| stream::iter(chunks.into_iter().map(Ok));
        Ok(match self {
            MockAnswer::Chunks(chunks) => ok(chunks).boxed(),
            MockAnswer::ChunksThenError(chunks, err) => {
                ok(chunks).chain(stream::once(async move { Err(err) })).boxed()
            }
            MockAnswer::ChunksThenHang(chunks) => ok(chunks).chain(stream::pending()).boxed(),
            MockAnswer::Fail(err) => return Err(err),
        })
    }
}

pub fn to_chunks(pieces: &[&str]) -> Vec<Bytes> {
    pieces
        .iter()
        .map(|piece| Bytes::copy_from_slice(piece.as_bytes()))
        .collect()
}

/// One wire frame
pub fn sse_frame(event: &str, data: &str) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

pub fn history_record(id: &str, role: &str, content: &str, citations: Option<Value>) -> HistoryRecord {
    HistoryRecord {
        id: id.to_string(),
        role: role.to_string(),
        content: content.to_string(),
        citations,
        is_clarification: None,
    }
}

/// Mock answer service with scripted responses
#[allow(dead_code)]
pub struct MockAnswerService {
    creates: Mutex<VecDeque<Result<ConversationId, RemoteError>>>,
    create_count: Mutex<usize>,
    histories: Mutex<HashMap<String, Result<Vec<HistoryRecord>, RemoteError>>>,
    fetches: Mutex<Vec<(String, u32, u32)>>,
    answers: Mutex<VecDeque<MockAnswer>>,
    /// Record of all ask requests made
    pub asks: Mutex<Vec<AskRequest>>,
    /// Signalled each time an ask request arrives
    pub ask_started: Arc<Notify>,
}

#[allow(dead_code)]
impl MockAnswerService {
    pub fn new() -> Self {
        Self {
            creates: Mutex::new(VecDeque::new()),
            create_count: Mutex::new(0),
            histories: Mutex::new(HashMap::new()),
            fetches: Mutex::new(Vec::new()),
            answers: Mutex::new(VecDeque::new()),
            asks: Mutex::new(Vec::new()),
            ask_started: Arc::new(Notify::new()),
        }
    }

    /// Script the next create call. Unscripted calls hand out `c-1`, `c-2`, ...
    pub fn queue_create(&self, result: Result<ConversationId, RemoteError>) {
        self.creates.lock().unwrap().push_back(result);
    }

    pub fn insert_history(&self, id: &str, records: Vec<HistoryRecord>) {
        self.histories.lock().unwrap().insert(id.to_string(), Ok(records));
    }

    pub fn fail_history(&self, id: &str, error: RemoteError) {
        self.histories.lock().unwrap().insert(id.to_string(), Err(error));
    }

    pub fn queue_answer(&self, answer: MockAnswer) {
        self.answers.lock().unwrap().push_back(answer);
    }

    pub fn create_calls(&self) -> usize {
        *self.create_count.lock().unwrap()
    }

    pub fn fetch_calls(&self) -> Vec<(String, u32, u32)> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn recorded_asks(&self) -> Vec<AskRequest> {
        self.asks.lock().unwrap().clone()
    }
}

impl Default for MockAnswerService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnswerService for MockAnswerService {
    async fn create_conversation(&self) -> Result<ConversationId, RemoteError> {
        let n = {
            let mut count = self.create_count.lock().unwrap();
            *count += 1;
            *count
        };
        // let a concurrent caller run, as a real request would
        tokio::task::yield_now().await;
        self.creates
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ConversationId::new(format!("c-{n}"))))
    }

    async fn fetch_messages(
        &self,
        id: &ConversationId,
        limit: u32,
        offset: u32,
    ) -> Result<HistoryPage, RemoteError> {
        self.fetches
            .lock()
            .unwrap()
            .push((id.to_string(), limit, offset));
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        let stored = self.histories.lock().unwrap().get(id.as_str()).cloned();
        match stored {
            Some(Ok(records)) => Ok(HistoryPage {
                conversation_id: Some(id.to_string()),
                total: Some(records.len() as u64),
                messages: records,
                limit: Some(limit),
                offset: Some(offset),
            }),
            Some(Err(e)) => Err(e),
            None => Err(RemoteError::not_found(format!("Conversation not found: {id}"))),
        }
    }

    async fn ask(&self, request: &AskRequest) -> Result<EventBody, RemoteError> {
        self.asks.lock().unwrap().push(request.clone());
        self.ask_started.notify_one();
        let answer = self.answers.lock().unwrap().pop_front();
        match answer {
            Some(answer) => answer.into_result(),
            None => Err(RemoteError::network("No mock answer queued")),
        }
    }
}

/// Identity slot whose every I/O fails
pub struct FailingIdentityStore;

impl FailingIdentityStore {
    fn error() -> StoreError {
        StoreError::Io(std::io::Error::other("disk full"))
    }
}

impl IdentityStore for FailingIdentityStore {
    fn load(&self) -> Result<Option<ConversationId>, StoreError> {
        Err(Self::error())
    }

    fn save(&self, _id: &ConversationId) -> Result<(), StoreError> {
        Err(Self::error())
    }

    fn clear(&self) -> Result<(), StoreError> {
        Err(Self::error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_answer_service() {
        let mock = MockAnswerService::new();
        assert_eq!(mock.create_conversation().await.unwrap(), ConversationId::new("c-1"));
        assert_eq!(mock.create_conversation().await.unwrap(), ConversationId::new("c-2"));

        let missing = mock.fetch_messages(&ConversationId::new("x"), 10, 0).await;
        assert!(missing.unwrap_err().is_not_found());

        mock.queue_answer(MockAnswer::body(&["event: done\n", "data: {}\n"]));
        let request = AskRequest {
            query: "q".to_string(),
            filters: crate::remote::AskFilters::default(),
            conversation_id: ConversationId::new("c-1"),
            use_context: true,
        };
        let body: Vec<_> = mock.ask(&request).await.unwrap().collect().await;
        assert_eq!(body.len(), 2);

        // Second call should fail (no more answers)
        assert!(mock.ask(&request).await.is_err());
        assert_eq!(mock.recorded_asks().len(), 2);
    }
}
