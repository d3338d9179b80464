//! reqwest implementation of the answer service

use super::{AnswerService, AskRequest, EventBody, HistoryPage};
use crate::conversation::ConversationId;
use crate::error::{RemoteError, StreamError};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;

const EVENT_STREAM: &str = "text/event-stream";

/// Answer service reached over HTTP
pub struct HttpAnswerService {
    client: Client,
    base_url: String,
    base: Url,
}

impl HttpAnswerService {
    /// `connect_timeout` bounds connection setup only; answer streams may
    /// legitimately stay open for a long time.
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| RemoteError::unknown(format!("Failed to create HTTP client: {e}")))?;
        let base = Url::parse(base_url)
            .map_err(|e| RemoteError::unknown(format!("Invalid base URL {base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::unknown(format!("Base URL cannot carry a path: {base_url}")));
        }

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            base,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// History endpoint with the id percent-encoded as one path segment
    fn messages_url(&self, id: &ConversationId) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| RemoteError::unknown("Base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(["api", "conversations", id.as_str(), "messages"]);
        Ok(url)
    }

    fn classify_error(status: StatusCode, body: &str) -> RemoteError {
        match status.as_u16() {
            404 => RemoteError::not_found(format!("Conversation not found: {body}")),
            500..=599 => RemoteError::server_error(format!("Server error: {body}")),
            _ => RemoteError::unknown(format!("HTTP {status}: {body}")),
        }
    }

    fn classify_send_error(e: &reqwest::Error) -> RemoteError {
        if e.is_timeout() {
            RemoteError::network(format!("Request timeout: {e}"))
        } else if e.is_connect() {
            RemoteError::network(format!("Connection failed: {e}"))
        } else {
            RemoteError::unknown(format!("Request failed: {e}"))
        }
    }

    /// Pass successful responses through, turn the rest into errors
    async fn check_status(response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Self::classify_error(status, &body))
    }
}

#[async_trait]
impl AnswerService for HttpAnswerService {
    async fn create_conversation(&self) -> Result<ConversationId, RemoteError> {
        let response = self
            .client
            .post(self.url("/api/conversations"))
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| Self::classify_send_error(&e))?;
        let response = Self::check_status(response).await?;

        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::network(format!("Failed to read response: {e}")))?;
        let created: CreateConversationResponse = serde_json::from_str(&body).map_err(|e| {
            RemoteError::invalid_response(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        match created.conversation_id {
            Some(id) if !id.is_empty() => Ok(ConversationId::new(id)),
            _ => Err(RemoteError::invalid_response(
                "Create conversation response has no conversation_id",
            )),
        }
    }

    async fn fetch_messages(
        &self,
        id: &ConversationId,
        limit: u32,
        offset: u32,
    ) -> Result<HistoryPage, RemoteError> {
        let response = self
            .client
            .get(self.messages_url(id)?)
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await
            .map_err(|e| Self::classify_send_error(&e))?;
        let response = Self::check_status(response).await?;

        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::network(format!("Failed to read response: {e}")))?;
        serde_json::from_str(&body).map_err(|e| {
            RemoteError::invalid_response(format!("Failed to parse history: {e} - body: {body}"))
        })
    }

    async fn ask(&self, request: &AskRequest) -> Result<EventBody, RemoteError> {
        let response = self
            .client
            .post(self.url("/api/ask"))
            .header(ACCEPT, EVENT_STREAM)
            .json(request)
            .send()
            .await
            .map_err(|e| Self::classify_send_error(&e))?;
        let response = Self::check_status(response).await?;

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamError::new(format!("Answer stream broke: {e}"))))
            .boxed())
    }
}

#[derive(Debug, Deserialize)]
struct CreateConversationResponse {
    #[serde(default)]
    conversation_id: Option<String>,
}
