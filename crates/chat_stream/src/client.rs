//! HTTP transport for chat requests.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chat_core::Config;
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};

use crate::error::{Result, TransportError};
use crate::request::{ChatRequest, CompletionResponse};

/// Response header carrying the server-confirmed id of the submitted user message.
pub const USER_MESSAGE_ID_HEADER: &str = "x-user-message-id";

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

pub enum ChatResponse {
    /// `text/event-stream` body, consumed chunk by chunk.
    Stream {
        body: ByteStream,
        user_message_id: Option<String>,
    },
    /// Single JSON reply.
    Complete(CompletionResponse),
}

impl std::fmt::Debug for ChatResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatResponse::Stream {
                user_message_id, ..
            } => f
                .debug_struct("Stream")
                .field("user_message_id", user_message_id)
                .finish_non_exhaustive(),
            ChatResponse::Complete(response) => f.debug_tuple("Complete").field(response).finish(),
        }
    }
}

/// Sends a chat request and hands back the raw response.
///
/// Dropping a returned [`ChatResponse::Stream`] aborts the underlying transfer.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpChatClient {
    client: Client,
    endpoint: String,
    api_token: Option<String>,
}

impl HttpChatClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_token: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.endpoint_url()).with_token(config.api_token.clone())
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.api_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn is_event_stream(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("text/event-stream"))
        .unwrap_or(false)
}

fn user_message_id(response: &Response) -> Option<String> {
    response
        .headers()
        .get(USER_MESSAGE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl ChatTransport for HttpChatClient {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
        log::debug!(
            "POST {} ({} messages, stream={})",
            self.endpoint,
            request.messages.len(),
            request.stream
        );

        let mut builder = self.client.post(&self.endpoint).json(request);
        if request.stream {
            builder = builder.header(ACCEPT, "text/event-stream");
        }
        if let Some(token) = &self.api_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status { status, body });
        }

        let confirmed_id = user_message_id(&response);

        if is_event_stream(&response) {
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(TransportError::from));
            return Ok(ChatResponse::Stream {
                body: Box::pin(body),
                user_message_id: confirmed_id,
            });
        }

        let text = response.text().await?;
        let value: serde_json::Value = serde_json::from_str(&text)?;
        let mut completion = CompletionResponse::from_json(&value);
        if completion.user_message_id.is_none() {
            completion.user_message_id = confirmed_id;
        }
        Ok(ChatResponse::Complete(completion))
    }
}
