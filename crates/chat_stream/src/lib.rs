pub mod client;
pub mod error;
pub mod event;
pub mod payload;
pub mod request;
pub mod sse;

pub use client::{ByteStream, ChatResponse, ChatTransport, HttpChatClient};
pub use error::{Result, TransportError};
pub use event::{StreamEvent, Suggestion};
pub use request::{ChatRequest, CompletionResponse};
pub use sse::{Events, SseParser};
