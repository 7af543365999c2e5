//! Typed events decoded from the response stream.

use serde::{Deserialize, Serialize};

/// A follow-up prompt offered by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
}

impl Suggestion {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// One classified SSE frame. Consumed immediately, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Status(String),
    /// The complete reasoning text so far, not a delta.
    Reasoning(String),
    Suggestions(Vec<Suggestion>),
    ContentDelta(String),
    Done,
}

impl StreamEvent {
    pub fn is_done(&self) -> bool {
        matches!(self, StreamEvent::Done)
    }
}
