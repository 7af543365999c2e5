//! Outgoing chat request body and the non-streaming response shape.

use chat_core::WireMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::Suggestion;
use crate::payload::suggestions_from_value;

/// JSON body POSTed to the chat endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<WireMessage>,
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_agentic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
}

impl ChatRequest {
    pub fn new(messages: Vec<WireMessage>) -> Self {
        Self {
            messages,
            stream: true,
            persona_mode: None,
            use_agentic: None,
            selected_tools: None,
            max_iterations: None,
        }
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_persona_mode(mut self, persona_mode: Option<String>) -> Self {
        self.persona_mode = persona_mode;
        self
    }

    /// Enable agentic execution with the given tools and iteration cap.
    pub fn with_agentic(mut self, selected_tools: Vec<String>, max_iterations: Option<u32>) -> Self {
        self.use_agentic = Some(true);
        self.selected_tools = if selected_tools.is_empty() {
            None
        } else {
            Some(selected_tools)
        };
        self.max_iterations = max_iterations;
        self
    }
}

/// A complete (non-streaming) reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionResponse {
    pub content: String,
    pub reasoning: Option<String>,
    pub persona_mode: Option<String>,
    pub suggestions: Vec<Suggestion>,
    /// Server-confirmed id of the user message this reply answers.
    pub user_message_id: Option<String>,
}

fn string_at(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

impl CompletionResponse {
    /// Read a reply leniently: `content`, `message` (string or `{content}`),
    /// or OpenAI-compatible `choices[0].message.content`.
    pub fn from_json(value: &Value) -> Self {
        let content = string_at(value, &["content"])
            .or_else(|| match value.get("message") {
                Some(Value::String(text)) => Some(text.clone()),
                Some(message) => string_at(message, &["content"]),
                None => None,
            })
            .or_else(|| {
                value
                    .pointer("/choices/0/message/content")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_default();

        Self {
            content,
            reasoning: string_at(value, &["reasoning"]),
            persona_mode: string_at(value, &["persona_mode", "personaMode"]),
            suggestions: value
                .get("suggestions")
                .and_then(suggestions_from_value)
                .unwrap_or_default(),
            user_message_id: string_at(value, &["user_message_id", "userMessageId"]),
        }
    }
}
