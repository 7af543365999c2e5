//! Message module - conversation messages and their wire projection
//!
//! `Message` is the stored form; `WireMessage` is the `{role, content}` pair
//! sent to the backend.

mod attachment;

pub use attachment::MessageAttachment;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix used for ids assigned to optimistic messages before the server
/// confirms them.
pub const TEMPORARY_ID_PREFIX: &str = "temp-";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default = "generate_id")]
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<MessageAttachment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            attachments: None,
            persona_mode: None,
            reasoning: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Give the message a temporary id (`temp-<uuid>`) for optimistic insertion.
    pub fn with_temporary_id(mut self) -> Self {
        self.id = format!("{}{}", TEMPORARY_ID_PREFIX, Uuid::new_v4());
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<MessageAttachment>) -> Self {
        self.attachments = if attachments.is_empty() {
            None
        } else {
            Some(attachments)
        };
        self
    }

    pub fn with_persona_mode(mut self, persona_mode: Option<String>) -> Self {
        self.persona_mode = persona_mode;
        self
    }

    pub fn with_reasoning(mut self, reasoning: Option<String>) -> Self {
        self.reasoning = reasoning;
        self
    }

    pub fn has_temporary_id(&self) -> bool {
        self.id.starts_with(TEMPORARY_ID_PREFIX)
    }

    /// Project to the `{role, content}` pair sent to the backend.
    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Role/content pair as it appears in the outgoing request.
///
/// Internal fields like `id` and `created_at` never leak into requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl WireMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}
