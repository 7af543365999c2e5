//! Conversation records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{Message, Role};

/// Placeholder title given to conversations until the first user message
/// names them.
pub const DEFAULT_CONVERSATION_TITLE: &str = "New Chat";

/// Maximum number of characters taken from the first user message when
/// deriving a title.
pub const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_mode: Option<String>,
    /// Tombstone for soft-deleted conversations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        let title = title.into();
        Self {
            id: Uuid::new_v4().to_string(),
            title: if title.trim().is_empty() {
                DEFAULT_CONVERSATION_TITLE.to_string()
            } else {
                title
            },
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            persona_mode: None,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_CONVERSATION_TITLE
    }

    /// Append a message, bump `updated_at` and derive the title from the first
    /// user message while the title is still the placeholder.
    pub fn push_message(&mut self, message: Message) {
        let is_first_user_message =
            message.role == Role::User && !self.messages.iter().any(|m| m.role == Role::User);

        if is_first_user_message && self.has_default_title() {
            if let Some(title) = derive_title(&message.content) {
                self.title = title;
            }
        }

        if message.role == Role::Assistant && message.persona_mode.is_some() {
            self.persona_mode = message.persona_mode.clone();
        }

        self.messages.push(message);
        self.touch();
    }

    /// Remove a message by id, returning it. Remaining order is untouched.
    ///
    /// Removing the only user message also drops the title derived from it.
    pub fn remove_message(&mut self, message_id: &str) -> Option<Message> {
        let index = self.messages.iter().position(|m| m.id == message_id)?;
        let removed = self.messages.remove(index);

        let named_after_removed = removed.role == Role::User
            && !self.messages.iter().any(|m| m.role == Role::User)
            && derive_title(&removed.content).as_deref() == Some(self.title.as_str());
        if named_after_removed {
            self.title = DEFAULT_CONVERSATION_TITLE.to_string();
        }

        self.touch();
        Some(removed)
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    pub fn mark_deleted(&mut self) {
        let now = self.next_timestamp();
        self.deleted_at = Some(now);
        self.updated_at = now;
    }

    fn touch(&mut self) {
        self.updated_at = self.next_timestamp();
    }

    // Clock skew must never produce updated_at < created_at.
    fn next_timestamp(&self) -> DateTime<Utc> {
        Utc::now().max(self.created_at)
    }
}

/// Build a title from message content: whitespace collapsed, trimmed, cut to
/// [`TITLE_MAX_CHARS`] characters with an ellipsis when truncated.
pub fn derive_title(content: &str) -> Option<String> {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }

    if collapsed.chars().count() <= TITLE_MAX_CHARS {
        return Some(collapsed);
    }

    let cut: String = collapsed.chars().take(TITLE_MAX_CHARS).collect();
    Some(format!("{}…", cut.trim_end()))
}
