//! MessageAttachment - files carried alongside a user message
//!
//! Attachments are opaque to the chat pipeline; they are stored with the
//! message and never interpreted here.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageAttachment {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Remote location of the file, when uploaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Inline content (base64 or text), when not uploaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl MessageAttachment {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            mime_type: mime_type.into(),
            size: None,
            url: None,
            content: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        let content = content.into();
        self.size = Some(content.len() as u64);
        self.content = Some(content);
        self
    }
}
