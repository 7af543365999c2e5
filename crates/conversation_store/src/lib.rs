//! # Conversation Store
//!
//! Ordered collection of conversations and their messages, persisted as a
//! single JSON document through an injected key/value collaborator.

pub mod error;
pub mod storage;
pub mod store;

// Re-exports
pub use error::{Result, StoreError};
pub use storage::{DeletionMode, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use store::{ConversationStore, CONVERSATIONS_KEY};
