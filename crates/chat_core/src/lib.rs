//! chat_core - Core types for streaming chat sessions
//!
//! This crate provides the foundational types used across the chat crates:
//! - `message` - Message, Role, attachments and the wire projection
//! - `conversation` - Conversation records and title derivation
//! - `budget` - Token estimation and history truncation
//! - `config` - Client configuration (file + environment)

pub mod budget;
pub mod config;
pub mod conversation;
pub mod message;
pub mod paths;

// Re-export commonly used types
pub use budget::{fit_to_budget, fit_to_budget_with, HeuristicTokenCounter, TokenCounter};
pub use config::Config;
pub use conversation::{Conversation, DEFAULT_CONVERSATION_TITLE};
pub use message::{Message, MessageAttachment, Role, WireMessage};
