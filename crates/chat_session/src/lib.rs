//! chat_session - Drives one user turn at a time per conversation
//!
//! - `stream` - Folds stream events into the assistant message
//! - `controller` - Submission, cancellation and commit of turns
//! - `config` - Budget and request defaults

pub mod config;
pub mod controller;
pub mod error;
pub mod stream;

pub use config::SessionConfig;
pub use controller::{AgenticOptions, SessionController, Submission, TurnOutcome};
pub use error::{Result, SessionError};
pub use stream::{LiveTurn, ResponseAggregator, TurnState};
