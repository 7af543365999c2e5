//! chat_state - State machine for chat turns
//!
//! This crate provides the state machine that tracks one user turn from
//! submission to its commit, cancellation or failure.

pub mod machine;

// Re-export commonly used types
pub use machine::{StateMachine, StateTransition, TransitionError, TurnEvent, TurnPhase};
