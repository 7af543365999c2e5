//! State machine module
//!
//! Contains the FSM implementation for the chat turn lifecycle.

mod events;
mod states;
mod transitions;

pub use events::TurnEvent;
pub use states::TurnPhase;
pub use transitions::{StateMachine, StateTransition, TransitionError};
