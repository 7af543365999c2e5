//! State transitions - FSM transition logic
//!
//! Implements the state machine that handles event-driven state transitions.

use thiserror::Error;

use super::events::TurnEvent;
use super::states::TurnPhase;

/// Error type for invalid state transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition from {from:?} with event {event}")]
    InvalidTransition { from: TurnPhase, event: String },

    #[error("State machine is in terminal state: {0:?}")]
    TerminalState(TurnPhase),
}

/// Represents a state transition result.
#[derive(Debug, Clone)]
pub struct StateTransition {
    /// The state before the transition.
    pub from: TurnPhase,
    /// The state after the transition.
    pub to: TurnPhase,
    /// The event that triggered the transition.
    pub event: TurnEvent,
    /// Whether the state actually changed.
    pub changed: bool,
}

/// State machine for managing turn state transitions.
#[derive(Debug, Clone)]
pub struct StateMachine {
    /// Current state.
    current_state: TurnPhase,
    /// Transition history (limited).
    history: Vec<StateTransition>,
    /// Max history entries to keep.
    max_history: usize,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine in Idle state.
    pub fn new() -> Self {
        Self::with_state(TurnPhase::Idle)
    }

    /// Create a state machine with a specific initial state.
    pub fn with_state(state: TurnPhase) -> Self {
        Self {
            current_state: state,
            history: Vec::new(),
            max_history: 50,
        }
    }

    /// Get the current state.
    pub fn state(&self) -> &TurnPhase {
        &self.current_state
    }

    /// Get the transition history.
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Handle an event; events that are not valid in the current state leave
    /// it unchanged.
    pub fn handle_event(&mut self, event: TurnEvent) -> StateTransition {
        let next = Self::compute_next_state(&self.current_state, &event)
            .unwrap_or_else(|| self.current_state.clone());
        self.apply(next, event)
    }

    /// Handle an event, rejecting events that are not valid in the current state.
    pub fn try_handle_event(&mut self, event: TurnEvent) -> Result<StateTransition, TransitionError> {
        match Self::compute_next_state(&self.current_state, &event) {
            Some(next) => Ok(self.apply(next, event)),
            None if self.current_state.is_terminal() => {
                Err(TransitionError::TerminalState(self.current_state.clone()))
            }
            None => Err(TransitionError::InvalidTransition {
                from: self.current_state.clone(),
                event: event.name().to_string(),
            }),
        }
    }

    fn apply(&mut self, new_state: TurnPhase, event: TurnEvent) -> StateTransition {
        let old_state = std::mem::replace(&mut self.current_state, new_state.clone());
        let changed = old_state != new_state;

        if changed {
            tracing::debug!(from = ?old_state, to = ?new_state, event = event.name(), "turn transition");
        }

        let transition = StateTransition {
            from: old_state,
            to: new_state,
            event,
            changed,
        };

        // Add to history
        self.history.push(transition.clone());
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        transition
    }

    /// Compute the next state, or `None` when the event is not valid here.
    fn compute_next_state(state: &TurnPhase, event: &TurnEvent) -> Option<TurnPhase> {
        use TurnEvent::*;
        use TurnPhase::*;

        let next = match (state, event) {
            // ========== Idle Transitions ==========
            (Idle, UserSubmitted) => Sending,

            // ========== Sending ==========
            (Sending, ResponseStarted) => Streaming,

            // ========== Streaming ==========
            (Streaming, ChunkReceived) => Streaming,
            (Streaming, ResponseCompleted) => Committed,

            // ========== Cancellation and Failure ==========
            (Sending | Streaming, UserCancelled) => Cancelled,
            (Sending | Streaming, TransportFailed { error }) => Failed {
                error_message: error.clone(),
                failed_at: chrono::Utc::now().to_rfc3339(),
            },

            // ========== Turn End ==========
            (Committed | Cancelled | Failed { .. }, Reset) => Idle,
            (Idle, Reset) => Idle,

            _ => return None,
        };

        Some(next)
    }

    /// Check if a transition is valid without executing it.
    pub fn can_transition(&self, event: &TurnEvent) -> bool {
        Self::compute_next_state(&self.current_state, event).is_some()
    }

    /// Reset to Idle state.
    pub fn reset(&mut self) {
        self.current_state = TurnPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_committed_flow() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.state(), &TurnPhase::Idle);

        let t1 = sm.try_handle_event(TurnEvent::UserSubmitted).unwrap();
        assert!(t1.changed);
        assert_eq!(sm.state(), &TurnPhase::Sending);

        sm.try_handle_event(TurnEvent::ResponseStarted).unwrap();
        let chunk = sm.try_handle_event(TurnEvent::ChunkReceived).unwrap();
        assert!(!chunk.changed);

        sm.try_handle_event(TurnEvent::ResponseCompleted).unwrap();
        assert_eq!(sm.state(), &TurnPhase::Committed);
        assert!(sm.state().is_terminal());
    }

    #[test]
    fn test_cancel_from_sending_and_streaming() {
        let mut sm = StateMachine::with_state(TurnPhase::Sending);
        sm.try_handle_event(TurnEvent::UserCancelled).unwrap();
        assert_eq!(sm.state(), &TurnPhase::Cancelled);

        let mut sm = StateMachine::with_state(TurnPhase::Streaming);
        sm.try_handle_event(TurnEvent::UserCancelled).unwrap();
        assert_eq!(sm.state(), &TurnPhase::Cancelled);
    }

    #[test]
    fn test_failure_records_error() {
        let mut sm = StateMachine::with_state(TurnPhase::Streaming);
        sm.try_handle_event(TurnEvent::TransportFailed {
            error: "connection reset".to_string(),
        })
        .unwrap();

        match sm.state() {
            TurnPhase::Failed { error_message, .. } => assert_eq!(error_message, "connection reset"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn test_terminal_states_reject_stream_events() {
        let mut sm = StateMachine::with_state(TurnPhase::Cancelled);
        let err = sm.try_handle_event(TurnEvent::ChunkReceived).unwrap_err();
        assert_eq!(err, TransitionError::TerminalState(TurnPhase::Cancelled));

        sm.try_handle_event(TurnEvent::Reset).unwrap();
        assert_eq!(sm.state(), &TurnPhase::Idle);
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut sm = StateMachine::new();
        let err = sm.try_handle_event(TurnEvent::ResponseCompleted).unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
        assert_eq!(sm.state(), &TurnPhase::Idle);
        assert!(!sm.can_transition(&TurnEvent::ChunkReceived));
    }

    #[test]
    fn test_lenient_handle_keeps_state() {
        let mut sm = StateMachine::with_state(TurnPhase::Streaming);
        let t = sm.handle_event(TurnEvent::UserSubmitted);
        assert!(!t.changed);
        assert_eq!(sm.state(), &TurnPhase::Streaming);
    }

    #[test]
    fn test_history_tracking() {
        let mut sm = StateMachine::new();
        sm.handle_event(TurnEvent::UserSubmitted);
        sm.handle_event(TurnEvent::ResponseStarted);

        assert_eq!(sm.history().len(), 2);
    }
}
