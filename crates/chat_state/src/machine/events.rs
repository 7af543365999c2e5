//! Turn events - Defines events that trigger state transitions

use serde::{Deserialize, Serialize};

/// Defines the events that can trigger state transitions in the FSM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEvent {
    // ========== User Events ==========
    /// User submitted a new message.
    UserSubmitted,

    /// User cancelled the in-flight turn.
    UserCancelled,

    // ========== Transport Events ==========
    /// The backend accepted the request and its response started.
    ResponseStarted,

    /// A chunk of the response stream arrived.
    ChunkReceived,

    /// The response finished (`done` event or natural end of stream) and the
    /// assistant message was committed.
    ResponseCompleted,

    /// The request or the stream failed.
    TransportFailed { error: String },

    // ========== Lifecycle ==========
    /// Return a finished turn to idle.
    Reset,
}

impl TurnEvent {
    /// Check if this event is user-initiated.
    pub fn is_user_event(&self) -> bool {
        matches!(self, Self::UserSubmitted | Self::UserCancelled)
    }

    /// Check if this is an error event.
    pub fn is_error_event(&self) -> bool {
        matches!(self, Self::TransportFailed { .. })
    }

    /// Short name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserSubmitted => "user_submitted",
            Self::UserCancelled => "user_cancelled",
            Self::ResponseStarted => "response_started",
            Self::ChunkReceived => "chunk_received",
            Self::ResponseCompleted => "response_completed",
            Self::TransportFailed { .. } => "transport_failed",
            Self::Reset => "reset",
        }
    }
}
