//! Turn phases - Defines all possible states of a chat turn

use serde::{Deserialize, Serialize};

/// Defines the possible phases of one user turn.
///
/// `Committed`, `Cancelled` and `Failed` end the turn; only `Reset` leaves them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    /// No turn in progress.
    #[default]
    Idle,

    /// The user message was stored optimistically and the request is on its way.
    Sending,

    /// The response is arriving.
    Streaming,

    /// The assistant message was committed to the conversation.
    Committed,

    /// The user cancelled; nothing was committed.
    Cancelled,

    /// The request or stream failed; the optimistic message was rolled back.
    Failed {
        error_message: String,
        failed_at: String, // ISO timestamp
    },
}

impl TurnPhase {
    /// Check if this is a terminal state (the turn is over).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Cancelled | Self::Failed { .. })
    }

    /// Check if a turn is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Sending | Self::Streaming)
    }
}
