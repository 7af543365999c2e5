use chat_state::TransitionError;
use chat_stream::TransportError;
use conversation_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A turn is already in progress for conversation {0}")]
    TurnInProgress(String),

    #[error("Conversation not found: {0}")]
    NotFound(String),

    #[error("Failed to send message: {0}")]
    Transport(#[from] TransportError),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Invalid turn state: {0}")]
    Transition(#[from] TransitionError),
}

impl From<StoreError> for SessionError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => SessionError::NotFound(id),
            other => SessionError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
