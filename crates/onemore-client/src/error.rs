use thiserror::Error;
use uuid::Uuid;

use onemore_types::StoreError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("this participant was already claimed by someone else")]
    AlreadyClaimed,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("only the session owner can do this")]
    NotOwner,

    #[error("you can only count drinks for your own participant")]
    NotPermitted,

    #[error("participant {0} is still being created")]
    ParticipantPending(String),

    #[error("unknown participant {0}")]
    UnknownParticipant(String),

    #[error("unknown drink type {0}")]
    UnknownDrinkType(Uuid),

    #[error("pick a drink type")]
    DrinkTypeRequired,

    #[error("session has no drink types")]
    NoDrinkTypes,

    #[error("name must not be empty")]
    InvalidName,

    #[error("session view is closed")]
    Closed,

    #[error("auth state file: {0}")]
    Io(#[from] std::io::Error),

    #[error("auth state is not valid JSON: {0}")]
    State(#[from] serde_json::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
