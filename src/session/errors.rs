//! Error types for conversation persistence and session resolution

use thiserror::Error;

use super::models::ConversationId;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Another writer already holds this session id
    #[error("Conversation for session '{0}' already exists")]
    UniqueViolation(String),

    #[error("Conversation {0} does not exist")]
    MissingConversation(ConversationId),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Could not create or find conversation for session '{session_id}' after {attempts} attempts")]
    ConflictExhausted { session_id: String, attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type SessionResult<T> = Result<T, SessionError>;
