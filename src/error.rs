//! Typed failures surfaced to callers
//!
//! Nothing here is fatal: every error is scoped to the operation that raised
//! it and its `Display` text is meant for a user-facing notification.

use thiserror::Error;

/// Failure of the remote task store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid task: {0}")]
    Validation(String),

    #[error("task {0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("task store unavailable: {0}")]
    Unavailable(String),
}

/// Failure of an optimistic mutation or a view fetch
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not signed in")]
    NotAuthenticated,

    #[error("task {0} is still being created")]
    PendingCreate(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure of an AI request
#[derive(Debug, Error)]
pub enum AiError {
    /// Network failure or an unusable reply from a transport
    #[error("AI transport failed: {0}")]
    Transport(String),

    #[error("AI service not available (API key missing)")]
    MissingCredential,

    /// The provider answered with an error
    #[error("{0}")]
    Provider(String),

    #[error("AI returned an empty response")]
    EmptyResponse,

    #[error("could not read AI response: {0}")]
    Malformed(String),

    #[error("AI response has an unexpected shape: {0}")]
    UnexpectedShape(String),

    #[error("invalid AI request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        AiError::Transport(err.to_string())
    }
}
