//! Error types for the engine module.

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while talking to a resource engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Resource {type_token} '{name}' rejected: {message}")]
    ResourceRejected {
        type_token: String,
        name: String,
        message: String,
    },

    #[error("Duplicate resource URN: {0}")]
    DuplicateResource(String),

    #[error("Invoke of '{token}' failed: {message}")]
    InvokeFailed { token: String, message: String },

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
