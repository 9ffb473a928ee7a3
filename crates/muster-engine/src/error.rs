//! Engine session error types.

use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while talking to a remote engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine is not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("engine {addr} speaks api {version}, minimum supported is {minimum}")]
    VersionIncompatible {
        addr: String,
        version: String,
        minimum: String,
    },

    #[error("engine {engine}: {message}")]
    Remote { engine: String, message: String },

    #[error("no such container: {0}")]
    NoSuchContainer(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("invalid container config: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
