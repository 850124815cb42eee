//! Error types for checkpoint operations

use thiserror::Error;

/// Errors that can occur while saving, loading, or listing checkpoints
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Checkpoint with the given id does not exist in the store
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// Invalid argument or store configuration
    #[error("Invalid checkpoint operation: {0}")]
    Invalid(String),

    /// Snapshot could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// File backend I/O failure
    #[error("Checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for CheckpointError {
    fn from(e: serde_json::Error) -> Self {
        CheckpointError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for CheckpointError {
    fn from(e: bincode::Error) -> Self {
        CheckpointError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CheckpointError>;
