//! Error types for batch processing

use thiserror::Error;

/// Errors from configuration, ingestion, and batch execution
#[derive(Debug, Error)]
pub enum BatchError {
    /// Bad configuration (sizes below 1, missing path, disabled processor)
    #[error("Invalid batch configuration: {0}")]
    Config(String),

    /// CSV could not be read, decoded, or was structurally unusable
    #[error("CSV error: {0}")]
    Csv(String),

    /// Instruction generation failed beyond what the fallback covers
    #[error("Instruction generation failed: {0}")]
    Instruction(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BatchError>;
