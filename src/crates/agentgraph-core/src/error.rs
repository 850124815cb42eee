//! Error types for graph construction and execution

use crate::state::StateError;
use agentgraph_checkpoint::CheckpointError;
use thiserror::Error;

/// Errors produced by the graph engine
#[derive(Debug, Error)]
pub enum GraphError {
    /// Structural problem found while building or compiling a graph
    #[error("Validation error: {0}")]
    Validation(String),

    /// A node executor returned an error
    #[error("Node '{node}' failed: {message}")]
    NodeExecution { node: String, message: String },

    /// Generic execution failure outside a specific node
    #[error("Execution error: {0}")]
    Execution(String),

    /// The wave counter hit the configured bound before reaching END
    #[error("Maximum iterations ({0}) exceeded")]
    MaxIterations(usize),

    /// Execution was cancelled cooperatively
    #[error("Execution cancelled")]
    Cancelled,

    /// A sub-node or tool call exceeded its time budget
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// State merge failed
    #[error(transparent)]
    State(#[from] StateError),

    /// Checkpoint store failure
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// LLM transport failure (propagated from the model implementation)
    #[error("LLM error: {0}")]
    Llm(String),
}

impl GraphError {
    /// Short machine-readable kind tag, used by retry policies to decide
    /// whether an error class is retriable.
    pub fn kind(&self) -> &'static str {
        match self {
            GraphError::Validation(_) => "validation",
            GraphError::NodeExecution { .. } => "node_execution",
            GraphError::Execution(_) => "execution",
            GraphError::MaxIterations(_) => "max_iterations",
            GraphError::Cancelled => "cancelled",
            GraphError::Timeout(_) => "timeout",
            GraphError::State(_) => "state",
            GraphError::Checkpoint(_) => "checkpoint",
            GraphError::Llm(_) => "llm",
        }
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
