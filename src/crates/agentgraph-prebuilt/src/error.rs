//! Error types for the prebuilt agents

use agentgraph_core::GraphError;
use thiserror::Error;

/// Errors from the ReAct controllers
#[derive(Debug, Error)]
pub enum ReactError {
    /// LLM transport failure; fatal unless the caller wraps with a retry
    #[error("LLM call failed: {0}")]
    Llm(String),

    /// Streaming interrupt recursion exceeded its depth cap
    #[error("Streaming interrupt recursion exceeded depth {0}")]
    MaxDepth(usize),

    /// Underlying graph/tool machinery failure
    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub type Result<T> = std::result::Result<T, ReactError>;
