//! Error types for the MCP tool host

use thiserror::Error;

/// Errors from server lifecycle, transport, and tool calls
#[derive(Debug, Error)]
pub enum McpError {
    /// Server id is not present in the registry
    #[error("Unknown server: {0}")]
    UnknownServer(String),

    /// Server process could not be launched or failed its handshake
    #[error("Server '{server}' failed to start: {message}")]
    StartFailed { server: String, message: String },

    /// Server is registered but not currently running
    #[error("Server '{0}' is not running")]
    ServerNotRunning(String),

    /// Tool is unknown, or its server is not enabled
    #[error("Tool not enabled: {0}")]
    ToolNotEnabled(String),

    /// The server returned a JSON-RPC error for a tool call
    #[error("Tool '{tool}' on server '{server}' failed: {message}")]
    ToolCall {
        tool: String,
        server: String,
        message: String,
    },

    /// No response arrived within the call timeout
    #[error("Timed out after {0:?} waiting for server response")]
    Timeout(std::time::Duration),

    /// Child stdio write/read failure or malformed wire data
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, McpError>;
