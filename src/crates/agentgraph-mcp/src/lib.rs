//! # agentgraph-mcp
//!
//! MCP tool host for agentgraph: launches tool servers as child processes,
//! speaks newline-delimited JSON-RPC 2.0 over their stdio, and exposes the
//! combined catalogue through the core
//! [`ToolRegistry`](agentgraph_core::ToolRegistry) trait.
//!
//! Tools are addressed as `<server_id>_<tool_name>`. A visibility mask
//! selects which logical servers are active; calls to tools of disabled or
//! stopped servers fail fast.

pub mod error;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod server;

pub use error::{McpError, Result};
pub use manager::{McpToolManager, DEFAULT_CALL_TIMEOUT};
pub use protocol::{CallToolResult, ContentItem, JsonRpcError, JsonRpcMessage, JsonRpcRequest, ToolDescriptor};
pub use registry::ServerRegistry;
pub use server::{ServerHandle, ServerSpec, INIT_TIMEOUT, SHUTDOWN_GRACE};
