//! JSON-RPC 2.0 wire types and MCP result shapes
//!
//! Transport framing is newline-delimited JSON: one complete message per
//! line on the child process's stdin/stdout. Request ids are monotonically
//! increasing integers assigned per server.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol revision sent in the initialize handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Outgoing request frame
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// Error member of a response frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Incoming frame: a response when `id` is present, a notification
/// otherwise. Notifications without a subscriber are discarded.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcMessage {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcMessage {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Tool descriptor returned by `tools/list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON-schema input descriptor
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// One item of a `tools/call` result's content array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// `tools/call` result shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// The conventional payload: the first content item's text
    pub fn first_text(&self) -> Option<&str> {
        self.content.first().and_then(|item| item.text.as_deref())
    }
}
