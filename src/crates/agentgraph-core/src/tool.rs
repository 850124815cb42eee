//! Tool registry contract shared by agents and tool hosts
//!
//! The ReAct controller consumes tools through [`ToolRegistry`]; the MCP
//! host implements it over child-process servers, and tests implement it
//! with in-process closures.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Catalogue entry for one callable tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Fully-qualified name, unique across the registry
    pub name: String,
    pub description: String,
    /// JSON-schema object describing the accepted arguments
    pub parameters: Value,
}

impl ToolInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// One-line catalogue entry used in agent prompts:
    /// `name: description (参数: a, b)`
    pub fn prompt_line(&self) -> String {
        let required: Vec<&str> = self
            .parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        if required.is_empty() {
            format!("{}: {}", self.name, self.description)
        } else {
            format!("{}: {} (参数: {})", self.name, self.description, required.join(", "))
        }
    }
}

/// Outcome of one tool invocation. Exactly one of `value`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(tool_name: impl Into<String>, value: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            value: Some(value),
            error: None,
        }
    }

    pub fn err(tool_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            value: None,
            error: Some(error.into()),
        }
    }
}

/// A collection of callable tools
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    /// Catalogue of currently callable tools
    async fn list_tools(&self) -> Vec<ToolInfo>;

    /// Invoke a tool by its fully-qualified name
    async fn execute(&self, name: &str, arguments: Value) -> Result<Value>;
}
