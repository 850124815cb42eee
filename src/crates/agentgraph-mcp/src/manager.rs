//! Tool manager: server lifecycle, catalogue, and call dispatch
//!
//! [`McpToolManager`] owns the running server handles, the enabled-server
//! visibility mask, and the tool catalogue. Tools are addressed by their
//! fully-qualified name `<server_id>_<tool_name>`; only tools from enabled,
//! running servers are listed or callable.

use crate::error::{McpError, Result};
use crate::protocol::{CallToolResult, ToolDescriptor};
use crate::registry::ServerRegistry;
use crate::server::ServerHandle;
use agentgraph_core::{GraphError, ToolInfo, ToolRegistry};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Default per-call timeout for `tools/call`
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for `tools/list` during catalogue refresh
const LIST_TIMEOUT: Duration = Duration::from_secs(10);

struct ServerState {
    handle: Arc<ServerHandle>,
    tools: Vec<ToolDescriptor>,
}

/// Multiplexes tool calls over a set of child-process servers
pub struct McpToolManager {
    registry: ServerRegistry,
    servers: RwLock<HashMap<String, ServerState>>,
    enabled: RwLock<HashSet<String>>,
    call_timeout: Duration,
}

impl McpToolManager {
    /// Manager over the stock registry, with only `csv` enabled initially
    pub fn new() -> Self {
        let mut manager = Self::with_registry(ServerRegistry::with_defaults());
        manager.call_timeout = DEFAULT_CALL_TIMEOUT;
        manager
    }

    pub fn with_registry(registry: ServerRegistry) -> Self {
        Self {
            registry,
            servers: RwLock::new(HashMap::new()),
            enabled: RwLock::new(HashSet::from(["csv".to_string()])),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Start every registered server, returning per-server success.
    /// A server that fails to start is recorded and skipped, not fatal.
    pub async fn start_all(&self) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for id in self.registry.ids() {
            let started = match self.start_server(&id).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(server = %id, error = %e, "Server failed to start");
                    false
                }
            };
            results.insert(id, started);
        }
        results
    }

    /// Launch one server and load its tool catalogue
    pub async fn start_server(&self, id: &str) -> Result<()> {
        let spec = self
            .registry
            .get(id)
            .ok_or_else(|| McpError::UnknownServer(id.to_string()))?
            .clone();

        if self.servers.read().await.contains_key(id) {
            return Ok(());
        }

        let handle = Arc::new(ServerHandle::start(spec).await?);
        let tools = self.fetch_tools(&handle).await.unwrap_or_else(|e| {
            warn!(server = %id, error = %e, "tools/list failed; server has no callable tools");
            Vec::new()
        });

        info!(server = %id, tools = tools.len(), "Server started");
        self.servers
            .write()
            .await
            .insert(id.to_string(), ServerState { handle, tools });
        Ok(())
    }

    async fn fetch_tools(&self, handle: &ServerHandle) -> Result<Vec<ToolDescriptor>> {
        let result = handle.request("tools/list", None, LIST_TIMEOUT).await?;
        let tools = result.get("tools").cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(tools).unwrap_or_default())
    }

    /// Stop every running server
    pub async fn stop_all(&self) {
        let mut servers = self.servers.write().await;
        for (id, state) in servers.drain() {
            if let Err(e) = state.handle.stop().await {
                warn!(server = %id, error = %e, "Error stopping server");
            }
        }
    }

    /// Replace the enabled-server visibility mask
    pub async fn set_enabled_servers<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut enabled = self.enabled.write().await;
        *enabled = ids.into_iter().map(Into::into).collect();
        info!(enabled = ?enabled, "Enabled servers updated");
    }

    pub async fn enabled_servers(&self) -> HashSet<String> {
        self.enabled.read().await.clone()
    }

    /// Catalogue of tools from enabled, running servers, fully qualified
    pub async fn list_tools(&self) -> Vec<ToolInfo> {
        let enabled = self.enabled.read().await.clone();
        let servers = self.servers.read().await;

        let mut infos = Vec::new();
        let mut ids: Vec<&String> = servers.keys().filter(|id| enabled.contains(*id)).collect();
        ids.sort();

        for id in ids {
            let state = &servers[id];
            if !state.handle.is_running().await {
                continue;
            }
            for tool in &state.tools {
                infos.push(ToolInfo::new(
                    format!("{}_{}", id, tool.name),
                    format!("[{}] {}", id, tool.description),
                    tool.input_schema.clone(),
                ));
            }
        }
        infos
    }

    /// Render the catalogue as prompt lines for an agent's system prompt
    pub async fn tools_prompt(&self) -> String {
        self.list_tools()
            .await
            .iter()
            .map(|info| format!("- {}", info.prompt_line()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Call a tool by fully-qualified name with the default timeout
    pub async fn call_tool(&self, fq_name: &str, arguments: Value) -> Result<Value> {
        self.call_tool_with_timeout(fq_name, arguments, self.call_timeout)
            .await
    }

    /// Call a tool by fully-qualified name under an explicit timeout.
    ///
    /// Rejects tools whose server is not enabled or not running. On success
    /// the conventional `content[0].text` payload is returned when present,
    /// the raw result otherwise.
    pub async fn call_tool_with_timeout(
        &self,
        fq_name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let (server_id, tool_name) = self
            .registry
            .resolve_tool(fq_name)
            .ok_or_else(|| McpError::ToolNotEnabled(fq_name.to_string()))?;

        if !self.enabled.read().await.contains(&server_id) {
            return Err(McpError::ToolNotEnabled(fq_name.to_string()));
        }

        let handle = {
            let servers = self.servers.read().await;
            servers
                .get(&server_id)
                .map(|state| state.handle.clone())
                .ok_or_else(|| McpError::ServerNotRunning(server_id.clone()))?
        };
        if !handle.is_running().await {
            return Err(McpError::ServerNotRunning(server_id.clone()));
        }

        let params = json!({"name": tool_name, "arguments": arguments});
        let result = handle
            .request("tools/call", Some(params), timeout)
            .await
            .map_err(|e| match e {
                McpError::Timeout(t) => McpError::Timeout(t),
                other => McpError::ToolCall {
                    tool: tool_name.to_string(),
                    server: server_id.clone(),
                    message: other.to_string(),
                },
            })?;

        let call_result: CallToolResult = serde_json::from_value(result.clone())
            .unwrap_or(CallToolResult {
                content: Vec::new(),
                is_error: false,
            });

        if call_result.is_error {
            let message = call_result
                .first_text()
                .unwrap_or("tool reported an error")
                .to_string();
            return Err(McpError::ToolCall {
                tool: tool_name.to_string(),
                server: server_id,
                message,
            });
        }

        match call_result.first_text() {
            Some(text) => Ok(Value::String(text.to_string())),
            None => Ok(result),
        }
    }
}

impl Default for McpToolManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolRegistry for McpToolManager {
    async fn list_tools(&self) -> Vec<ToolInfo> {
        McpToolManager::list_tools(self).await
    }

    async fn execute(&self, name: &str, arguments: Value) -> agentgraph_core::Result<Value> {
        self.call_tool(name, arguments)
            .await
            .map_err(|e| GraphError::Execution(e.to_string()))
    }
}
