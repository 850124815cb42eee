//! Child-process server lifecycle and request/response plumbing
//!
//! Each server runs as a child process speaking newline-delimited JSON-RPC
//! on its stdio. A single reader task per server demultiplexes responses to
//! per-request oneshot channels keyed by id; writes to the child's stdin are
//! serialized behind a mutex, so concurrent callers are safe.
//!
//! Shutdown closes the child's stdin (the stdio-transport equivalent of a
//! termination signal), waits up to [`SHUTDOWN_GRACE`], then force-kills.

use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcMessage, JsonRpcRequest, PROTOCOL_VERSION};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

/// Time allowed for the initialize handshake
pub const INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Grace period between stdin close and force-kill
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Command-line specification for one logical server
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub id: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

impl ServerSpec {
    pub fn new(id: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

type PendingMap = Arc<StdMutex<HashMap<i64, oneshot::Sender<JsonRpcMessage>>>>;
type NotificationSlot = Arc<StdMutex<Option<tokio::sync::mpsc::UnboundedSender<JsonRpcMessage>>>>;

/// A running server process with its transport state
#[derive(Debug)]
pub struct ServerHandle {
    spec: ServerSpec,
    child: Mutex<Child>,
    /// `None` once shutdown has closed the pipe
    stdin: Mutex<Option<ChildStdin>>,
    pending: PendingMap,
    next_id: AtomicI64,
    stderr_tail: Arc<StdMutex<Vec<String>>>,
    notifications: NotificationSlot,
}

impl ServerHandle {
    /// Launch the child process and complete the `initialize` handshake.
    ///
    /// Fails when the process cannot be spawned, exits before responding, or
    /// does not answer within [`INIT_TIMEOUT`]; the recorded stderr tail is
    /// included in the error.
    pub async fn start(spec: ServerSpec) -> Result<Self> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| McpError::StartFailed {
            server: spec.id.clone(),
            message: format!("spawn failed: {}", e),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::StartFailed {
            server: spec.id.clone(),
            message: "child stdin unavailable".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::StartFailed {
            server: spec.id.clone(),
            message: "child stdout unavailable".to_string(),
        })?;
        let stderr = child.stderr.take();

        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let stderr_tail = Arc::new(StdMutex::new(Vec::new()));
        let notifications: NotificationSlot = Arc::new(StdMutex::new(None));

        // Reader task: demultiplex responses by id. On EOF all pending
        // waiters are dropped, which surfaces as a transport error to every
        // in-flight request.
        {
            let pending = pending.clone();
            let notifications = notifications.clone();
            let server_id = spec.id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<JsonRpcMessage>(line) {
                                Ok(message) => match message.id {
                                    Some(id) => {
                                        let waiter = pending.lock().ok().and_then(|mut map| map.remove(&id));
                                        match waiter {
                                            Some(sender) => {
                                                let _ = sender.send(message);
                                            }
                                            None => warn!(server = %server_id, id, "Response with no waiter"),
                                        }
                                    }
                                    None => {
                                        let subscriber =
                                            notifications.lock().ok().and_then(|slot| slot.clone());
                                        match subscriber {
                                            Some(sender) => {
                                                let _ = sender.send(message);
                                            }
                                            None => debug!(server = %server_id, method = ?message.method, "Discarding notification"),
                                        }
                                    }
                                },
                                Err(e) => {
                                    warn!(server = %server_id, error = %e, "Unparsable line from server")
                                }
                            }
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
                if let Ok(mut map) = pending.lock() {
                    map.clear();
                }
                debug!(server = %server_id, "Reader task finished");
            });
        }

        // Stderr tail, kept for start-failure diagnostics
        if let Some(stderr) = stderr {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Ok(mut tail) = tail.lock() {
                        if tail.len() >= 50 {
                            tail.remove(0);
                        }
                        tail.push(line);
                    }
                }
            });
        }

        let handle = Self {
            spec,
            child: Mutex::new(child),
            stdin: Mutex::new(Some(stdin)),
            pending,
            next_id: AtomicI64::new(1),
            stderr_tail,
            notifications,
        };

        handle.initialize().await?;
        Ok(handle)
    }

    async fn initialize(&self) -> Result<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "clientInfo": {
                "name": "agentgraph-mcp",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        match self.request("initialize", Some(params), INIT_TIMEOUT).await {
            Ok(_) => {
                debug!(server = %self.spec.id, "Server initialized");
                Ok(())
            }
            Err(e) => {
                let exited = self.child.lock().await.try_wait().ok().flatten();
                let stderr = self
                    .stderr_tail
                    .lock()
                    .map(|tail| tail.join("\n"))
                    .unwrap_or_default();
                Err(McpError::StartFailed {
                    server: self.spec.id.clone(),
                    message: match exited {
                        Some(status) => format!("process exited ({}) before initialize; stderr: {}", status, stderr),
                        None => format!("initialize failed: {}; stderr: {}", e, stderr),
                    },
                })
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    /// Receive server-initiated notifications. Without a subscriber they are
    /// discarded.
    pub fn subscribe_notifications(&self) -> tokio::sync::mpsc::UnboundedReceiver<JsonRpcMessage> {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        if let Ok(mut slot) = self.notifications.lock() {
            *slot = Some(sender);
        }
        receiver
    }

    /// Whether the child process is still alive
    pub async fn is_running(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    /// Send a request and await its response under `timeout`.
    ///
    /// Returns the `result` member; a JSON-RPC `error` member becomes
    /// [`McpError::ToolCall`]-shaped transport errors at the manager layer.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let (sender, receiver) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| McpError::Transport("pending map poisoned".to_string()))?
            .insert(id, sender);

        // Serialized writes: one writer at a time on the child's stdin
        {
            let mut stdin = self.stdin.lock().await;
            let stdin = stdin
                .as_mut()
                .ok_or_else(|| McpError::ServerNotRunning(self.spec.id.clone()))?;
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await?;
        }

        let message = match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(message)) => message,
            Ok(Err(_)) => {
                return Err(McpError::Transport(format!(
                    "server '{}' closed before responding",
                    self.spec.id
                )))
            }
            Err(_) => {
                if let Ok(mut map) = self.pending.lock() {
                    map.remove(&id);
                }
                return Err(McpError::Timeout(timeout));
            }
        };

        if let Some(error) = message.error {
            return Err(McpError::ToolCall {
                tool: method.to_string(),
                server: self.spec.id.clone(),
                message: format!("{} (code {})", error.message, error.code),
            });
        }

        Ok(message.result.unwrap_or(Value::Null))
    }

    /// Close stdin, wait up to [`SHUTDOWN_GRACE`] for exit, then force-kill
    pub async fn stop(&self) -> Result<()> {
        self.stdin.lock().await.take();

        let mut child = self.child.lock().await;
        match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(server = %self.spec.id, %status, "Server exited");
                Ok(())
            }
            Ok(Err(e)) => Err(McpError::Io(e)),
            Err(_) => {
                warn!(server = %self.spec.id, "Server ignored shutdown; killing");
                child.start_kill().map_err(McpError::Io)?;
                let _ = child.wait().await;
                Ok(())
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// A shell loop that answers every request line with a result carrying a
    /// sequential id, which matches this client's id assignment.
    fn scripted_server(result_json: &str) -> ServerSpec {
        let script = format!(
            r#"i=0; while read line; do i=$((i+1)); printf '{{"jsonrpc":"2.0","id":%d,"result":{}}}\n' "$i"; done"#,
            result_json
        );
        ServerSpec::new("fake", "sh").with_args(["-c", script.as_str()])
    }

    #[tokio::test]
    async fn test_start_initialize_and_request() {
        let handle = ServerHandle::start(scripted_server("{\"ok\":true}"))
            .await
            .unwrap();
        assert!(handle.is_running().await);

        let result = handle
            .request("tools/list", None, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result["ok"], true);

        handle.stop().await.unwrap();
        assert!(!handle.is_running().await);
    }

    #[tokio::test]
    async fn test_start_fails_for_missing_program() {
        let spec = ServerSpec::new("ghost", "definitely-not-a-real-binary-12345");
        let err = ServerHandle::start(spec).await.unwrap_err();
        assert!(matches!(err, McpError::StartFailed { .. }));
    }

    #[tokio::test]
    async fn test_start_fails_when_process_exits_immediately() {
        let spec = ServerSpec::new("dying", "sh").with_args(["-c", "echo doomed >&2; exit 3"]);
        let err = ServerHandle::start(spec).await.unwrap_err();

        let message = err.to_string();
        assert!(message.contains("dying"));
        assert!(message.contains("doomed") || message.contains("exited"), "{}", message);
    }

    #[tokio::test]
    async fn test_request_timeout_when_server_is_silent() {
        // Swallows every line without answering; initialize must time out
        let spec = ServerSpec::new("mute", "sh").with_args(["-c", "while read line; do :; done"]);
        let err = ServerHandle::start(spec).await.unwrap_err();
        assert!(matches!(err, McpError::StartFailed { .. }));
    }
}
