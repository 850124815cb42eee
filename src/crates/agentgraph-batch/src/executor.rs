//! Single-task executor abstraction
//!
//! The batch processor delegates each rendered row prompt to an injected
//! [`TaskExecutor`]: the ReAct controller in production, an echo mock in
//! tests and dry runs.

use crate::table::Row;
use agentgraph_prebuilt::ReactAgent;
use async_trait::async_trait;
use std::sync::Arc;

/// Executes one row task; errors are plain strings so a failure in one row
/// never carries non-serialisable state into the event stream
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        prompt: &str,
        row: &Row,
        row_index: usize,
    ) -> std::result::Result<String, String>;
}

/// Echoes the rendered prompt back; used by tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct EchoTaskExecutor;

#[async_trait]
impl TaskExecutor for EchoTaskExecutor {
    async fn execute(
        &self,
        prompt: &str,
        _row: &Row,
        _row_index: usize,
    ) -> std::result::Result<String, String> {
        Ok(prompt.to_string())
    }
}

/// Runs each row task through a ReAct controller
pub struct ReactTaskExecutor {
    agent: Arc<ReactAgent>,
}

impl ReactTaskExecutor {
    pub fn new(agent: Arc<ReactAgent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl TaskExecutor for ReactTaskExecutor {
    async fn execute(
        &self,
        prompt: &str,
        _row: &Row,
        _row_index: usize,
    ) -> std::result::Result<String, String> {
        let result = self.agent.run(prompt).await.map_err(|e| e.to_string())?;
        if result.success {
            Ok(result.result)
        } else {
            Err(result.result)
        }
    }
}
