//! Wave-based graph executor
//!
//! Execution proceeds in waves. Each wave runs every node in the current
//! frontier concurrently (bounded by a semaphore), with every node observing
//! the state as of wave start. Buffered node outputs are merged at wave end
//! in lexicographic node-name order through the state manager, so fan-in
//! reducers like `append_list` see a deterministic order. The next frontier
//! is assembled from direct edges, conditional-edge routers (evaluated on
//! the merged state), and explicit `Command::goto` targets; `END` targets
//! are pruned and duplicates removed.
//!
//! Termination: empty frontier, or the wave bound is hit (an error). A
//! cancel signal discards the in-flight wave and restores the wave-start
//! checkpoint.

use crate::compiler::CompiledGraph;
use crate::error::{GraphError, Result};
use crate::graph::{Edge, NodeId, NodeOutput, END};
use crate::retry::{FailureAction, NodePolicy};
use crate::state_manager::StateManager;
use agentgraph_checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Executor tuning knobs
#[derive(Clone)]
pub struct ExecutorConfig {
    /// Maximum number of waves before execution fails
    pub max_iterations: usize,
    /// Concurrent node bound per wave; `None` means the frontier size
    pub max_parallel: Option<usize>,
    /// Per-node error handling
    pub node_policies: HashMap<NodeId, NodePolicy>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            max_parallel: None,
            node_policies: HashMap::new(),
        }
    }
}

impl ExecutorConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel);
        self
    }

    pub fn with_node_policy(mut self, node: impl Into<NodeId>, policy: NodePolicy) -> Self {
        self.node_policies.insert(node.into(), policy);
        self
    }
}

/// What a node contributed to its wave
enum WaveOutcome {
    Completed(NodeOutput),
    /// Failure policy said to drop the node: no merge, no successors
    Skipped,
}

/// Walks a compiled graph from its entry point
pub struct GraphExecutor {
    config: ExecutorConfig,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl Default for GraphExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default(), Arc::new(InMemoryCheckpointStore::new()))
    }
}

impl GraphExecutor {
    pub fn new(config: ExecutorConfig, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            config,
            checkpoints,
        }
    }

    /// Execute to completion, returning the final state
    pub async fn execute(&self, compiled: &CompiledGraph, initial_state: Value) -> Result<Value> {
        self.execute_from(compiled, initial_state, None, CancellationToken::new())
            .await
    }

    /// Execute with an explicit starting node and cancellation token.
    ///
    /// `start` defaults to the compiled entry point; it was validated at
    /// compile time, so an override only needs to name an existing node.
    pub async fn execute_from(
        &self,
        compiled: &CompiledGraph,
        initial_state: Value,
        start: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<Value> {
        let graph = &compiled.graph;
        let manager = StateManager::with_schema(compiled.schema.clone(), self.checkpoints.clone());

        let entry = match start {
            Some(name) => name.to_string(),
            None => graph
                .entry
                .clone()
                .ok_or_else(|| GraphError::Validation("graph has no entry point".to_string()))?,
        };
        if !graph.has_node(&entry) {
            return Err(GraphError::Validation(format!(
                "starting node '{}' does not exist",
                entry
            )));
        }

        let mut state = initial_state;
        let mut frontier: Vec<NodeId> = vec![entry];
        let mut wave = 0usize;

        while !frontier.is_empty() {
            if wave >= self.config.max_iterations {
                return Err(GraphError::MaxIterations(self.config.max_iterations));
            }
            wave += 1;
            debug!(wave, frontier = ?frontier, "Starting wave");

            let wave_checkpoint = self
                .checkpoints
                .save(&state, "wave_start", None, HashMap::new())
                .await?;

            let outcomes = match self.run_wave(compiled, &frontier, &state, &cancel).await {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    if matches!(e, GraphError::Cancelled) {
                        if let Some(snapshot) = self.checkpoints.load(&wave_checkpoint).await? {
                            state = snapshot;
                        }
                    }
                    return Err(e);
                }
            };

            // Deterministic merge order: lexicographic by node name
            let mut completed: Vec<(&NodeId, &NodeOutput)> = outcomes
                .iter()
                .filter_map(|(name, outcome)| match outcome {
                    WaveOutcome::Completed(output) => Some((name, output)),
                    WaveOutcome::Skipped => None,
                })
                .collect();
            completed.sort_by(|a, b| a.0.cmp(b.0));

            for (name, output) in &completed {
                let update = output.update();
                if !update.is_null() {
                    manager.merge(&mut state, update, Some(name.as_str()))?;
                }
            }

            frontier = self.next_frontier(graph, &completed, &state)?;
        }

        Ok(state)
    }

    async fn run_wave(
        &self,
        compiled: &CompiledGraph,
        frontier: &[NodeId],
        state: &Value,
        cancel: &CancellationToken,
    ) -> Result<Vec<(NodeId, WaveOutcome)>> {
        if cancel.is_cancelled() {
            return Err(GraphError::Cancelled);
        }

        let permits = self
            .config
            .max_parallel
            .unwrap_or(frontier.len())
            .max(1);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut join_set: JoinSet<(NodeId, Result<NodeOutput>)> = JoinSet::new();

        for name in frontier {
            let spec = compiled
                .graph
                .nodes
                .get(name)
                .ok_or_else(|| GraphError::Execution(format!("unknown node '{}' in frontier", name)))?;

            let executor = spec.executor.clone();
            let policy = self
                .config
                .node_policies
                .get(name)
                .cloned()
                .unwrap_or_default();
            let node_state = state.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let name = name.clone();

            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (name, Err(GraphError::Cancelled)),
                };

                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(GraphError::Cancelled),
                    result = run_with_policy(&executor, node_state, &policy) => result,
                };
                (name, result)
            });
        }

        let mut outcomes = Vec::with_capacity(frontier.len());
        while let Some(joined) = join_set.join_next().await {
            let (name, result) = joined
                .map_err(|e| GraphError::Execution(format!("node task panicked: {}", e)))?;

            match result {
                Ok(output) => outcomes.push((name, WaveOutcome::Completed(output))),
                Err(GraphError::Cancelled) => {
                    join_set.abort_all();
                    return Err(GraphError::Cancelled);
                }
                Err(e) => {
                    let policy = self.config.node_policies.get(&name).cloned().unwrap_or_default();
                    match &policy.on_failure {
                        FailureAction::Abort => {
                            join_set.abort_all();
                            return Err(GraphError::NodeExecution {
                                node: name,
                                message: e.to_string(),
                            });
                        }
                        FailureAction::Skip => {
                            warn!(node = %name, error = %e, "Node failed; skipping");
                            outcomes.push((name, WaveOutcome::Skipped));
                        }
                        FailureAction::Ignore => {
                            warn!(node = %name, error = %e, "Node failed; ignoring");
                            outcomes.push((
                                name,
                                WaveOutcome::Completed(NodeOutput::Update(Value::Null)),
                            ));
                        }
                        FailureAction::Fallback(handler) => {
                            warn!(node = %name, error = %e, "Node failed; using fallback");
                            let output = handler(state, &e);
                            outcomes.push((name, WaveOutcome::Completed(output)));
                        }
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(GraphError::Cancelled);
        }

        Ok(outcomes)
    }

    /// Assemble the next frontier from edges, routers, and commands
    fn next_frontier(
        &self,
        graph: &crate::graph::Graph,
        completed: &[(&NodeId, &NodeOutput)],
        state: &Value,
    ) -> Result<Vec<NodeId>> {
        let mut next: Vec<NodeId> = Vec::new();
        let mut push = |target: NodeId, next: &mut Vec<NodeId>| -> Result<()> {
            if target == END {
                return Ok(());
            }
            if !graph.has_node(&target) {
                return Err(GraphError::Execution(format!(
                    "routing target '{}' does not exist",
                    target
                )));
            }
            if !next.contains(&target) {
                next.push(target);
            }
            Ok(())
        };

        for (name, output) in completed {
            // A command with explicit routing overrides static edges
            if let NodeOutput::Command(command) = output {
                if command.has_routing() {
                    for target in &command.goto {
                        push(target.clone(), &mut next)?;
                    }
                    continue;
                }
            }

            if let Some(edges) = graph.edges.get(name.as_str()) {
                for edge in edges {
                    match edge {
                        Edge::Direct(to) => push(to.clone(), &mut next)?,
                        Edge::Conditional { router } => push(router(state), &mut next)?,
                    }
                }
            }
        }

        Ok(next)
    }
}

async fn run_with_policy(
    executor: &crate::graph::NodeExecutor,
    state: Value,
    policy: &NodePolicy,
) -> Result<NodeOutput> {
    if let Some(breaker) = &policy.circuit_breaker {
        if !breaker.allow() {
            return Err(GraphError::Execution("circuit breaker open".to_string()));
        }
    }

    let mut attempt = 0usize;
    loop {
        match executor(state.clone()).await {
            Ok(output) => {
                if let Some(breaker) = &policy.circuit_breaker {
                    breaker.record_success();
                }
                return Ok(output);
            }
            Err(e) => {
                if let Some(breaker) = &policy.circuit_breaker {
                    breaker.record_failure();
                }
                attempt += 1;
                let retry = match &policy.retry {
                    Some(retry) if retry.should_retry(attempt, &e) => retry,
                    _ => return Err(e),
                };
                let delay = retry.delay_for(attempt);
                debug!(attempt, ?delay, error = %e, "Retrying node");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
