//! Parallel fan-out node
//!
//! A [`ParallelNode`] is a single graph node that fans out to K sub-nodes
//! and folds their updates into one output according to an aggregation
//! strategy. Sub-node updates are folded through a [`StateSchema`] so fan-in
//! keys with list or counter reducers accumulate instead of overwriting.
//!
//! Strategies:
//! - `all`: wait for every sub-node
//! - `first`: first completion wins; pending siblings are cancelled
//! - `majority`: cancel once ceil(K/2)+1 sub-nodes have completed
//! - `custom`: caller-provided fold over all sub-results

use crate::error::{GraphError, Result};
use crate::graph::{NodeKind, NodeOutput, NodeSpec};
use crate::state::StateSchema;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::warn;

/// Result of one sub-node execution
#[derive(Debug, Clone)]
pub struct SubResult {
    pub name: String,
    pub output: std::result::Result<Value, String>,
    pub elapsed: Duration,
}

/// Custom aggregation: fold all sub-results into one update map
pub type AggregateFn = Arc<dyn Fn(&[SubResult]) -> Result<Value> + Send + Sync>;

/// How sub-node outputs are combined
#[derive(Clone)]
pub enum AggregationStrategy {
    All,
    First,
    Majority,
    Custom(AggregateFn),
}

impl std::fmt::Debug for AggregationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationStrategy::All => write!(f, "All"),
            AggregationStrategy::First => write!(f, "First"),
            AggregationStrategy::Majority => write!(f, "Majority"),
            AggregationStrategy::Custom(_) => write!(f, "Custom(<function>)"),
        }
    }
}

/// Async sub-node executor
pub type SubNodeFn =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// A named sub-node inside a parallel fan-out
#[derive(Clone)]
pub struct SubNode {
    pub name: String,
    pub executor: SubNodeFn,
}

impl SubNode {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            executor: Arc::new(move |state| Box::pin(f(state))),
        }
    }
}

/// A node that runs K sub-nodes concurrently and folds their updates
#[derive(Clone)]
pub struct ParallelNode {
    name: String,
    sub_nodes: Vec<SubNode>,
    aggregation: AggregationStrategy,
    /// Per-sub-node timeout; `None` means unbounded
    timeout: Option<Duration>,
    /// Schema used to fold sub-node updates key by key
    schema: StateSchema,
}

impl ParallelNode {
    pub fn new(name: impl Into<String>, sub_nodes: Vec<SubNode>) -> Self {
        Self {
            name: name.into(),
            sub_nodes,
            aggregation: AggregationStrategy::All,
            timeout: None,
            schema: StateSchema::new(),
        }
    }

    pub fn with_aggregation(mut self, aggregation: AggregationStrategy) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fold sub-node updates through these reducers
    pub fn with_schema(mut self, schema: StateSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Convert into a [`NodeSpec`] usable in a graph
    pub fn into_spec(self) -> NodeSpec {
        let name = self.name.clone();
        let node = Arc::new(self);
        NodeSpec::new(name, NodeKind::Parallel, move |state| {
            let node = node.clone();
            async move { node.execute(state).await.map(NodeOutput::Update) }
        })
    }

    /// Run the fan-out and fold results into a single update map
    pub async fn execute(&self, state: Value) -> Result<Value> {
        if self.sub_nodes.is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }

        let total = self.sub_nodes.len();
        let mut join_set: JoinSet<SubResult> = JoinSet::new();

        for sub in &self.sub_nodes {
            let executor = sub.executor.clone();
            let name = sub.name.clone();
            let sub_state = state.clone();
            let timeout = self.timeout;

            join_set.spawn(async move {
                let started = std::time::Instant::now();
                let output = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, executor(sub_state)).await {
                        Ok(result) => result.map_err(|e| e.to_string()),
                        Err(_) => Err(format!("timed out after {:?}", limit)),
                    },
                    None => executor(sub_state).await.map_err(|e| e.to_string()),
                };
                SubResult {
                    name,
                    output,
                    elapsed: started.elapsed(),
                }
            });
        }

        let needed = match &self.aggregation {
            AggregationStrategy::First => 1,
            AggregationStrategy::Majority => (total.div_ceil(2) + 1).min(total),
            AggregationStrategy::All | AggregationStrategy::Custom(_) => total,
        };

        let mut results: Vec<SubResult> = Vec::with_capacity(total);
        while let Some(joined) = join_set.join_next().await {
            let result = joined
                .map_err(|e| GraphError::Execution(format!("sub-node task panicked: {}", e)))?;
            results.push(result);

            let completed_enough = match &self.aggregation {
                // `first` only counts successful completions
                AggregationStrategy::First => results.iter().any(|r| r.output.is_ok()),
                _ => results.len() >= needed,
            };
            if completed_enough && results.len() < total {
                join_set.abort_all();
                break;
            }
        }

        self.fold(&results)
    }

    fn fold(&self, results: &[SubResult]) -> Result<Value> {
        if let AggregationStrategy::Custom(aggregate) = &self.aggregation {
            return aggregate(results);
        }

        for result in results {
            if let Err(error) = &result.output {
                warn!(parallel = %self.name, sub_node = %result.name, error, "Sub-node failed");
            }
        }

        let successes: Vec<&SubResult> = match &self.aggregation {
            AggregationStrategy::First => results
                .iter()
                .filter(|r| r.output.is_ok())
                .take(1)
                .collect(),
            _ => results.iter().filter(|r| r.output.is_ok()).collect(),
        };

        if successes.is_empty() {
            return Err(GraphError::Execution(format!(
                "all {} sub-nodes of '{}' failed",
                results.len(),
                self.name
            )));
        }

        // Deterministic fold order by sub-node name
        let mut ordered = successes;
        ordered.sort_by(|a, b| a.name.cmp(&b.name));

        let mut folded = serde_json::Map::new();
        for result in ordered {
            let update = match &result.output {
                Ok(Value::Object(map)) => map,
                Ok(other) => {
                    return Err(GraphError::Execution(format!(
                        "sub-node '{}' returned a non-object update: {}",
                        result.name, other
                    )))
                }
                Err(_) => continue,
            };
            for (key, incoming) in update {
                let existing = folded.get(key).cloned().unwrap_or(Value::Null);
                let merged = self.schema.merge_key(key, &existing, incoming)?;
                folded.insert(key.clone(), merged);
            }
        }

        Ok(Value::Object(folded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppendListReducer;
    use serde_json::json;

    fn hit_sub(name: &str, value: &str) -> SubNode {
        let value = value.to_string();
        SubNode::new(name, move |_| {
            let value = value.clone();
            async move { Ok(json!({"hits": [value]})) }
        })
    }

    #[tokio::test]
    async fn test_all_aggregation_folds_through_reducers() {
        let mut schema = StateSchema::new();
        schema.register("hits", Box::new(AppendListReducer));

        let node = ParallelNode::new(
            "search",
            vec![hit_sub("s1", "a"), hit_sub("s2", "b"), hit_sub("s3", "c")],
        )
        .with_schema(schema);

        let update = node.execute(json!({"q": "x"})).await.unwrap();
        let hits = update["hits"].as_array().unwrap();
        assert_eq!(hits.len(), 3);
        for value in ["a", "b", "c"] {
            assert!(hits.contains(&json!(value)));
        }
    }

    #[tokio::test]
    async fn test_first_returns_single_winner() {
        let fast = SubNode::new("fast", |_| async { Ok(json!({"winner": "fast"})) });
        let slow = SubNode::new("slow", |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({"winner": "slow"}))
        });

        let node = ParallelNode::new("race", vec![slow, fast])
            .with_aggregation(AggregationStrategy::First);

        let started = std::time::Instant::now();
        let update = node.execute(json!({})).await.unwrap();
        assert_eq!(update["winner"], "fast");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_sub_node_timeout_is_an_error_entry() {
        let hang = SubNode::new("hang", |_| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(json!({"hung": true}))
        });
        let quick = SubNode::new("quick", |_| async { Ok(json!({"quick": true})) });

        let node = ParallelNode::new("bounded", vec![hang, quick])
            .with_timeout(Duration::from_millis(50));

        let update = node.execute(json!({})).await.unwrap();
        assert_eq!(update["quick"], true);
        assert!(update.get("hung").is_none());
    }

    #[tokio::test]
    async fn test_all_failed_is_an_error() {
        let boom = SubNode::new("boom", |_| async {
            Err(GraphError::Execution("nope".to_string()))
        });

        let node = ParallelNode::new("doomed", vec![boom]);
        assert!(node.execute(json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_custom_aggregation() {
        let node = ParallelNode::new(
            "counted",
            vec![hit_sub("s1", "a"), hit_sub("s2", "b")],
        )
        .with_aggregation(AggregationStrategy::Custom(Arc::new(|results| {
            Ok(json!({"completed": results.len()}))
        })));

        let update = node.execute(json!({})).await.unwrap();
        assert_eq!(update["completed"], 2);
    }
}
