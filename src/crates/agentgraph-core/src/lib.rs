//! # agentgraph-core
//!
//! Graph execution engine for agent workflows: a string-keyed graph model
//! with conditional routing and commands, reducer-based state management
//! with versioning and transactional checkpointed merges, a wave-parallel
//! executor with retry/circuit-breaker policies, and the LLM and tool
//! contracts the higher-level crates build on.
//!
//! Typical flow: build a [`StateGraph`], register reducers for fan-in state
//! keys, [`compile`](StateGraph::compile) it, and hand the result to a
//! [`GraphExecutor`]:
//!
//! ```rust
//! use agentgraph_core::{GraphExecutor, NodeKind, StateGraph, END};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = StateGraph::new("hello");
//! graph.add_node("greet", NodeKind::Custom, |_| async {
//!     Ok(json!({"greeting": "hi"}))
//! });
//! graph.add_edge("greet", END);
//! graph.set_entry_point("greet");
//!
//! let compiled = graph.compile()?;
//! let state = GraphExecutor::default().execute(&compiled, json!({})).await?;
//! assert_eq!(state["greeting"], "hi");
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod command;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod graph;
pub mod llm;
pub mod parallel;
pub mod retry;
pub mod state;
pub mod state_manager;
pub mod tool;

pub use builder::StateGraph;
pub use command::Command;
pub use compiler::{
    CompilationResult, CompiledGraph, GraphCompiler, OptimizationLevel, ValidationReport,
};
pub use error::{GraphError, Result};
pub use executor::{ExecutorConfig, GraphExecutor};
pub use graph::{NodeId, NodeKind, NodeOutput, NodeSpec, END, START};
pub use llm::{GenerateOptions, InterruptPredicate, LanguageModel, Message, MessageRole, TokenStream};
pub use parallel::{AggregationStrategy, ParallelNode, SubNode};
pub use retry::{CircuitBreaker, FailureAction, NodePolicy, RetryPolicy};
pub use state::{
    AppendListReducer, CounterReducer, LatestByTimestampReducer, MaxReducer, MergeMapReducer,
    MergeStrategy, MinReducer, OverwriteReducer, PriorityMapReducer, Reducer, StateError,
    StateSchema, StrategyReducer, UnionSetReducer,
};
pub use state_manager::{FieldChange, StateDiff, StateManager, StateVersion};
pub use tool::{ToolInfo, ToolRegistry, ToolResult};
