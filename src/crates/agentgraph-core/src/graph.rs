//! Core graph data structures
//!
//! A graph is a set of named nodes connected by direct and conditional edges,
//! with a designated entry point. Nodes and edges are keyed by name (plain
//! strings, not pointers) so the structure stays serialisable and cycle
//! detection is a plain DFS over adjacency lists.
//!
//! Nodes execute against the current state and return either a state-update
//! map or a [`Command`](crate::command::Command) naming explicit successors.

use crate::command::Command;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Node identifier, unique within a graph
pub type NodeId = String;

/// Sentinel name for the virtual entry edge source
pub const START: &str = "__start__";

/// Sentinel successor name that terminates a path
pub const END: &str = "__end__";

/// The role a node plays in the workflow.
///
/// Kinds are advisory: the executor treats all kinds uniformly, but the
/// compiler's allowed-cycle rules and introspection read them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Think,
    Act,
    Observe,
    Finalize,
    Router,
    Parallel,
    Agent,
    Custom,
}

/// What a node's execution produced
#[derive(Debug, Clone)]
pub enum NodeOutput {
    /// A state-update map merged through the state manager
    Update(Value),
    /// A state update plus explicit successor routing
    Command(Command),
}

impl NodeOutput {
    /// The state-update portion of this output
    pub fn update(&self) -> &Value {
        match self {
            NodeOutput::Update(update) => update,
            NodeOutput::Command(command) => &command.update,
        }
    }
}

/// Async node executor: current state in, output map or command out
pub type NodeExecutor = Arc<
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<NodeOutput>> + Send>> + Send + Sync,
>;

/// Router function for conditional edges.
///
/// Pure over state; returns the name of the next node or [`END`].
pub type RouterFn = Arc<dyn Fn(&Value) -> NodeId + Send + Sync>;

/// A node definition: unique name, kind, and executor
#[derive(Clone)]
pub struct NodeSpec {
    pub name: NodeId,
    pub kind: NodeKind,
    pub executor: NodeExecutor,
}

impl NodeSpec {
    /// Build a node from an async closure returning a [`NodeOutput`]
    pub fn new<F, Fut>(name: impl Into<NodeId>, kind: NodeKind, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<NodeOutput>> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind,
            executor: Arc::new(move |state| Box::pin(f(state))),
        }
    }

    /// Build a node whose closure returns a plain update map
    pub fn from_update_fn<F, Fut>(name: impl Into<NodeId>, kind: NodeKind, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let name = name.into();
        Self {
            name: name.clone(),
            kind,
            executor: Arc::new(move |state| {
                let fut = f(state);
                Box::pin(async move { fut.await.map(NodeOutput::Update) })
            }),
        }
    }
}

impl std::fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("executor", &"<function>")
            .finish()
    }
}

/// Transition between nodes
#[derive(Clone)]
pub enum Edge {
    /// Always fires when the source node ran
    Direct(NodeId),
    /// Fires toward whatever node name the router returns
    Conditional { router: RouterFn },
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct(to) => f.debug_tuple("Direct").field(to).finish(),
            Edge::Conditional { .. } => f
                .debug_struct("Conditional")
                .field("router", &"<function>")
                .finish(),
        }
    }
}

/// A named collection of nodes and edges with an entry point.
///
/// Built incrementally through [`StateGraph`](crate::builder::StateGraph),
/// then frozen by [`GraphCompiler::compile`](crate::compiler::GraphCompiler::compile).
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub name: String,
    pub nodes: HashMap<NodeId, NodeSpec>,
    pub edges: HashMap<NodeId, Vec<Edge>>,
    pub entry: Option<NodeId>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Direct-edge successors of a node (conditional edges excluded)
    pub fn direct_successors(&self, name: &str) -> Vec<&NodeId> {
        self.edges
            .get(name)
            .map(|edges| {
                edges
                    .iter()
                    .filter_map(|edge| match edge {
                        Edge::Direct(to) => Some(to),
                        Edge::Conditional { .. } => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the node has at least one conditional edge
    pub fn has_conditional_edge(&self, name: &str) -> bool {
        self.edges
            .get(name)
            .map(|edges| {
                edges
                    .iter()
                    .any(|edge| matches!(edge, Edge::Conditional { .. }))
            })
            .unwrap_or(false)
    }
}
