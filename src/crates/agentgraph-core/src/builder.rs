//! Incremental graph builder
//!
//! [`StateGraph`] is the mutable construction surface: add nodes and edges,
//! register reducers for state keys, set the entry point, then freeze the
//! graph with [`StateGraph::compile`]. The compiled form is immutable.

use crate::compiler::{CompiledGraph, GraphCompiler};
use crate::error::{GraphError, Result};
use crate::graph::{Edge, Graph, NodeId, NodeKind, NodeSpec, RouterFn};
use crate::state::{Reducer, StateSchema};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Mutable graph under construction
pub struct StateGraph {
    graph: Graph,
    schema: StateSchema,
}

impl StateGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: Graph::new(name),
            schema: StateSchema::new(),
        }
    }

    /// Add a node from an async closure returning a state-update map
    pub fn add_node<F, Fut>(&mut self, name: impl Into<NodeId>, kind: NodeKind, f: F) -> &mut Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let name = name.into();
        self.add_node_spec(NodeSpec::from_update_fn(name, kind, f))
    }

    /// Add a fully specified node (update-or-command executor)
    pub fn add_node_spec(&mut self, spec: NodeSpec) -> &mut Self {
        self.graph.nodes.insert(spec.name.clone(), spec);
        self
    }

    /// Add a plain edge that always fires
    pub fn add_edge(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> &mut Self {
        self.graph
            .edges
            .entry(from.into())
            .or_default()
            .push(Edge::Direct(to.into()));
        self
    }

    /// Add a conditional edge routed by a pure function over state
    pub fn add_conditional_edge<F>(&mut self, from: impl Into<NodeId>, router: F) -> &mut Self
    where
        F: Fn(&Value) -> NodeId + Send + Sync + 'static,
    {
        let router: RouterFn = Arc::new(router);
        self.graph
            .edges
            .entry(from.into())
            .or_default()
            .push(Edge::Conditional { router });
        self
    }

    /// Designate the node execution starts from
    pub fn set_entry_point(&mut self, name: impl Into<NodeId>) -> &mut Self {
        self.graph.entry = Some(name.into());
        self
    }

    /// Register a reducer for a state key
    pub fn register_reducer(&mut self, key: impl Into<String>, reducer: Box<dyn Reducer>) -> &mut Self {
        self.schema.register(key, reducer);
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Compile with a default [`GraphCompiler`], turning report errors into
    /// a single [`GraphError::Validation`].
    pub fn compile(self) -> Result<CompiledGraph> {
        let result = GraphCompiler::default().compile(self);
        match result.graph {
            Some(compiled) => Ok(compiled),
            None => Err(GraphError::Validation(result.report.errors.join("; "))),
        }
    }

    pub(crate) fn into_parts(self) -> (Graph, StateSchema) {
        (self.graph, self.schema)
    }
}
