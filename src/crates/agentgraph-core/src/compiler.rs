//! Graph validation, optimisation, and compilation
//!
//! [`GraphCompiler::compile`] freezes a built graph into an immutable
//! [`CompiledGraph`] after validating its topology. Validation produces a
//! [`ValidationReport`] of errors, warnings, and suggestions; when any error
//! is present the compiled graph is absent from the result.
//!
//! Cycle policy: cycles over direct edges are rejected unless they match a
//! bounded ReAct-like shape: a cycle wholly inside `{think, act, observe}`
//! or `{agent, tools}`, or one passing through a node named `finalize`, or
//! one that includes a conditional edge (whose targets are only known at
//! runtime). Accepted cycles outside the first two shapes are logged, since
//! only the executor's wave bound proves their termination.

use crate::builder::StateGraph;
use crate::graph::{Edge, Graph, NodeId, END};
use crate::state::StateSchema;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// How aggressively the compiler rewrites the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationLevel {
    None,
    #[default]
    Basic,
    Aggressive,
}

/// Outcome of graph validation
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// What the optimisation pass changed
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizationReport {
    pub removed_duplicate_edges: usize,
    pub notes: Vec<String>,
}

/// An immutable, validated graph ready for execution
#[derive(Clone)]
pub struct CompiledGraph {
    pub graph: Arc<Graph>,
    pub schema: StateSchema,
    /// Structure hash used as the compile-cache key
    pub structure_hash: String,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("name", &self.graph.name)
            .field("nodes", &self.graph.nodes.len())
            .field("structure_hash", &self.structure_hash)
            .finish()
    }
}

/// Result of a compile call
#[derive(Debug)]
pub struct CompilationResult {
    pub report: ValidationReport,
    /// Present only when the report has no errors
    pub graph: Option<CompiledGraph>,
    pub cache_hit: bool,
    pub optimization: OptimizationReport,
}

#[derive(Default)]
struct CacheState {
    /// structure hash -> validation report from the first compile
    reports: HashMap<String, ValidationReport>,
    hits: usize,
}

/// Validates and freezes graphs, caching validation by structure hash
pub struct GraphCompiler {
    level: OptimizationLevel,
    cache: Mutex<CacheState>,
}

impl Default for GraphCompiler {
    fn default() -> Self {
        Self::new(OptimizationLevel::Basic)
    }
}

impl GraphCompiler {
    pub fn new(level: OptimizationLevel) -> Self {
        Self {
            level,
            cache: Mutex::new(CacheState::default()),
        }
    }

    /// Validate, optimise, and freeze a graph
    pub fn compile(&self, state_graph: StateGraph) -> CompilationResult {
        let (mut graph, schema) = state_graph.into_parts();
        let structure_hash = structure_hash(&graph);

        let (report, cache_hit) = {
            let mut cache = self.cache.lock();
            if let Some(report) = cache.reports.get(&structure_hash).cloned() {
                cache.hits += 1;
                debug!(hash = %structure_hash, "Compile cache hit");
                (report, true)
            } else {
                let report = validate(&graph);
                cache.reports.insert(structure_hash.clone(), report.clone());
                (report, false)
            }
        };

        if !report.is_valid() {
            return CompilationResult {
                report,
                graph: None,
                cache_hit,
                optimization: OptimizationReport::default(),
            };
        }

        let optimization = optimize(&mut graph, self.level);

        CompilationResult {
            report,
            graph: Some(CompiledGraph {
                graph: Arc::new(graph),
                schema,
                structure_hash,
            }),
            cache_hit,
            optimization,
        }
    }

    /// (cached entries, hits) since construction
    pub fn cache_stats(&self) -> (usize, usize) {
        let cache = self.cache.lock();
        (cache.reports.len(), cache.hits)
    }

    pub fn clear_cache(&self) {
        let mut cache = self.cache.lock();
        cache.reports.clear();
        cache.hits = 0;
    }
}

/// Hash of the graph's observable structure: name, node set, edge set, entry
fn structure_hash(graph: &Graph) -> String {
    let mut hasher = Sha256::new();
    hasher.update(graph.name.as_bytes());
    hasher.update(b"\x1f");

    let mut node_names: Vec<&String> = graph.nodes.keys().collect();
    node_names.sort();
    for name in node_names {
        hasher.update(name.as_bytes());
        hasher.update(b"\x1e");
    }

    let mut edge_lines: Vec<String> = Vec::new();
    for (from, edges) in &graph.edges {
        for edge in edges {
            match edge {
                Edge::Direct(to) => edge_lines.push(format!("{}->{}", from, to)),
                Edge::Conditional { .. } => edge_lines.push(format!("{}->?", from)),
            }
        }
    }
    edge_lines.sort();
    for line in edge_lines {
        hasher.update(line.as_bytes());
        hasher.update(b"\x1e");
    }

    if let Some(entry) = &graph.entry {
        hasher.update(entry.as_bytes());
    }

    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn validate(graph: &Graph) -> ValidationReport {
    let mut report = ValidationReport::default();

    if graph.nodes.is_empty() {
        report.errors.push("graph has no nodes".to_string());
    }

    match &graph.entry {
        None => report.errors.push("graph has no entry point".to_string()),
        Some(entry) if !graph.has_node(entry) => {
            report
                .errors
                .push(format!("entry point '{}' is not a node", entry));
        }
        Some(_) => {}
    }

    for (from, edges) in &graph.edges {
        if !graph.has_node(from) && from != crate::graph::START {
            report
                .errors
                .push(format!("edge source '{}' is not a node", from));
        }
        for edge in edges {
            if let Edge::Direct(to) = edge {
                if !graph.has_node(to) && to != END {
                    report
                        .errors
                        .push(format!("edge target '{}' is not a node", to));
                }
            }
        }
    }

    // Remaining checks only make sense on a structurally sound graph
    if !report.errors.is_empty() {
        return report;
    }

    for cycle in find_cycles(graph) {
        match classify_cycle(graph, &cycle) {
            CycleVerdict::ReactLike => {}
            CycleVerdict::Accepted(reason) => {
                warn!(cycle = ?cycle, reason, "Accepted non-ReAct cycle; termination relies on the wave bound");
                report.suggestions.push(format!(
                    "cycle {} accepted ({}); bounded only by max_iterations",
                    cycle.join(" -> "),
                    reason
                ));
            }
            CycleVerdict::Rejected => {
                report
                    .errors
                    .push(format!("cycle detected: {}", cycle.join(" -> ")));
            }
        }
    }

    for deadlock in find_mutual_dependencies(graph) {
        report.errors.push(format!("deadlock detected: {}", deadlock));
    }

    for node in find_disconnected_nodes(graph) {
        report
            .warnings
            .push(format!("node '{}' is not reachable from the entry point", node));
    }

    if graph.nodes.len() > 25 {
        report
            .suggestions
            .push(format!("graph has {} nodes; consider splitting", graph.nodes.len()));
    }

    report
}

enum CycleVerdict {
    /// One of the recognised bounded-loop shapes
    ReactLike,
    /// Allowed, but only the runtime wave bound proves termination
    Accepted(&'static str),
    Rejected,
}

fn classify_cycle(graph: &Graph, cycle: &[NodeId]) -> CycleVerdict {
    let set: BTreeSet<&str> = cycle.iter().map(String::as_str).collect();

    let react: BTreeSet<&str> = ["think", "act", "observe"].into_iter().collect();
    let agent_tools: BTreeSet<&str> = ["agent", "tools"].into_iter().collect();

    if set.is_subset(&react) || set.is_subset(&agent_tools) {
        return CycleVerdict::ReactLike;
    }

    if set.contains("finalize") {
        return CycleVerdict::Accepted("passes through finalize");
    }

    if cycle.iter().any(|node| graph.has_conditional_edge(node)) {
        return CycleVerdict::Accepted("contains a conditional edge");
    }

    CycleVerdict::Rejected
}

/// Find cycles over direct edges via DFS with an explicit path stack.
/// Conditional edges have statically unknown targets and are not traversed.
fn find_cycles(graph: &Graph) -> Vec<Vec<NodeId>> {
    let mut cycles: Vec<Vec<NodeId>> = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();

    let mut roots: Vec<&String> = graph.nodes.keys().collect();
    roots.sort();

    for root in roots {
        if visited.contains(root.as_str()) {
            continue;
        }

        let mut path: Vec<&str> = Vec::new();
        let mut on_path: HashSet<&str> = HashSet::new();
        let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];

        while let Some((node, next_child)) = stack.pop() {
            if next_child == 0 {
                path.push(node);
                on_path.insert(node);
            }

            let successors = graph.direct_successors(node);
            if let Some(succ) = successors.get(next_child) {
                stack.push((node, next_child + 1));
                let succ = succ.as_str();
                if succ == END {
                    continue;
                }
                if on_path.contains(succ) {
                    let start = path.iter().position(|n| *n == succ).unwrap_or(0);
                    let cycle: Vec<NodeId> = path[start..].iter().map(|n| n.to_string()).collect();
                    if !cycles.iter().any(|c| same_cycle(c, &cycle)) {
                        cycles.push(cycle);
                    }
                } else if !visited.contains(succ) {
                    stack.push((succ, 0));
                }
            } else {
                path.pop();
                on_path.remove(node);
                visited.insert(node);
            }
        }
    }

    cycles
}

fn same_cycle(a: &[NodeId], b: &[NodeId]) -> bool {
    a.len() == b.len() && a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>()
}

/// Pairs of nodes that point directly at each other without any router in
/// between; with plain edges both always fire, which livelocks the wave loop.
fn find_mutual_dependencies(graph: &Graph) -> Vec<String> {
    let mut found = Vec::new();
    let mut names: Vec<&str> = graph.nodes.keys().map(String::as_str).collect();
    names.sort_unstable();

    for a in names {
        for b in graph.direct_successors(a) {
            let b = b.as_str();
            if b <= a {
                continue;
            }
            let returns = graph.direct_successors(b).iter().any(|n| n.as_str() == a);
            let routed = graph.has_conditional_edge(a) || graph.has_conditional_edge(b);
            let allowed_pair = a == "finalize"
                || b == "finalize"
                || matches!(
                    (a, b),
                    ("act", "think") | ("think", "act") | ("agent", "tools") | ("tools", "agent")
                );
            if returns && !routed && !allowed_pair {
                found.push(format!("{} <-> {}", a, b));
            }
        }
    }

    found
}

/// Nodes not connected to the entry point even ignoring edge direction.
/// Backward connectivity counts so that cycle members feeding the entry's
/// component are not flagged.
fn find_disconnected_nodes(graph: &Graph) -> Vec<NodeId> {
    let entry = match &graph.entry {
        Some(entry) => entry.clone(),
        None => return Vec::new(),
    };

    // Undirected adjacency over direct edges; conditional edges connect the
    // source to every node (targets unknown until runtime).
    let mut adjacency: HashMap<&str, HashSet<&str>> = HashMap::new();
    let mut conditional_sources = Vec::new();
    for (from, edges) in &graph.edges {
        for edge in edges {
            match edge {
                Edge::Direct(to) if to != END => {
                    adjacency.entry(from.as_str()).or_default().insert(to.as_str());
                    adjacency.entry(to.as_str()).or_default().insert(from.as_str());
                }
                Edge::Direct(_) => {}
                Edge::Conditional { .. } => conditional_sources.push(from.as_str()),
            }
        }
    }

    let mut reachable: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(entry.as_str());

    while let Some(node) = queue.pop_front() {
        if !reachable.insert(node) {
            continue;
        }
        if let Some(neighbors) = adjacency.get(node) {
            for neighbor in neighbors {
                if !reachable.contains(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        // A reachable conditional source may route anywhere
        if conditional_sources.contains(&node) {
            for name in graph.nodes.keys() {
                if !reachable.contains(name.as_str()) {
                    queue.push_back(name.as_str());
                }
            }
        }
    }

    let mut disconnected: Vec<NodeId> = graph
        .nodes
        .keys()
        .filter(|name| !reachable.contains(name.as_str()))
        .cloned()
        .collect();
    disconnected.sort();
    disconnected
}

fn optimize(graph: &mut Graph, level: OptimizationLevel) -> OptimizationReport {
    let mut report = OptimizationReport::default();
    if level == OptimizationLevel::None {
        return report;
    }

    // Basic: drop duplicate direct edges
    for edges in graph.edges.values_mut() {
        let mut seen: HashSet<NodeId> = HashSet::new();
        let before = edges.len();
        edges.retain(|edge| match edge {
            Edge::Direct(to) => seen.insert(to.clone()),
            Edge::Conditional { .. } => true,
        });
        report.removed_duplicate_edges += before - edges.len();
    }

    if level == OptimizationLevel::Aggressive {
        // Canonical edge order so wave frontiers are assembled identically
        // across compiles; observable output is unaffected since merges are
        // already ordered by node name.
        for edges in graph.edges.values_mut() {
            edges.sort_by_key(|edge| match edge {
                Edge::Direct(to) => (0, to.clone()),
                Edge::Conditional { .. } => (1, String::new()),
            });
        }
        report.notes.push("edge lists canonicalised".to_string());
    }

    report
}
