//! Static server registry
//!
//! Maps logical server ids to the command lines that launch them. The
//! default registry mirrors the stock data-tool servers; embedders extend or
//! replace it before starting the manager.

use crate::server::ServerSpec;
use std::collections::HashMap;

/// Ordered registry of launchable servers
#[derive(Debug, Clone, Default)]
pub struct ServerRegistry {
    specs: HashMap<String, ServerSpec>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock registry: CSV tooling, vector store, a Python executor, and
    /// the role-information server, each launched as a Python module.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            ServerSpec::new("csv", "python").with_args(["-m", "mcp_servers.csv_crud_server"]),
        );
        registry.register(
            ServerSpec::new("chromadb", "python")
                .with_args(["-m", "mcp_servers.chromadb_crud_server"]),
        );
        registry.register(
            ServerSpec::new("python", "python")
                .with_args(["-m", "mcp_servers.python_executor_server"]),
        );
        registry.register(
            ServerSpec::new("role_info", "python")
                .with_args(["-m", "mcp_servers.role_info_crud_server"]),
        );
        registry
    }

    pub fn register(&mut self, spec: ServerSpec) {
        self.specs.insert(spec.id.clone(), spec);
    }

    pub fn get(&self, id: &str) -> Option<&ServerSpec> {
        self.specs.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.specs.contains_key(id)
    }

    /// Registered ids, sorted for deterministic start order
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.specs.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Longest registered id that prefixes `fq_name` followed by `_`.
    ///
    /// Server ids may themselves contain underscores (`role_info`), so the
    /// fully-qualified name `role_info_get_role` must resolve against the
    /// longest matching id, not the first `_`.
    pub fn resolve_tool<'a>(&self, fq_name: &'a str) -> Option<(String, &'a str)> {
        let mut best: Option<&str> = None;
        for id in self.specs.keys() {
            if fq_name.len() > id.len() + 1
                && fq_name.starts_with(id.as_str())
                && fq_name.as_bytes()[id.len()] == b'_'
                && best.map_or(true, |b| id.len() > b.len())
            {
                best = Some(id);
            }
        }
        best.map(|id| (id.to_string(), &fq_name[id.len() + 1..]))
    }
}
