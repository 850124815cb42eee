//! Command objects: node outputs that override static routing
//!
//! A [`Command`] carries a state-update map together with an explicit list of
//! successor nodes, letting a node steer execution dynamically instead of
//! relying on its outgoing edges. `goto` targets must name nodes that exist
//! in the graph, or the [`END`] sentinel.

use crate::graph::{NodeId, END};
use serde_json::Value;

/// A state update plus explicit successor routing
#[derive(Debug, Clone, Default)]
pub struct Command {
    /// State-update map merged like any node update
    pub update: Value,
    /// Successors to schedule next, overriding static edges
    pub goto: Vec<NodeId>,
}

impl Command {
    /// Command with an update and no routing (falls back to static edges)
    pub fn update(update: Value) -> Self {
        Self {
            update,
            goto: Vec::new(),
        }
    }

    /// Add a successor target
    pub fn goto(mut self, target: impl Into<NodeId>) -> Self {
        self.goto.push(target.into());
        self
    }

    /// Add several successor targets
    pub fn goto_all<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<NodeId>,
    {
        self.goto.extend(targets.into_iter().map(Into::into));
        self
    }

    /// Route to [`END`], terminating this path
    pub fn end(self) -> Self {
        self.goto(END)
    }

    /// Whether this command routes anywhere at all
    pub fn has_routing(&self) -> bool {
        !self.goto.is_empty()
    }

    /// Whether every target is the END sentinel
    pub fn is_terminal(&self) -> bool {
        !self.goto.is_empty() && self.goto.iter().all(|t| t == END)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_builder() {
        let command = Command::update(json!({"k": 1})).goto("a").goto("b");
        assert_eq!(command.goto, vec!["a", "b"]);
        assert!(command.has_routing());
        assert!(!command.is_terminal());
    }

    #[test]
    fn test_terminal_command() {
        let command = Command::update(json!({})).end();
        assert!(command.is_terminal());
    }

    #[test]
    fn test_default_command_has_no_routing() {
        assert!(!Command::default().has_routing());
    }
}
