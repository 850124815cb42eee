//! State manager: reducer-driven merges with versioning and rollback
//!
//! [`StateManager`] applies update maps to a state object under the per-key
//! reducers registered in its [`StateSchema`]. Every non-empty merge emits a
//! [`StateVersion`] with a monotonically increasing number whose parent is
//! the previous version. [`StateManager::merge_transactional`] snapshots the
//! state to the checkpoint store before mutating and restores it if any
//! reducer fails.
//!
//! The reducer registry and version log sit behind one mutex; the merge
//! itself is a function of its arguments and the registry.

use crate::error::{GraphError, Result};
use crate::state::{Reducer, StateError, StateSchema};
use agentgraph_checkpoint::{CheckpointId, CheckpointStore};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// One key's before/after in a merge
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
    /// True when the key exists in the old state but not the new one
    pub deleted: bool,
}

/// Map of changed keys produced by a merge or diff
pub type StateDiff = HashMap<String, FieldChange>;

/// A recorded state transition
#[derive(Debug, Clone, Serialize)]
pub struct StateVersion {
    /// Monotonically increasing, starting at 1
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    /// Version this one descends from; `None` only for the first
    pub parent: Option<u64>,
    /// Node that produced the update, when known
    pub node: Option<String>,
    pub changes: StateDiff,
}

struct Inner {
    schema: StateSchema,
    versions: Vec<StateVersion>,
}

/// Applies update maps to state under registered reducers
pub struct StateManager {
    inner: Mutex<Inner>,
    checkpoints: Arc<dyn CheckpointStore>,
    versioning: bool,
}

impl StateManager {
    pub fn new(checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self::with_schema(StateSchema::new(), checkpoints)
    }

    pub fn with_schema(schema: StateSchema, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                schema,
                versions: Vec::new(),
            }),
            checkpoints,
            versioning: true,
        }
    }

    /// Disable version recording (merges still apply reducers)
    pub fn without_versioning(mut self) -> Self {
        self.versioning = false;
        self
    }

    /// Register a reducer for a state key
    pub fn register_reducer(&self, key: impl Into<String>, reducer: Box<dyn Reducer>) {
        self.inner.lock().schema.register(key, reducer);
    }

    /// Merge `updates` into `state` in place.
    ///
    /// Each key flows through its registered reducer (default `overwrite`).
    /// On reducer failure the keys already processed stay applied and the
    /// error is returned; use [`merge_transactional`](Self::merge_transactional)
    /// for all-or-nothing semantics.
    pub fn merge(
        &self,
        state: &mut Value,
        updates: &Value,
        node: Option<&str>,
    ) -> Result<StateDiff> {
        let mut inner = self.inner.lock();

        let updates_obj = updates
            .as_object()
            .ok_or_else(|| StateError::InvalidState("update must be an object".to_string()))?;

        let state_obj = state
            .as_object_mut()
            .ok_or_else(|| StateError::InvalidState("state must be an object".to_string()))?;

        let mut diff = StateDiff::new();

        for (key, incoming) in updates_obj {
            let existing = state_obj.get(key).cloned().unwrap_or(Value::Null);
            let merged = inner.schema.merge_key(key, &existing, incoming)?;

            if merged != existing {
                diff.insert(
                    key.clone(),
                    FieldChange {
                        old: existing,
                        new: merged.clone(),
                        deleted: false,
                    },
                );
            }

            state_obj.insert(key.clone(), merged);
        }

        if self.versioning && !diff.is_empty() {
            let parent = inner.versions.last().map(|v| v.version);
            let version = StateVersion {
                version: parent.unwrap_or(0) + 1,
                timestamp: Utc::now(),
                parent,
                node: node.map(str::to_string),
                changes: diff.clone(),
            };
            debug!(version = version.version, node = ?node, changed = diff.len(), "Recorded state version");
            inner.versions.push(version);
        }

        Ok(diff)
    }

    /// Checkpoint `state`, then merge; if any reducer fails, restore `state`
    /// from the checkpoint and return the error.
    pub async fn merge_transactional(
        &self,
        state: &mut Value,
        updates: &Value,
        node: Option<&str>,
    ) -> Result<CheckpointId> {
        let checkpoint_id = self
            .checkpoints
            .save(state, node.unwrap_or("merge"), None, HashMap::new())
            .await?;

        match self.merge(state, updates, node) {
            Ok(_) => Ok(checkpoint_id),
            Err(e) => {
                let snapshot = self
                    .checkpoints
                    .load(&checkpoint_id)
                    .await?
                    .ok_or_else(|| {
                        GraphError::Execution(format!(
                            "rollback checkpoint {} disappeared",
                            checkpoint_id
                        ))
                    })?;
                *state = snapshot;
                debug!(checkpoint_id = %checkpoint_id, "Rolled back failed merge");
                Err(e)
            }
        }
    }

    /// Compute the per-key difference between two states
    pub fn diff(old: &Value, new: &Value) -> StateDiff {
        let empty = serde_json::Map::new();
        let old_obj = old.as_object().unwrap_or(&empty);
        let new_obj = new.as_object().unwrap_or(&empty);

        let keys: BTreeSet<&String> = old_obj.keys().chain(new_obj.keys()).collect();
        let mut diff = StateDiff::new();

        for key in keys {
            let old_value = old_obj.get(key.as_str()).cloned().unwrap_or(Value::Null);
            let new_value = new_obj.get(key.as_str()).cloned().unwrap_or(Value::Null);
            let deleted = old_obj.contains_key(key.as_str()) && !new_obj.contains_key(key.as_str());

            if old_value != new_value || deleted {
                diff.insert(
                    key.clone(),
                    FieldChange {
                        old: old_value,
                        new: new_value,
                        deleted,
                    },
                );
            }
        }

        diff
    }

    /// Most recent versions first, capped at `limit` when given
    pub fn history(&self, limit: Option<usize>) -> Vec<StateVersion> {
        let inner = self.inner.lock();
        let mut versions: Vec<StateVersion> = inner.versions.iter().rev().cloned().collect();
        if let Some(limit) = limit {
            versions.truncate(limit);
        }
        versions
    }

    /// Latest version number, 0 before any merge
    pub fn current_version(&self) -> u64 {
        self.inner
            .lock()
            .versions
            .last()
            .map(|v| v.version)
            .unwrap_or(0)
    }

    /// Checkpoint store this manager snapshots into
    pub fn checkpoint_store(&self) -> Arc<dyn CheckpointStore> {
        self.checkpoints.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AppendListReducer, CounterReducer};
    use agentgraph_checkpoint::InMemoryCheckpointStore;
    use serde_json::json;

    fn manager() -> StateManager {
        StateManager::new(Arc::new(InMemoryCheckpointStore::new()))
    }

    #[test]
    fn test_merge_applies_registered_reducers() {
        let manager = manager();
        manager.register_reducer("counter", Box::new(CounterReducer));
        manager.register_reducer("log", Box::new(AppendListReducer));

        let mut state = json!({"counter": 1, "log": ["a"]});
        manager
            .merge(&mut state, &json!({"counter": 2, "log": ["b"]}), None)
            .unwrap();

        assert_eq!(state, json!({"counter": 3, "log": ["a", "b"]}));
    }

    #[test]
    fn test_merge_default_overwrite_for_unregistered_keys() {
        let manager = manager();
        let mut state = json!({"x": "old"});
        manager.merge(&mut state, &json!({"x": "new"}), None).unwrap();
        assert_eq!(state["x"], "new");
    }

    #[test]
    fn test_versions_monotonic_with_parent_chain() {
        let manager = manager();
        let mut state = json!({});

        manager.merge(&mut state, &json!({"a": 1}), Some("n1")).unwrap();
        manager.merge(&mut state, &json!({"a": 2}), Some("n2")).unwrap();
        manager.merge(&mut state, &json!({"a": 3}), Some("n3")).unwrap();

        assert_eq!(manager.current_version(), 3);

        let history = manager.history(None);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].version, 3);
        assert_eq!(history[0].parent, Some(2));
        assert_eq!(history[2].parent, None);
    }

    #[test]
    fn test_empty_update_produces_no_version() {
        let manager = manager();
        let mut state = json!({"a": 1});

        manager.merge(&mut state, &json!({}), None).unwrap();
        // Overwriting with an identical value changes nothing either
        manager.merge(&mut state, &json!({"a": 1}), None).unwrap();

        assert_eq!(manager.current_version(), 0);
    }

    #[tokio::test]
    async fn test_transactional_merge_rolls_back_on_reducer_failure() {
        let manager = manager();
        manager.register_reducer("counter", Box::new(CounterReducer));
        manager.register_reducer("bogus", Box::new(CounterReducer));

        let mut state = json!({"counter": 1});

        // "not a number" makes the counter reducer fail on key "bogus"
        let err = manager
            .merge_transactional(
                &mut state,
                &json!({"counter": 2, "bogus": "not a number"}),
                Some("merge"),
            )
            .await
            .unwrap_err();

        assert_eq!(state, json!({"counter": 1}));
        assert!(err.to_string().contains("bogus"));
    }

    #[tokio::test]
    async fn test_transactional_merge_returns_checkpoint_id() {
        let manager = manager();
        let mut state = json!({"a": 1});

        let checkpoint_id = manager
            .merge_transactional(&mut state, &json!({"a": 2}), None)
            .await
            .unwrap();

        assert_eq!(state["a"], 2);
        let snapshot = manager
            .checkpoint_store()
            .load(&checkpoint_id)
            .await
            .unwrap();
        assert_eq!(snapshot, Some(json!({"a": 1})));
    }

    #[test]
    fn test_diff_reports_deletions() {
        let old = json!({"keep": 1, "change": 1, "drop": 1});
        let new = json!({"keep": 1, "change": 2});

        let diff = StateManager::diff(&old, &new);
        assert_eq!(diff.len(), 2);
        assert!(!diff["change"].deleted);
        assert!(diff["drop"].deleted);
        assert_eq!(diff["drop"].old, json!(1));
    }
}
