//! In-memory checkpoint storage
//!
//! Reference implementation of [`CheckpointStore`] backed by a
//! `RwLock<HashMap>`. Suitable for tests, development, and single-run
//! executions where persistence across restarts is not required.

use crate::checkpoint::{Checkpoint, CheckpointId};
use crate::error::Result;
use crate::traits::CheckpointStore;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Default cap on retained checkpoints before eviction kicks in
pub const DEFAULT_MAX_CHECKPOINTS: usize = 100;

/// Thread-safe in-memory checkpoint store with oldest-first eviction
#[derive(Debug, Clone)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<CheckpointId, Checkpoint>>>,
    max_checkpoints: usize,
}

impl InMemoryCheckpointStore {
    /// Create a store retaining at most [`DEFAULT_MAX_CHECKPOINTS`] snapshots
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_CHECKPOINTS)
    }

    /// Create a store retaining at most `max_checkpoints` snapshots
    pub fn with_capacity(max_checkpoints: usize) -> Self {
        Self {
            checkpoints: Arc::new(RwLock::new(HashMap::new())),
            max_checkpoints: max_checkpoints.max(1),
        }
    }

    /// Number of checkpoints currently held
    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    /// Whether the store holds no checkpoints
    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }

    /// Drop all checkpoints (useful for test isolation)
    pub async fn clear(&self) {
        self.checkpoints.write().await.clear();
    }

    /// Fetch a full checkpoint record rather than just its snapshot
    pub async fn get(&self, id: &CheckpointId) -> Option<Checkpoint> {
        self.checkpoints.read().await.get(id).cloned()
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove the entry with the oldest timestamp. Returns the evicted id.
pub(crate) fn evict_oldest(checkpoints: &mut HashMap<CheckpointId, Checkpoint>) -> Option<CheckpointId> {
    let oldest = checkpoints
        .values()
        .min_by_key(|cp| cp.timestamp)
        .map(|cp| cp.id.clone())?;
    checkpoints.remove(&oldest);
    Some(oldest)
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(
        &self,
        state: &Value,
        node_name: &str,
        parent_id: Option<CheckpointId>,
        metadata: HashMap<String, Value>,
    ) -> Result<CheckpointId> {
        let checkpoint = Checkpoint::new(state.clone(), node_name, parent_id, metadata);
        let id = checkpoint.id.clone();

        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.insert(id.clone(), checkpoint);

        if checkpoints.len() > self.max_checkpoints {
            if let Some(evicted) = evict_oldest(&mut checkpoints) {
                debug!(checkpoint_id = %evicted, "Evicted oldest checkpoint");
            }
        }

        Ok(id)
    }

    async fn load(&self, id: &CheckpointId) -> Result<Option<Value>> {
        Ok(self
            .checkpoints
            .read()
            .await
            .get(id)
            .map(|cp| cp.snapshot.clone()))
    }

    async fn list(&self, node_name: Option<&str>, limit: Option<usize>) -> Result<Vec<Checkpoint>> {
        let checkpoints = self.checkpoints.read().await;

        let mut results: Vec<Checkpoint> = checkpoints
            .values()
            .filter(|cp| node_name.map_or(true, |name| cp.node_name == name))
            .cloned()
            .collect();

        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            results.truncate(limit);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_and_load() {
        let store = InMemoryCheckpointStore::new();
        let state = json!({"counter": 3});

        let id = store
            .save(&state, "merge", None, HashMap::new())
            .await
            .unwrap();

        let loaded = store.load(&id).await.unwrap();
        assert_eq!(loaded, Some(state));
    }

    #[tokio::test]
    async fn test_load_unknown_id() {
        let store = InMemoryCheckpointStore::new();
        let loaded = store.load(&"missing".to_string()).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_eviction_drops_oldest() {
        let store = InMemoryCheckpointStore::with_capacity(2);

        let first = store
            .save(&json!({"n": 1}), "a", None, HashMap::new())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .save(&json!({"n": 2}), "a", None, HashMap::new())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .save(&json!({"n": 3}), "a", None, HashMap::new())
            .await
            .unwrap();

        assert_eq!(store.len().await, 2);
        assert!(store.load(&first).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_sorted_and_filtered() {
        let store = InMemoryCheckpointStore::new();

        store
            .save(&json!({"n": 1}), "node_a", None, HashMap::new())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .save(&json!({"n": 2}), "node_b", None, HashMap::new())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .save(&json!({"n": 3}), "node_a", None, HashMap::new())
            .await
            .unwrap();

        let all = store.list(None, None).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[0].timestamp >= all[1].timestamp);

        let only_a = store.list(Some("node_a"), None).await.unwrap();
        assert_eq!(only_a.len(), 2);

        let limited = store.list(None, Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].snapshot, json!({"n": 3}));
    }
}
