//! Storage backend trait for checkpoints
//!
//! Implement [`CheckpointStore`] to plug a custom backend (database, object
//! store) into the state manager. The crate ships two implementations:
//! [`crate::memory::InMemoryCheckpointStore`] and
//! [`crate::file::FileCheckpointStore`].

use crate::checkpoint::{Checkpoint, CheckpointId};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// A store of state checkpoints.
///
/// All operations must be safe under concurrent callers. A single lock over
/// the backing map is acceptable; none of the methods are hot paths.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Snapshot `state` under a fresh UUID and return the id.
    ///
    /// If the store now holds more than its configured maximum, the
    /// checkpoint with the oldest timestamp is evicted.
    async fn save(
        &self,
        state: &Value,
        node_name: &str,
        parent_id: Option<CheckpointId>,
        metadata: HashMap<String, Value>,
    ) -> Result<CheckpointId>;

    /// Load the state snapshot stored under `id`, or `None` if unknown.
    async fn load(&self, id: &CheckpointId) -> Result<Option<Value>>;

    /// List checkpoints, optionally filtered by producing node, sorted by
    /// timestamp descending. `limit` caps the result length.
    async fn list(&self, node_name: Option<&str>, limit: Option<usize>) -> Result<Vec<Checkpoint>>;
}
