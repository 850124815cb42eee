//! File-backed checkpoint storage
//!
//! Persists one `<uuid>.bin` file per checkpoint under a base directory. An
//! in-memory index mirrors the directory for fast lookups; `load` falls back
//! to reading the snapshot file when the id is not indexed (for example when
//! the store was opened over a directory written by an earlier run).
//!
//! Snapshot and metadata values are stored as JSON bytes inside the
//! bincode-framed record: bincode is not self-describing, so
//! `serde_json::Value` cannot round-trip through it directly.

use crate::checkpoint::{Checkpoint, CheckpointId};
use crate::error::{CheckpointError, Result};
use crate::memory::evict_oldest;
use crate::serializer::{BincodeSerializer, SerializerProtocol};
use crate::traits::CheckpointStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::memory::DEFAULT_MAX_CHECKPOINTS;

/// On-disk record. JSON payloads are pre-serialized to byte vectors.
#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    id: CheckpointId,
    snapshot_json: Vec<u8>,
    node_name: String,
    timestamp: String,
    parent_id: Option<CheckpointId>,
    metadata_json: Vec<u8>,
    content_hash: String,
}

impl FileRecord {
    fn from_checkpoint(cp: &Checkpoint) -> Result<Self> {
        Ok(Self {
            id: cp.id.clone(),
            snapshot_json: serde_json::to_vec(&cp.snapshot)?,
            node_name: cp.node_name.clone(),
            timestamp: cp.timestamp.to_rfc3339(),
            parent_id: cp.parent_id.clone(),
            metadata_json: serde_json::to_vec(&cp.metadata)?,
            content_hash: cp.content_hash.clone(),
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint> {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| CheckpointError::Serialization(format!("bad timestamp: {}", e)))?
            .with_timezone(&Utc);

        Ok(Checkpoint {
            id: self.id,
            snapshot: serde_json::from_slice(&self.snapshot_json)?,
            node_name: self.node_name,
            timestamp,
            parent_id: self.parent_id,
            metadata: serde_json::from_slice(&self.metadata_json)?,
            content_hash: self.content_hash,
        })
    }
}

/// Checkpoint store writing one binary file per checkpoint
pub struct FileCheckpointStore {
    dir: PathBuf,
    index: Arc<RwLock<HashMap<CheckpointId, Checkpoint>>>,
    max_checkpoints: usize,
    serializer: BincodeSerializer,
}

impl FileCheckpointStore {
    /// Open (or create) a store rooted at `dir`, indexing any existing
    /// checkpoint files found there. Unreadable files are skipped with a
    /// warning.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_capacity(dir, DEFAULT_MAX_CHECKPOINTS)
    }

    /// Like [`FileCheckpointStore::new`] with an explicit retention cap
    pub fn with_capacity(dir: impl AsRef<Path>, max_checkpoints: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let serializer = BincodeSerializer;
        let mut index = HashMap::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "bin") {
                match Self::read_record(&serializer, &path) {
                    Ok(cp) => {
                        index.insert(cp.id.clone(), cp);
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint file"),
                }
            }
        }

        Ok(Self {
            dir,
            index: Arc::new(RwLock::new(index)),
            max_checkpoints: max_checkpoints.max(1),
            serializer: BincodeSerializer,
        })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.bin", id))
    }

    fn read_record(serializer: &BincodeSerializer, path: &Path) -> Result<Checkpoint> {
        let bytes = std::fs::read(path)?;
        let record: FileRecord = serializer.loads(&bytes)?;
        record.into_checkpoint()
    }

    async fn write_record(&self, checkpoint: &Checkpoint) -> Result<()> {
        let record = FileRecord::from_checkpoint(checkpoint)?;
        let bytes = self.serializer.dumps(&record)?;
        tokio::fs::write(self.path_for(&checkpoint.id), bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(
        &self,
        state: &Value,
        node_name: &str,
        parent_id: Option<CheckpointId>,
        metadata: HashMap<String, Value>,
    ) -> Result<CheckpointId> {
        let checkpoint = Checkpoint::new(state.clone(), node_name, parent_id, metadata);
        let id = checkpoint.id.clone();

        self.write_record(&checkpoint).await?;

        let mut index = self.index.write().await;
        index.insert(id.clone(), checkpoint);

        if index.len() > self.max_checkpoints {
            if let Some(evicted) = evict_oldest(&mut index) {
                debug!(checkpoint_id = %evicted, "Evicting oldest checkpoint file");
                if let Err(e) = tokio::fs::remove_file(self.path_for(&evicted)).await {
                    warn!(checkpoint_id = %evicted, error = %e, "Failed to delete evicted checkpoint file");
                }
            }
        }

        Ok(id)
    }

    async fn load(&self, id: &CheckpointId) -> Result<Option<Value>> {
        if let Some(cp) = self.index.read().await.get(id) {
            return Ok(Some(cp.snapshot.clone()));
        }

        // Not indexed: try the file on disk
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let checkpoint = Self::read_record(&self.serializer, &path)?;
        let snapshot = checkpoint.snapshot.clone();
        self.index.write().await.insert(id.clone(), checkpoint);
        Ok(Some(snapshot))
    }

    async fn list(&self, node_name: Option<&str>, limit: Option<usize>) -> Result<Vec<Checkpoint>> {
        let index = self.index.read().await;

        let mut results: Vec<Checkpoint> = index
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
    async fn test_save_creates_file_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();

        let state = json!({"messages": ["hello"], "count": 2});
        let id = store
            .save(&state, "merge", None, HashMap::new())
            .await
            .unwrap();

        assert!(dir.path().join(format!("{}.bin", id)).exists());
        assert_eq!(store.load(&id).await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_lazy_load_from_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let state = json!({"k": [1, 2, 3]});

        let id = {
            let store = FileCheckpointStore::new(dir.path()).unwrap();
            store.save(&state, "n", None, HashMap::new()).await.unwrap()
        };

        // Fresh store over the same directory picks the file back up
        let reopened = FileCheckpointStore::new(dir.path()).unwrap();
        assert_eq!(reopened.load(&id).await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_eviction_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::with_capacity(dir.path(), 1).unwrap();

        let first = store
            .save(&json!({"n": 1}), "a", None, HashMap::new())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store
            .save(&json!({"n": 2}), "a", None, HashMap::new())
            .await
            .unwrap();

        assert!(!dir.path().join(format!("{}.bin", first)).exists());
        assert!(dir.path().join(format!("{}.bin", second)).exists());
    }

    #[tokio::test]
    async fn test_list_orders_by_timestamp_desc() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();

        store
            .save(&json!({"n": 1}), "a", None, HashMap::new())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .save(&json!({"n": 2}), "b", None, HashMap::new())
            .await
            .unwrap();

        let all = store.list(None, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].snapshot, json!({"n": 2}));

        let only_b = store.list(Some("b"), None).await.unwrap();
        assert_eq!(only_b.len(), 1);
    }
}
