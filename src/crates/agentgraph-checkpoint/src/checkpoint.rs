//! Core checkpoint data structure and content hashing
//!
//! A [`Checkpoint`] captures the full state map at a point in time together
//! with the node that produced it, an optional parent checkpoint id, and free
//! metadata. The content hash is a SHA-256 hex digest over a canonical
//! (recursively key-sorted) JSON serialization of the snapshot, so two
//! checkpoints holding logically identical state always carry identical
//! hashes regardless of map insertion order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

/// Checkpoint identifier (a UUID v4 string)
pub type CheckpointId = String;

/// A snapshot of the shared state map labelled with its producing node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique id assigned at creation
    pub id: CheckpointId,

    /// The state map at capture time
    pub snapshot: Value,

    /// Name of the node that was executing when the snapshot was taken
    pub node_name: String,

    /// Capture timestamp
    pub timestamp: DateTime<Utc>,

    /// Id of the checkpoint this one descends from, if any
    pub parent_id: Option<CheckpointId>,

    /// Free-form metadata attached by the caller
    pub metadata: HashMap<String, Value>,

    /// SHA-256 hex digest of the canonical snapshot serialization
    pub content_hash: String,
}

impl Checkpoint {
    /// Create a checkpoint with a fresh UUID. The content hash is computed
    /// once here and never recomputed.
    pub fn new(
        snapshot: Value,
        node_name: impl Into<String>,
        parent_id: Option<CheckpointId>,
        metadata: HashMap<String, Value>,
    ) -> Self {
        let content_hash = content_hash(&snapshot);
        Self {
            id: Uuid::new_v4().to_string(),
            snapshot,
            node_name: node_name.into(),
            timestamp: Utc::now(),
            parent_id,
            metadata,
            content_hash,
        }
    }
}

/// Compute the SHA-256 hex digest of a value's canonical serialization
pub fn content_hash(value: &Value) -> String {
    let canonical = canonical_json(value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Serialize a value to JSON with object keys sorted recursively.
///
/// `serde_json::Map` preserves insertion order, so a plain `to_string` is not
/// stable across construction orders. Sorting keys first makes the output a
/// canonical form suitable for hashing.
pub fn canonical_json(value: &Value) -> String {
    fn sort(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut sorted = serde_json::Map::new();
                for key in keys {
                    sorted.insert(key.clone(), sort(&map[key]));
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort).collect()),
            other => other.clone(),
        }
    }

    sort(value).to_string()
}
