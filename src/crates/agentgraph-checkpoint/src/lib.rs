//! Checkpoint persistence for agentgraph state.
//!
//! A checkpoint is a content-addressed snapshot of the shared state map taken
//! at a named node during graph execution. Checkpoints power the transactional
//! merge path of the state manager (snapshot before mutation, roll back on
//! failure) and time-travel inspection of past states.
//!
//! Two backends implement the same [`CheckpointStore`] trait:
//!
//! - [`InMemoryCheckpointStore`]: a `RwLock<HashMap>`; suitable for tests and
//!   single-run executions.
//! - [`FileCheckpointStore`]: one `<uuid>.bin` file per checkpoint with an
//!   in-memory index and lazy reload of evicted snapshots.
//!
//! Both evict the checkpoint with the oldest timestamp once `max_checkpoints`
//! is exceeded.

pub mod checkpoint;
pub mod error;
pub mod file;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use checkpoint::{canonical_json, Checkpoint, CheckpointId};
pub use error::{CheckpointError, Result};
pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;
pub use serializer::{BincodeSerializer, JsonSerializer, SerializerProtocol};
pub use traits::CheckpointStore;
