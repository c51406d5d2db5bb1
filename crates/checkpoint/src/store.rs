//! Checkpoint storage trait and types

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::CheckpointFile;

/// Checkpoint identifier for storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointID {
    /// Checkpoint kind (e.g., "batch")
    pub kind: String,
    /// Run scope (e.g., the local store name)
    pub scope: String,
}

impl CheckpointID {
    pub fn new(kind: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            scope: scope.into(),
        }
    }
}

/// Trait for checkpoint storage operations.
///
/// This trait abstracts the storage backend for checkpoint operations,
/// allowing the same checkpoint logic to work with:
/// - Filesystem storage (`FilesystemStore`)
/// - No storage at all (`NullStore`)
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Store a checkpoint, replacing any previous one with the same id.
    async fn store_checkpoint(&self, id: &CheckpointID, file: &CheckpointFile) -> Result<()>;

    /// Read a checkpoint from the storage backend.
    ///
    /// Returns None if the checkpoint doesn't exist.
    async fn read_checkpoint(&self, id: &CheckpointID) -> Result<Option<CheckpointFile>>;

    /// Remove a checkpoint. Removing a missing checkpoint is not an error.
    async fn clear_checkpoint(&self, id: &CheckpointID) -> Result<()>;
}
