//! Checkpoint storage configuration.

use std::path::PathBuf;
use std::sync::Arc;

use crate::{CheckpointStore, FilesystemStore, NullStore};

/// Where run checkpoints are kept.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CheckpointStorage {
    /// Checkpoints are not written; runs cannot be resumed.
    #[default]
    Disabled,

    /// Checkpoints are JSON files in `dir`.
    Filesystem { dir: PathBuf },
}

impl CheckpointStorage {
    /// Filesystem storage when a directory is given, disabled otherwise.
    pub fn from_dir(dir: Option<PathBuf>) -> Self {
        match dir {
            Some(dir) => CheckpointStorage::Filesystem { dir },
            None => CheckpointStorage::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, CheckpointStorage::Disabled)
    }

    /// Builds the store backing this configuration.
    pub fn build_store(&self) -> Arc<dyn CheckpointStore> {
        match self {
            CheckpointStorage::Disabled => Arc::new(NullStore),
            CheckpointStorage::Filesystem { dir } => Arc::new(FilesystemStore::new(dir.clone())),
        }
    }
}
