//! Filesystem-based checkpoint storage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

use crate::store::{CheckpointID, CheckpointStore};
use crate::{scope_file_stem, CheckpointFile};

/// Filesystem implementation of CheckpointStore trait.
///
/// Stores one JSON file per checkpoint id in a directory. Writes go to a
/// temporary file first and are renamed into place.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Create a new FilesystemStore with the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the directory path.
    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn path_for(&self, id: &CheckpointID) -> PathBuf {
        self.dir.join(format!(
            "checkpoint_{}_{}.json",
            scope_file_stem(&id.kind),
            scope_file_stem(&id.scope)
        ))
    }
}

#[async_trait]
impl CheckpointStore for FilesystemStore {
    async fn store_checkpoint(&self, id: &CheckpointID, file: &CheckpointFile) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create checkpoint dir {}", self.dir.display()))?;

        let path = self.path_for(id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(file)?)?;
        std::fs::rename(&tmp, &path)?;

        tracing::debug!("Stored checkpoint to {}", path.display());
        Ok(())
    }

    async fn read_checkpoint(&self, id: &CheckpointID) -> Result<Option<CheckpointFile>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn clear_checkpoint(&self, id: &CheckpointID) -> Result<()> {
        let path = self.path_for(id);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("Cleared checkpoint {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
