//! Checkpoint manager bound to one run scope.

use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::{Checkpoint, CheckpointFile, CheckpointID, CheckpointStore};

/// Saves, loads and clears checkpoints of type `C` for one scope.
///
/// # Example
///
/// ```rust,ignore
/// use checkpoint::{CheckpointManager, CheckpointStorage};
///
/// let storage = CheckpointStorage::from_dir(Some("/tmp/checkpoints".into()));
/// let manager = CheckpointManager::<BatchCheckpoint>::new(storage.build_store(), "waypoints");
///
/// manager.save(&checkpoint).await?;
/// let resumed: Option<BatchCheckpoint> = manager.load().await?;
/// manager.clear().await?;
/// ```
pub struct CheckpointManager<C> {
    store: Arc<dyn CheckpointStore>,
    id: CheckpointID,
    _kind: PhantomData<fn() -> C>,
}

impl<C> Clone for CheckpointManager<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            id: self.id.clone(),
            _kind: PhantomData,
        }
    }
}

impl<C: Checkpoint> CheckpointManager<C> {
    pub fn new(store: Arc<dyn CheckpointStore>, scope: impl Into<String>) -> Self {
        Self {
            store,
            id: CheckpointID::new(C::KIND, scope),
            _kind: PhantomData,
        }
    }

    /// Manager that never persists anything.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NullStore), "disabled")
    }

    pub fn id(&self) -> &CheckpointID {
        &self.id
    }

    /// Persist `checkpoint`, replacing the previous one for this scope.
    pub async fn save(&self, checkpoint: &C) -> Result<()> {
        let file = CheckpointFile::new(checkpoint, self.id.scope.clone())?;
        self.store.store_checkpoint(&self.id, &file).await?;
        tracing::debug!(
            "Saved {} checkpoint for '{}': {}",
            C::KIND,
            self.id.scope,
            checkpoint.to_cli_string()
        );
        Ok(())
    }

    /// Load the checkpoint for this scope, if one was saved.
    pub async fn load(&self) -> Result<Option<C>> {
        match self.store.read_checkpoint(&self.id).await? {
            Some(file) => Ok(Some(file.parse::<C>()?)),
            None => Ok(None),
        }
    }

    /// Remove the checkpoint for this scope.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear_checkpoint(&self.id).await
    }
}

/// Store that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

#[async_trait]
impl CheckpointStore for NullStore {
    async fn store_checkpoint(&self, _id: &CheckpointID, _file: &CheckpointFile) -> Result<()> {
        Ok(())
    }

    async fn read_checkpoint(&self, _id: &CheckpointID) -> Result<Option<CheckpointFile>> {
        Ok(None)
    }

    async fn clear_checkpoint(&self, _id: &CheckpointID) -> Result<()> {
        Ok(())
    }
}
