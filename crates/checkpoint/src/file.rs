//! Checkpoint file wrapper for storage-agnostic serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Checkpoint;

/// Storage-agnostic checkpoint file wrapper.
///
/// # File Format
///
/// ```json
/// {
///     "kind": "batch",
///     "scope": "waypoints",
///     "checkpoint": { "cursor": 120, "batch_size": 15, "total": 250 },
///     "created_at": "2024-01-01T00:00:00Z"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointFile {
    /// Checkpoint kind identifier
    pub kind: String,
    /// Which run this checkpoint belongs to
    pub scope: String,
    /// Serialized checkpoint data as JSON Value
    pub checkpoint: serde_json::Value,
    /// Timestamp when this checkpoint file was created
    pub created_at: DateTime<Utc>,
}

impl CheckpointFile {
    /// Create new checkpoint file from a run-specific checkpoint.
    pub fn new<C: Checkpoint>(checkpoint: &C, scope: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            kind: C::KIND.to_string(),
            scope: scope.into(),
            checkpoint: serde_json::to_value(checkpoint)?,
            created_at: Utc::now(),
        })
    }

    /// Parse checkpoint into its concrete type.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The `kind` doesn't match `C::KIND`
    /// - The checkpoint data can't be deserialized into type `C`
    pub fn parse<C: Checkpoint>(&self) -> anyhow::Result<C> {
        if self.kind != C::KIND {
            anyhow::bail!(
                "Checkpoint type mismatch: expected '{}', found '{}'",
                C::KIND,
                self.kind
            );
        }
        Ok(serde_json::from_value(self.checkpoint.clone())?)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
