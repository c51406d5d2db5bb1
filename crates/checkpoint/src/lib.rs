//! Checkpoint management for waypoint-sync
//!
//! Provides storage-agnostic checkpoint handling so that an interrupted
//! synchronization run can be resumed where it stopped.
//!
//! # Architecture
//!
//! This crate provides a generic checkpoint system that:
//! - Defines the `Checkpoint` trait for run-specific checkpoint types
//! - Provides `CheckpointFile` wrapper for storage-agnostic serialization
//! - Manages checkpoint saving/loading/clearing via `CheckpointManager`
//! - Supports multiple storage backends via `CheckpointStore` trait
//!
//! ## Storage Backends
//!
//! - `FilesystemStore` - Stores one JSON file per checkpoint scope
//! - `NullStore` - Discards checkpoints (resume disabled)

mod config;
mod file;
mod filesystem;
mod manager;
pub mod store;


// Re-export config types
pub use config::CheckpointStorage;

// Re-export file types
pub use file::CheckpointFile;

// Re-export manager types
pub use manager::{CheckpointManager, NullStore};

// Re-export store trait and types
pub use store::{CheckpointID, CheckpointStore};

// Re-export storage implementations
pub use filesystem::FilesystemStore;

/// Trait that run-specific checkpoints must implement.
///
/// # Example
///
/// ```rust
/// use checkpoint::Checkpoint;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct CursorCheckpoint {
///     pub cursor: usize,
/// }
///
/// impl Checkpoint for CursorCheckpoint {
///     const KIND: &'static str = "cursor";
///
///     fn to_cli_string(&self) -> String {
///         self.cursor.to_string()
///     }
///
///     fn from_cli_string(s: &str) -> anyhow::Result<Self> {
///         Ok(Self { cursor: s.parse()? })
///     }
/// }
/// ```
pub trait Checkpoint: serde::Serialize + for<'de> serde::Deserialize<'de> + Clone {
    /// Checkpoint kind identifier (e.g., "batch").
    ///
    /// Stored in every checkpoint file and validated when loading.
    const KIND: &'static str;

    /// Convert to CLI-friendly string format.
    ///
    /// The returned string should be parseable by `from_cli_string()`.
    fn to_cli_string(&self) -> String;

    /// Parse from CLI string format.
    fn from_cli_string(s: &str) -> anyhow::Result<Self>
    where
        Self: Sized;
}

/// Sanitizes a scope name so it can be embedded in a file name.
pub(crate) fn scope_file_stem(scope: &str) -> String {
    scope
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
