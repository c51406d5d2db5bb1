//! File-backed collaborators used by the command-line host.
//!
//! - [`JsonlLocalStore`]: local snapshots kept in a JSON-lines file
//! - [`MirrorRemote`]: a remote service answering from a JSON-lines export
//! - [`FileCredentialStore`]: credential and account profile in a TOML file

mod credentials;
mod jsonl;
mod mirror;

pub use credentials::{FileCredentialStore, DEFAULT_RENEW_INTERVAL_HOURS};
pub use jsonl::JsonlLocalStore;
pub use mirror::MirrorRemote;

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use sync_core::{Result, SyncError};

/// Replaces `path` with `data` through a temporary file in the same directory.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(data)?;
    temp.persist(path)
        .map_err(|e| SyncError::Storage(format!("failed to replace {}: {}", path.display(), e.error)))?;
    Ok(())
}

/// Parses every non-blank line of a JSON-lines file.
pub(crate) fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = fs::read_to_string(path)
        .map_err(|e| SyncError::Storage(format!("failed to read {}: {e}", path.display())))?;

    let mut items = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(line).map_err(|e| {
            SyncError::Storage(format!("{}:{}: {e}", path.display(), index + 1))
        })?;
        items.push(item);
    }
    Ok(items)
}
