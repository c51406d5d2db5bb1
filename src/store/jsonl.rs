use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use sync_core::{LocalSnapshot, LocalStore, MergedRecord, RecordHandle, Result, SyncError};

use super::{atomic_write, read_jsonl};

/// Local snapshots stored one per line in a JSON-lines file.
///
/// Persisted merges are appended to a journal next to the store
/// (`<file>.journal`). The journal is folded back into the store by
/// [`JsonlLocalStore::compact`] and whenever the store is opened, so the
/// main file is only ever replaced atomically.
pub struct JsonlLocalStore {
    path: PathBuf,
    journal_path: PathBuf,
    inner: Mutex<Snapshots>,
}

#[derive(Default)]
struct Snapshots {
    records: Vec<LocalSnapshot>,
    index: HashMap<RecordHandle, usize>,
}

impl Snapshots {
    /// Replaces the snapshot with the same handle, returning false when there is none.
    fn replace(&mut self, snapshot: LocalSnapshot) -> bool {
        match self.index.get(&snapshot.handle) {
            Some(&position) => {
                self.records[position] = snapshot;
                true
            }
            None => false,
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        for snapshot in &self.records {
            data.extend(encode_line(snapshot)?);
        }
        Ok(data)
    }
}

impl JsonlLocalStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let journal_path = journal_path_for(&path);
        let records: Vec<LocalSnapshot> = read_jsonl(&path)?;

        let mut index = HashMap::with_capacity(records.len());
        for (position, snapshot) in records.iter().enumerate() {
            if index.insert(snapshot.handle, position).is_some() {
                return Err(SyncError::Storage(format!(
                    "{}: duplicate handle {}",
                    path.display(),
                    snapshot.handle
                )));
            }
        }
        let mut snapshots = Snapshots { records, index };

        let journal = read_journal(&journal_path)?;
        if !journal.is_empty() {
            let entries = journal.len();
            for snapshot in journal {
                let handle = snapshot.handle;
                if !snapshots.replace(snapshot) {
                    tracing::warn!("Ignoring journal entry for unknown record {handle}");
                }
            }
            write_compacted(&path, &journal_path, &snapshots.encode()?)?;
            tracing::info!("Applied {entries} journal entries to {}", path.display());
        }

        tracing::info!(
            "Loaded {} local records from {}",
            snapshots.records.len(),
            path.display()
        );
        Ok(Self {
            path,
            journal_path,
            inner: Mutex::new(snapshots),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    /// Handles of all stored snapshots, in file order.
    pub fn handles(&self) -> Vec<RecordHandle> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.records.iter().map(|snapshot| snapshot.handle).collect()
    }

    /// Rewrites the store with every persisted merge and drops the journal.
    pub async fn compact(&self) -> Result<()> {
        let data = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.encode()?
        };
        let path = self.path.clone();
        let journal_path = self.journal_path.clone();
        blocking(move || write_compacted(&path, &journal_path, &data)).await?;
        tracing::debug!("Compacted {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl LocalStore for JsonlLocalStore {
    async fn resolve(&self, handle: RecordHandle) -> Result<Option<LocalSnapshot>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .index
            .get(&handle)
            .map(|&position| inner.records[position].clone()))
    }

    async fn persist(&self, record: &MergedRecord) -> Result<()> {
        let snapshot = record.clone().into_snapshot();
        let line = encode_line(&snapshot)?;
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if !inner.replace(snapshot) {
                return Err(SyncError::Storage(format!(
                    "no local record {} to update",
                    record.handle
                )));
            }
        }

        let journal_path = self.journal_path.clone();
        blocking(move || append_line(&journal_path, &line)).await
    }
}

fn journal_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".journal");
    PathBuf::from(name)
}

fn encode_line(snapshot: &LocalSnapshot) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(snapshot)
        .map_err(|e| SyncError::Storage(format!("failed to encode {}: {e}", snapshot.handle)))?;
    line.push(b'\n');
    Ok(line)
}

fn append_line(path: &Path, line: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line)?;
    Ok(())
}

fn write_compacted(path: &Path, journal_path: &Path, data: &[u8]) -> Result<()> {
    atomic_write(path, data)?;
    match fs::remove_file(journal_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Reads journal entries; a torn final line from an interrupted append is dropped.
fn read_journal(path: &Path) -> Result<Vec<LocalSnapshot>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(SyncError::Storage(format!(
                "failed to read {}: {e}",
                path.display()
            )))
        }
    };

    let lines: Vec<(usize, &str)> = content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();

    let mut entries = Vec::with_capacity(lines.len());
    for (position, &(index, line)) in lines.iter().enumerate() {
        match serde_json::from_str(line) {
            Ok(snapshot) => entries.push(snapshot),
            Err(e) if position + 1 == lines.len() => {
                tracing::warn!("Dropping torn journal line {}:{}: {e}", path.display(), index + 1);
            }
            Err(e) => {
                return Err(SyncError::Storage(format!(
                    "{}:{}: {e}",
                    path.display(),
                    index + 1
                )))
            }
        }
    }
    Ok(entries)
}

/// Runs file work off the async worker threads.
async fn blocking<F>(work: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SyncError::Storage(format!("file task failed: {e}")))?
}
