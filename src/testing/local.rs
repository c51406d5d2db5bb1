//! In-memory local store.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use sync_core::{LocalSnapshot, LocalStore, MergedRecord, RecordHandle, Result, SyncError};

#[derive(Default)]
pub struct MemoryLocalStore {
    snapshots: Mutex<HashMap<RecordHandle, LocalSnapshot>>,
    persisted: Mutex<Vec<MergedRecord>>,
    fail_persist: Mutex<HashSet<RecordHandle>>,
}

impl MemoryLocalStore {
    pub fn with_snapshots(snapshots: impl IntoIterator<Item = LocalSnapshot>) -> Self {
        let store = Self::default();
        for snapshot in snapshots {
            store.insert(snapshot);
        }
        store
    }

    pub fn insert(&self, snapshot: LocalSnapshot) {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(snapshot.handle, snapshot);
    }

    /// Makes persisting `handle` fail with a storage error.
    pub fn fail_persist_for(&self, handle: RecordHandle) {
        self.fail_persist
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(handle);
    }

    /// Every persisted record, in persist order.
    pub fn persisted(&self) -> Vec<MergedRecord> {
        self.persisted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn snapshot(&self, handle: RecordHandle) -> Option<LocalSnapshot> {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&handle)
            .cloned()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn resolve(&self, handle: RecordHandle) -> Result<Option<LocalSnapshot>> {
        Ok(self.snapshot(handle))
    }

    async fn persist(&self, record: &MergedRecord) -> Result<()> {
        let failing = self
            .fail_persist
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&record.handle);
        if failing {
            return Err(SyncError::Storage(format!(
                "permission denied writing {}",
                record.handle
            )));
        }

        self.insert(record.clone().into_snapshot());
        self.persisted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }
}
