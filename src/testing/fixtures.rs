//! Record fixtures.

use serde_json::json;
use sync_core::{LocalSnapshot, RecordHandle, RemoteKey, RemoteRecord};

/// Builds a key from a known-valid code.
///
/// # Panics
/// Panics if `code` is blank.
pub fn key(code: &str) -> RemoteKey {
    RemoteKey::new(code).unwrap_or_else(|e| panic!("invalid fixture key '{code}': {e}"))
}

/// `count` eligible snapshots with handles `1..=count` and keys `GC1..`.
pub fn eligible_snapshots(count: usize) -> Vec<LocalSnapshot> {
    (1..=count as i64)
        .map(|id| {
            LocalSnapshot::new(RecordHandle(id), Some(key(&format!("GC{id}"))))
                .with_field("name", json!(format!("Waypoint {id}")))
                .with_field("user_note", json!(format!("note {id}")))
        })
        .collect()
}

/// A remote record for every keyed snapshot, with a refreshed name.
pub fn remote_records_for(snapshots: &[LocalSnapshot]) -> Vec<RemoteRecord> {
    snapshots
        .iter()
        .filter_map(|snapshot| snapshot.remote_key.clone())
        .map(|key| {
            let name = format!("Remote {key}");
            RemoteRecord::new(key).with_field("name", json!(name))
        })
        .collect()
}

pub fn handles_of(snapshots: &[LocalSnapshot]) -> Vec<RecordHandle> {
    snapshots.iter().map(|snapshot| snapshot.handle).collect()
}
