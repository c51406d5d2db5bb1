//! Reconciliation of freshly fetched remote records with local snapshots.

use std::collections::HashSet;
use tracing::warn;

use sync_core::{LocalSnapshot, MergedRecord, RecordLog, RemoteRecord, Result, SyncError};

/// Merges `remote` records with the matching `local` snapshots.
///
/// The remote service may return records in any order, so every remote
/// record is matched by key against `local` (first match wins). Output order
/// follows `remote`. Remote records without a local match are dropped; a
/// remote record without a key fails the whole merge.
pub fn merge(remote: Vec<RemoteRecord>, local: &[LocalSnapshot]) -> Result<Vec<MergedRecord>> {
    let mut merged = Vec::with_capacity(remote.len());

    for RemoteRecord { key, fields, logs } in remote {
        let Some(key) = key else {
            return Err(SyncError::InvalidResponse(
                "remote record without a key".to_string(),
            ));
        };

        let Some(snapshot) = local
            .iter()
            .find(|snapshot| snapshot.remote_key.as_ref() == Some(&key))
        else {
            warn!(%key, "Remote record has no matching local snapshot, dropped");
            continue;
        };

        // Remote fields win; local-only fields and logs are kept.
        let mut merged_fields = snapshot.fields.clone();
        merged_fields.extend(fields);

        merged.push(MergedRecord {
            handle: snapshot.handle,
            key,
            fields: merged_fields,
            logs: merge_logs(logs, &snapshot.logs),
        });
    }

    Ok(merged)
}

fn merge_logs(remote: Vec<RecordLog>, local: &[RecordLog]) -> Vec<RecordLog> {
    let remote_ids: HashSet<i64> = remote.iter().map(|log| log.id).collect();
    let mut logs = remote;
    logs.extend(
        local
            .iter()
            .filter(|log| !remote_ids.contains(&log.id))
            .cloned(),
    );
    logs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use sync_core::{RecordHandle, RemoteKey};

    fn key(code: &str) -> RemoteKey {
        RemoteKey::new(code).unwrap()
    }

    fn log(id: i64, text: &str) -> RecordLog {
        RecordLog {
            id,
            kind: "Found it".to_string(),
            author: "cacher".to_string(),
            logged_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_unmatched_remote_records_are_dropped() {
        let remote = vec![RemoteRecord::new(key("GC1")), RemoteRecord::new(key("GC2"))];
        let local = vec![LocalSnapshot::new(RecordHandle(2), Some(key("GC2")))
            .with_field("note", json!("x"))];

        let merged = merge(remote, &local).unwrap();

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].key, key("GC2"));
        assert_eq!(merged[0].handle, RecordHandle(2));
        assert_eq!(merged[0].fields["note"], json!("x"));
    }

    #[test]
    fn test_output_follows_remote_order() {
        let remote = vec![
            RemoteRecord::new(key("GC3")),
            RemoteRecord::new(key("GC1")),
            RemoteRecord::new(key("GC2")),
        ];
        let local = vec![
            LocalSnapshot::new(RecordHandle(1), Some(key("GC1"))),
            LocalSnapshot::new(RecordHandle(2), Some(key("GC2"))),
            LocalSnapshot::new(RecordHandle(3), Some(key("GC3"))),
        ];

        let merged = merge(remote, &local).unwrap();
        let handles: Vec<_> = merged.iter().map(|m| m.handle).collect();
        assert_eq!(
            handles,
            vec![RecordHandle(3), RecordHandle(1), RecordHandle(2)]
        );
    }

    #[test]
    fn test_remote_fields_take_precedence() {
        let remote = vec![RemoteRecord::new(key("GC1"))
            .with_field("name", json!("New name"))
            .with_field("archived", json!(true))];
        let local = vec![LocalSnapshot::new(RecordHandle(1), Some(key("GC1")))
            .with_field("name", json!("Old name"))
            .with_field("user_note", json!("bring a torch"))];

        let merged = merge(remote, &local).unwrap();
        let fields = &merged[0].fields;
        assert_eq!(fields["name"], json!("New name"));
        assert_eq!(fields["archived"], json!(true));
        assert_eq!(fields["user_note"], json!("bring a torch"));
    }

    #[test]
    fn test_local_only_logs_are_preserved() {
        let remote = vec![RemoteRecord::new(key("GC1"))
            .with_log(log(10, "updated"))
            .with_log(log(9, "remote"))];
        let local = vec![LocalSnapshot::new(RecordHandle(1), Some(key("GC1")))
            .with_log(log(10, "stale"))
            .with_log(log(3, "old"))];

        let merged = merge(remote, &local).unwrap();
        let logs: Vec<_> = merged[0]
            .logs
            .iter()
            .map(|l| (l.id, l.text.as_str()))
            .collect();
        assert_eq!(logs, vec![(10, "updated"), (9, "remote"), (3, "old")]);
    }

    #[test]
    fn test_first_matching_snapshot_wins() {
        let remote = vec![RemoteRecord::new(key("GC1"))];
        let local = vec![
            LocalSnapshot::new(RecordHandle(1), Some(key("GC1"))),
            LocalSnapshot::new(RecordHandle(2), Some(key("GC1"))),
        ];

        let merged = merge(remote, &local).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].handle, RecordHandle(1));
    }

    #[test]
    fn test_snapshots_without_key_never_match() {
        let remote = vec![RemoteRecord::new(key("GC1"))];
        let local = vec![LocalSnapshot::new(RecordHandle(1), None)];

        assert!(merge(remote, &local).unwrap().is_empty());
    }

    #[test]
    fn test_remote_record_without_key_is_invalid() {
        let remote = vec![RemoteRecord {
            key: None,
            fields: Default::default(),
            logs: Vec::new(),
        }];
        let local = vec![LocalSnapshot::new(RecordHandle(1), Some(key("GC1")))];

        let err = merge(remote, &local).unwrap_err();
        assert!(matches!(err, SyncError::InvalidResponse(_)));
    }

    #[test]
    fn test_empty_inputs() {
        assert!(merge(Vec::new(), &[]).unwrap().is_empty());
    }
}
