//! Record types exchanged between the local store, the remote service and
//! the reconciliation step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, SyncError};

/// Field map shared by local snapshots, remote records and merge results.
pub type Fields = BTreeMap<String, serde_json::Value>;

/// Opaque identifier of a locally stored record.
///
/// Handles are supplied as an ordered sequence at the start of a run and
/// never carry remote data themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordHandle(pub i64);

impl RecordHandle {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for RecordHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<i64> for RecordHandle {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Stable remote identifier correlating a local snapshot with a remote record
/// (a cache code such as `GC1A2B`).
///
/// Keys are never empty; blank codes are treated as "no key" when loading.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RemoteKey(String);

impl RemoteKey {
    pub fn new(code: impl Into<String>) -> Result<Self> {
        let code = code.into();
        let trimmed = code.trim();
        if trimmed.is_empty() {
            return Err(SyncError::InvalidResponse(
                "remote key must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RemoteKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        RemoteKey::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Deserializes an optional key, mapping blank strings to `None`.
fn blank_key_as_none<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<RemoteKey>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|code| RemoteKey::new(code).ok()))
}

/// A single log entry attached to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordLog {
    pub id: i64,
    pub kind: String,
    pub author: String,
    pub logged_at: DateTime<Utc>,
    #[serde(default)]
    pub text: String,
}

/// The locally persisted view of a record prior to a merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSnapshot {
    pub handle: RecordHandle,
    #[serde(default, deserialize_with = "blank_key_as_none")]
    pub remote_key: Option<RemoteKey>,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default)]
    pub logs: Vec<RecordLog>,
}

impl LocalSnapshot {
    pub fn new(handle: RecordHandle, remote_key: Option<RemoteKey>) -> Self {
        Self {
            handle,
            remote_key,
            fields: Fields::new(),
            logs: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn with_log(mut self, log: RecordLog) -> Self {
        self.logs.push(log);
        self
    }

    /// Whether this snapshot can take part in synchronization.
    pub fn is_eligible(&self) -> bool {
        self.remote_key.is_some()
    }
}

/// A record fetched from the remote service for one key.
///
/// The key stays optional so malformed payloads can be detected during
/// reconciliation instead of at deserialization time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    #[serde(default, deserialize_with = "blank_key_as_none")]
    pub key: Option<RemoteKey>,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default)]
    pub logs: Vec<RecordLog>,
}

impl RemoteRecord {
    pub fn new(key: RemoteKey) -> Self {
        Self {
            key: Some(key),
            fields: Fields::new(),
            logs: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn with_log(mut self, log: RecordLog) -> Self {
        self.logs.push(log);
        self
    }
}

/// Result of reconciling one remote record with its local snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub handle: RecordHandle,
    pub key: RemoteKey,
    pub fields: Fields,
    pub logs: Vec<RecordLog>,
}

impl MergedRecord {
    /// Converts the merge result back into the snapshot shape the local store keeps.
    pub fn into_snapshot(self) -> LocalSnapshot {
        LocalSnapshot {
            handle: self.handle,
            remote_key: Some(self.key),
            fields: self.fields,
            logs: self.logs,
        }
    }
}

/// Quota counters reported by the remote service alongside a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    /// Items consumed in the current window.
    pub current: u32,
    /// Items allowed per window.
    pub limit: u32,
    /// Window length in minutes.
    pub period_minutes: u32,
    /// When the current window resets.
    pub renews_at: DateTime<Utc>,
}

impl QuotaSnapshot {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.current)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current >= self.limit
    }
}

/// Remote response for one fetch call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResponse {
    pub records: Vec<RemoteRecord>,
    pub quota: Option<QuotaSnapshot>,
}

/// Account data refreshed from the remote service when renewal is due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProfile {
    pub user_name: String,
    pub premium: bool,
}

/// Long-lived credential used to open remote sessions.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Server-side authenticated context opened from a [`Credential`].
///
/// A session is used by reference for fetches and consumed by
/// [`Session::invalidate`], so an expired session cannot be reused.
#[derive(Debug, PartialEq, Eq)]
pub struct Session {
    id: String,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Drops the session after the remote reported it expired.
    pub fn invalidate(self) {
        tracing::debug!(session = %self.id, "Session invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_key_rejects_blank() {
        assert!(RemoteKey::new("").is_err());
        assert!(RemoteKey::new("   ").is_err());
        assert_eq!(RemoteKey::new(" GC12 ").unwrap().as_str(), "GC12");
    }

    #[test]
    fn test_snapshot_blank_key_is_ineligible() {
        let json = r#"{"handle": 7, "remote_key": "", "fields": {"name": "parking"}}"#;
        let snapshot: LocalSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.handle, RecordHandle(7));
        assert!(snapshot.remote_key.is_none());
        assert!(!snapshot.is_eligible());
    }

    #[test]
    fn test_snapshot_without_key_field() {
        let snapshot: LocalSnapshot = serde_json::from_str(r#"{"handle": 3}"#).unwrap();
        assert!(!snapshot.is_eligible());
        assert!(snapshot.fields.is_empty());
    }

    #[test]
    fn test_credential_debug_hides_token() {
        let credential = Credential::new("secret-token");
        assert_eq!(format!("{credential:?}"), "Credential(***)");
        assert_eq!(credential.token(), "secret-token");
    }

    #[test]
    fn test_quota_remaining() {
        let quota = QuotaSnapshot {
            current: 4,
            limit: 6,
            period_minutes: 1440,
            renews_at: Utc::now(),
        };
        assert_eq!(quota.remaining(), 2);
        assert!(!quota.is_exhausted());
    }
}
