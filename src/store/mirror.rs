use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sync_core::{
    AccountProfile, ApiStatus, Credential, FetchResponse, QuotaSnapshot, RemoteDataService,
    RemoteKey, RemoteRecord, Result, Session, SyncError,
};

use super::read_jsonl;

/// Remote service answering from a JSON-lines export of remote records.
///
/// Served items are counted against an optional per-window item quota; a
/// request that would exceed it fails with [`ApiStatus::ItemQuotaExceeded`].
pub struct MirrorRemote {
    records: HashMap<RemoteKey, RemoteRecord>,
    profile: AccountProfile,
    quota: Option<ItemQuota>,
    accepted_token: Option<String>,
    sessions: AtomicU64,
}

struct ItemQuota {
    limit: u32,
    period_minutes: u32,
    window: Mutex<QuotaWindow>,
}

struct QuotaWindow {
    started: DateTime<Utc>,
    served: u32,
}

impl MirrorRemote {
    pub fn from_records(records: impl IntoIterator<Item = RemoteRecord>) -> Self {
        let mut by_key = HashMap::new();
        for record in records {
            match record.key.clone() {
                Some(key) => {
                    by_key.insert(key, record);
                }
                None => tracing::warn!("Ignoring exported record without a key"),
            }
        }

        Self {
            records: by_key,
            profile: AccountProfile {
                user_name: "mirror".to_string(),
                premium: false,
            },
            quota: None,
            accepted_token: None,
            sessions: AtomicU64::new(0),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let records: Vec<RemoteRecord> = read_jsonl(path)?;
        tracing::info!("Loaded {} remote records from {}", records.len(), path.display());
        Ok(Self::from_records(records))
    }

    /// Limits served items to `limit` per `period_minutes` window.
    pub fn with_item_quota(mut self, limit: u32, period_minutes: u32) -> Self {
        self.quota = Some(ItemQuota {
            limit,
            period_minutes,
            window: Mutex::new(QuotaWindow {
                started: Utc::now(),
                served: 0,
            }),
        });
        self
    }

    /// Only accepts sessions opened with `token`.
    pub fn with_accepted_token(mut self, token: impl Into<String>) -> Self {
        self.accepted_token = Some(token.into());
        self
    }

    pub fn with_profile(mut self, profile: AccountProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Counts `requested` items against the quota, returning the new usage.
    fn consume(&self, requested: u32) -> Result<Option<QuotaSnapshot>> {
        let Some(quota) = &self.quota else {
            return Ok(None);
        };

        let mut window = quota.window.lock().unwrap_or_else(|e| e.into_inner());
        let period = Duration::minutes(i64::from(quota.period_minutes));
        let now = Utc::now();
        if now >= window.started + period {
            window.started = now;
            window.served = 0;
        }

        let renews_at = window.started + period;
        if window.served.saturating_add(requested) > quota.limit {
            return Err(SyncError::api(
                ApiStatus::ItemQuotaExceeded,
                format!(
                    "{} of {} items used, {} requested",
                    window.served, quota.limit, requested
                ),
            ));
        }

        window.served += requested;
        Ok(Some(QuotaSnapshot {
            current: window.served,
            limit: quota.limit,
            period_minutes: quota.period_minutes,
            renews_at,
        }))
    }
}

#[async_trait]
impl RemoteDataService for MirrorRemote {
    async fn open_session(&self, credential: &Credential) -> Result<Session> {
        if let Some(token) = &self.accepted_token {
            if credential.token() != token {
                return Err(SyncError::InvalidCredentials(
                    "credential rejected".to_string(),
                ));
            }
        }
        let n = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Session::new(format!("mirror-{n}")))
    }

    async fn fetch_by_keys(
        &self,
        _session: &Session,
        keys: &[RemoteKey],
        log_depth: u32,
    ) -> Result<FetchResponse> {
        let records: Vec<RemoteRecord> = keys
            .iter()
            .filter_map(|key| self.records.get(key))
            .map(|record| {
                let mut record = record.clone();
                record.logs.truncate(log_depth as usize);
                record
            })
            .collect();

        let served = u32::try_from(records.len()).unwrap_or(u32::MAX);
        let quota = self.consume(served)?;

        Ok(FetchResponse { records, quota })
    }

    async fn account_profile(&self, _session: &Session) -> Result<Option<AccountProfile>> {
        Ok(Some(self.profile.clone()))
    }
}
