//! Scriptable remote service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sync_core::{
    AccountProfile, Credential, FetchResponse, QuotaSnapshot, RemoteDataService, RemoteKey,
    RemoteRecord, Result, Session, SyncError,
};

/// Remote service backed by a key map, with a fixed latency per fetch and
/// scripted failures.
#[derive(Default)]
pub struct MockRemote {
    records: HashMap<RemoteKey, RemoteRecord>,
    delay: Duration,
    reverse: bool,
    quota: Option<QuotaSnapshot>,
    profile: Option<AccountProfile>,
    extra: Vec<RemoteRecord>,
    open_failure: Mutex<Option<SyncError>>,
    fetch_failures: Mutex<HashMap<usize, SyncError>>,
    calls: Mutex<Vec<Vec<RemoteKey>>>,
    log_depths: Mutex<Vec<u32>>,
    sessions: AtomicUsize,
}

impl MockRemote {
    pub fn with_records(records: impl IntoIterator<Item = RemoteRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .filter_map(|record| record.key.clone().map(|key| (key, record)))
                .collect(),
            ..Self::default()
        }
    }

    /// Every fetch takes `delay` (on the tokio clock).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Answers in reverse request order.
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Attaches `quota` to every response.
    pub fn with_quota(mut self, quota: QuotaSnapshot) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn with_profile(mut self, profile: Option<AccountProfile>) -> Self {
        self.profile = profile;
        self
    }

    /// Appends `record` to every response regardless of the requested keys.
    pub fn with_extra_record(mut self, record: RemoteRecord) -> Self {
        self.extra.push(record);
        self
    }

    pub fn fail_open(&self, err: SyncError) {
        *self.open_failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(err);
    }

    /// Fails the `call`-th fetch (1-based) with `err`.
    pub fn fail_fetch(&self, call: usize, err: SyncError) {
        self.fetch_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(call, err);
    }

    /// Keys of every fetch call, in call order.
    pub fn calls(&self) -> Vec<Vec<RemoteKey>> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn log_depths(&self) -> Vec<u32> {
        self.log_depths
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteDataService for MockRemote {
    async fn open_session(&self, _credential: &Credential) -> Result<Session> {
        if let Some(err) = self
            .open_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            return Err(err);
        }
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Session::new(format!("mock-{n}")))
    }

    async fn fetch_by_keys(
        &self,
        _session: &Session,
        keys: &[RemoteKey],
        log_depth: u32,
    ) -> Result<FetchResponse> {
        let call = {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            calls.push(keys.to_vec());
            calls.len()
        };
        self.log_depths
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(log_depth);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failure = self
            .fetch_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&call);
        if let Some(err) = failure {
            return Err(err);
        }

        let mut records: Vec<RemoteRecord> = keys
            .iter()
            .filter_map(|key| self.records.get(key).cloned())
            .collect();
        if self.reverse {
            records.reverse();
        }
        records.extend(self.extra.iter().cloned());

        Ok(FetchResponse {
            records,
            quota: self.quota,
        })
    }

    async fn account_profile(&self, _session: &Session) -> Result<Option<AccountProfile>> {
        Ok(self.profile.clone())
    }
}
