//! Collaborator interfaces consumed by the synchronization controller.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    AccountProfile, Credential, FetchResponse, LocalSnapshot, MergedRecord, RecordHandle,
    RemoteKey, Session,
};

/// Storage for the long-lived credential and the account it belongs to.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// The stored credential, if any.
    async fn credential(&self) -> Result<Option<Credential>>;

    /// Removes the credential (and the account data kept with it).
    async fn remove_credential(&self) -> Result<()>;

    /// Whether the stored account data should be refreshed from the remote.
    async fn is_renewal_due(&self) -> Result<bool>;

    /// Stores a freshly fetched account profile.
    async fn store_profile(&self, profile: &AccountProfile) -> Result<()>;
}

/// The rate-limited remote data API.
#[async_trait]
pub trait RemoteDataService: Send + Sync {
    /// Opens an authenticated session from a long-lived credential.
    async fn open_session(&self, credential: &Credential) -> Result<Session>;

    /// Fetches the records for exactly `keys`, with at most `log_depth` logs each.
    ///
    /// Records may come back in any order, and keys unknown to the remote are
    /// simply absent from the response.
    async fn fetch_by_keys(
        &self,
        session: &Session,
        keys: &[RemoteKey],
        log_depth: u32,
    ) -> Result<FetchResponse>;

    /// Fetches the profile of the account owning `session`.
    async fn account_profile(&self, session: &Session) -> Result<Option<AccountProfile>>;
}

/// The local record database.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Loads the snapshot behind `handle`, or `None` if it no longer exists.
    async fn resolve(&self, handle: RecordHandle) -> Result<Option<LocalSnapshot>>;

    /// Writes a merged record back.
    async fn persist(&self, record: &MergedRecord) -> Result<()>;
}

/// Receives cumulative progress updates from a run.
///
/// Implementations must return quickly; the controller calls this inline.
pub trait ProgressSink: Send + Sync {
    fn publish(&self, current: usize);
}

impl<F> ProgressSink for F
where
    F: Fn(usize) + Send + Sync,
{
    fn publish(&self, current: usize) {
        self(current)
    }
}

/// Progress sink that discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn publish(&self, _current: usize) {}
}
