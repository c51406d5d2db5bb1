//! In-memory credential store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use sync_core::{AccountProfile, Credential, CredentialStore, Result, SyncError};

#[derive(Default)]
pub struct MemoryCredentialStore {
    credential: Mutex<Option<Credential>>,
    profile: Mutex<Option<AccountProfile>>,
    renewal_due: AtomicBool,
    removals: AtomicUsize,
    removal_error: Mutex<Option<SyncError>>,
}

impl MemoryCredentialStore {
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
            ..Self::default()
        }
    }

    pub fn set_renewal_due(&self, due: bool) {
        self.renewal_due.store(due, Ordering::SeqCst);
    }

    pub fn current(&self) -> Option<Credential> {
        self.credential
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn profile(&self) -> Option<AccountProfile> {
        self.profile.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Makes the next `remove_credential` call fail with `err`.
    pub fn fail_removal(&self, err: SyncError) {
        *self.removal_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(err);
    }

    /// Number of `remove_credential` calls.
    pub fn removals(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn credential(&self) -> Result<Option<Credential>> {
        Ok(self.current())
    }

    async fn remove_credential(&self) -> Result<()> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.removal_error.lock().unwrap_or_else(|e| e.into_inner()).take() {
            return Err(err);
        }
        *self.credential.lock().unwrap_or_else(|e| e.into_inner()) = None;
        *self.profile.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    async fn is_renewal_due(&self) -> Result<bool> {
        Ok(self.renewal_due.load(Ordering::SeqCst))
    }

    async fn store_profile(&self, profile: &AccountProfile) -> Result<()> {
        *self.profile.lock().unwrap_or_else(|e| e.into_inner()) = Some(profile.clone());
        self.renewal_due.store(false, Ordering::SeqCst);
        Ok(())
    }
}
