//! Process-wide quota and account state.
//!
//! Both handles are cheap to clone and share one underlying value. The active
//! synchronization run is the only writer; status surfaces read concurrently.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use crate::types::QuotaSnapshot;

/// Shared view of the remote quota, updated after every remote call.
#[derive(Debug, Clone, Default)]
pub struct QuotaTracker {
    inner: Arc<RwLock<Option<QuotaSnapshot>>>,
}

impl QuotaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the quota reported with the latest response.
    pub fn update(&self, snapshot: QuotaSnapshot) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(snapshot);
    }

    /// The last reported quota, if any call reported one.
    pub fn snapshot(&self) -> Option<QuotaSnapshot> {
        *self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

const PREMIUM_UNKNOWN: u8 = 0;
const PREMIUM_NO: u8 = 1;
const PREMIUM_YES: u8 = 2;

/// Shared account flags: membership level and pending revalidation.
#[derive(Debug, Clone, Default)]
pub struct AccountState {
    inner: Arc<AccountFlags>,
}

#[derive(Debug, Default)]
struct AccountFlags {
    premium: AtomicU8,
    revalidate: AtomicBool,
}

impl AccountState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Membership level, `None` until a profile has been seen.
    pub fn is_premium(&self) -> Option<bool> {
        match self.inner.premium.load(Ordering::Acquire) {
            PREMIUM_YES => Some(true),
            PREMIUM_NO => Some(false),
            _ => None,
        }
    }

    pub fn set_premium(&self, premium: bool) {
        let value = if premium { PREMIUM_YES } else { PREMIUM_NO };
        self.inner.premium.store(value, Ordering::Release);
    }

    pub fn clear_premium(&self) {
        self.inner.premium.store(PREMIUM_UNKNOWN, Ordering::Release);
    }

    /// Requests an account refresh at the next opportunity.
    pub fn schedule_revalidation(&self) {
        self.inner.revalidate.store(true, Ordering::Release);
    }

    pub fn revalidation_scheduled(&self) -> bool {
        self.inner.revalidate.load(Ordering::Acquire)
    }

    /// Clears the pending refresh once the account has been revalidated.
    pub fn mark_revalidated(&self) {
        self.inner.revalidate.store(false, Ordering::Release);
    }
}
