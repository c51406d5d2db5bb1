use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sync_core::{AccountProfile, Credential, CredentialStore, Result, SyncError};

use super::atomic_write;

/// Hours between account profile refreshes.
pub const DEFAULT_RENEW_INTERVAL_HOURS: i64 = 24;

/// Credential, account profile and renewal time kept in a TOML file.
///
/// ```toml
/// token = "..."
/// renew_after = "2024-05-02T10:00:00Z"
///
/// [profile]
/// user_name = "cacher"
/// premium = false
/// ```
pub struct FileCredentialStore {
    path: PathBuf,
    renew_interval: Duration,
    state: Mutex<CredentialFile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    renew_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    profile: Option<AccountProfile>,
}

impl FileCredentialStore {
    /// Opens the store at `path`; a missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)
                .map_err(|e| SyncError::Storage(format!("{}: {e}", path.display())))?
        } else {
            CredentialFile::default()
        };

        Ok(Self {
            path,
            renew_interval: Duration::hours(DEFAULT_RENEW_INTERVAL_HOURS),
            state: Mutex::new(state),
        })
    }

    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stores a new token; the account profile is refreshed on next use.
    pub fn save_token(&self, token: impl Into<String>) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = CredentialFile {
            token: Some(token.into()),
            renew_after: None,
            profile: None,
        };
        self.write(&state)
    }

    pub fn profile(&self) -> Option<AccountProfile> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.profile.clone()
    }

    fn write(&self, state: &CredentialFile) -> Result<()> {
        let content = toml::to_string_pretty(state)
            .map_err(|e| SyncError::Storage(format!("failed to encode credentials: {e}")))?;
        atomic_write(&self.path, content.as_bytes())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn credential(&self) -> Result<Option<Credential>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .map(Credential::new))
    }

    async fn remove_credential(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = CredentialFile::default();
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!("Removed credentials at {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn is_renewal_due(&self) -> Result<bool> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(match state.renew_after {
            Some(renew_after) => Utc::now() >= renew_after,
            None => true,
        })
    }

    async fn store_profile(&self, profile: &AccountProfile) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.profile = Some(profile.clone());
        state.renew_after = Some(Utc::now() + self.renew_interval);
        self.write(&state)
    }
}
