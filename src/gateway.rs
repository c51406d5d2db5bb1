//! Opens the authenticated session a synchronization run works with.

use std::sync::Arc;

use sync_core::{AccountState, CredentialStore, RemoteDataService, Result, Session, SyncError};

/// Opens remote sessions from the stored credential.
///
/// The gateway never retries: a failed open is returned to the caller as-is.
pub struct SessionGateway<R, C> {
    remote: Arc<R>,
    credentials: Arc<C>,
    account: AccountState,
}

impl<R, C> SessionGateway<R, C>
where
    R: RemoteDataService,
    C: CredentialStore,
{
    pub fn new(remote: Arc<R>, credentials: Arc<C>, account: AccountState) -> Self {
        Self {
            remote,
            credentials,
            account,
        }
    }

    /// Opens a session, refreshing the account profile when it is due.
    pub async fn open(&self) -> Result<Session> {
        let Some(credential) = self.credentials.credential().await? else {
            // A stale account without a token is never left behind
            if let Err(e) = self.credentials.remove_credential().await {
                tracing::warn!("Failed to remove stale account: {e}");
            }
            return Err(SyncError::InvalidCredentials(
                "Account not found.".to_string(),
            ));
        };

        let session = self.remote.open_session(&credential).await?;
        tracing::debug!("Opened session {}", session.id());

        if self.credentials.is_renewal_due().await? {
            self.refresh_account(&session).await?;
        }

        Ok(session)
    }

    async fn refresh_account(&self, session: &Session) -> Result<()> {
        let profile = self
            .remote
            .account_profile(session)
            .await?
            .ok_or_else(|| SyncError::InvalidResponse("account profile missing".to_string()))?;

        self.credentials.store_profile(&profile).await?;
        self.account.set_premium(profile.premium);
        self.account.mark_revalidated();

        tracing::info!(
            "Refreshed account profile for {} (premium: {})",
            profile.user_name,
            profile.premium
        );
        Ok(())
    }
}
