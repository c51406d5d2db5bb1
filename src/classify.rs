//! Failure classification and recovery policy.
//!
//! [`classify`] maps every [`SyncError`] to a category, the recovery action
//! the host should take and a message description the host renders. It has no
//! side effects; the two automatic corrective actions are returned as
//! [`SideEffect`]s and carried out by [`ErrorHandler`].

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use sync_core::{
    AccountState, ApiStatus, CredentialStore, QuotaSnapshot, QuotaTracker, RemoteKey, SyncError,
    TransportCause,
};

/// Exact text the OAuth provider reports for a rejected verifier.
pub const OAUTH_VERIFIER_REJECTED: &str = "oauth_verifier argument was incorrect.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Auth,
    Protocol,
    NotFound,
    Network,
    Quota,
    Entitlement,
    Integration,
    Storage,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    PromptReauth,
    ClearSessionAndPromptReauth,
    ReportAndAbort,
    InformUserNoReport,
    InformUserWithRetryOption,
}

impl RecoveryAction {
    /// Whether the failure warrants a diagnostic report.
    pub fn reports(&self) -> bool {
        matches!(self, RecoveryAction::ReportAndAbort)
    }
}

/// Message the host renders for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageTemplate {
    NoAccount,
    SessionExpired,
    InvalidResponse,
    RecordsNotFound,
    NoResult,
    NetworkUnavailable,
    BasicMemberItemQuotaExceeded,
    PremiumMemberItemQuotaExceeded,
    CallQuotaExceeded,
    PremiumFilter,
    IntegrationFailure,
    NoWritePermission,
    InvalidAuthorizationCode,
    Unexpected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleTemplate {
    BasicMemberWarning,
    PremiumMemberWarning,
    CallQuotaExceeded,
    IntegrationError,
}

/// Template, title and arguments of a failure message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageSpec {
    pub template: MessageTemplate,
    pub title: Option<TitleTemplate>,
    /// Values interpolated into the template, in order.
    pub args: Vec<String>,
    /// Count selecting the plural form, for templates that have one.
    pub quantity: Option<u32>,
    /// Offer a yes/no choice to continue into the follow-up action.
    pub offer_continue: bool,
    /// Attach a diagnostic report.
    pub report: bool,
}

impl MessageSpec {
    fn new(template: MessageTemplate) -> Self {
        Self {
            template,
            title: None,
            args: Vec::new(),
            quantity: None,
            offer_continue: false,
            report: false,
        }
    }

    fn title(mut self, title: TitleTemplate) -> Self {
        self.title = Some(title);
        self
    }

    fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn quantity(mut self, quantity: usize) -> Self {
        self.quantity = Some(u32::try_from(quantity).unwrap_or(u32::MAX));
        self
    }

    fn report(mut self) -> Self {
        self.report = true;
        self
    }
}

/// Corrective action taken automatically for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    /// Remove the stored credential so the next run does not reuse it.
    InvalidateCredential,
    /// Refresh account entitlements at the next opportunity.
    ScheduleAccountRevalidation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub category: Category,
    pub action: RecoveryAction,
    pub message: MessageSpec,
    pub side_effects: Vec<SideEffect>,
}

impl Classification {
    fn new(category: Category, action: RecoveryAction, message: MessageSpec) -> Self {
        Self {
            category,
            action,
            message,
            side_effects: Vec::new(),
        }
    }

    fn with_side_effect(mut self, effect: SideEffect) -> Self {
        self.side_effects.push(effect);
        self
    }
}

/// Account and quota state consulted while building messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassifyContext {
    pub quota: Option<QuotaSnapshot>,
    pub premium: Option<bool>,
}

impl ClassifyContext {
    pub fn from_state(quota: &QuotaTracker, account: &AccountState) -> Self {
        Self {
            quota: quota.snapshot(),
            premium: account.is_premium(),
        }
    }
}

/// Classifies `err`.
pub fn classify(err: &SyncError, ctx: &ClassifyContext) -> Classification {
    use Category as C;
    use RecoveryAction as A;

    match err {
        SyncError::Continuable(inner) => {
            let mut classification = classify(inner, ctx);
            // Re-authentication prompts and premium warnings only ever offer "ok"
            classification.message.offer_continue = !matches!(
                classification.action,
                A::PromptReauth | A::ClearSessionAndPromptReauth
            ) && classification.category != C::Entitlement;
            classification
        }
        SyncError::InvalidCredentials(_) => Classification::new(
            C::Auth,
            A::PromptReauth,
            MessageSpec::new(MessageTemplate::NoAccount),
        ),
        SyncError::SessionInvalid(_)
        | SyncError::Api {
            status: ApiStatus::NotAuthorized,
            ..
        } => Classification::new(
            C::Auth,
            A::ClearSessionAndPromptReauth,
            MessageSpec::new(MessageTemplate::SessionExpired),
        )
        .with_side_effect(SideEffect::InvalidateCredential),
        SyncError::InvalidResponse(message) => Classification::new(
            C::Protocol,
            A::ReportAndAbort,
            MessageSpec::new(MessageTemplate::InvalidResponse)
                .arg(message.as_str())
                .report(),
        ),
        SyncError::NotFound { keys } => Classification::new(
            C::NotFound,
            A::InformUserNoReport,
            MessageSpec::new(MessageTemplate::RecordsNotFound)
                .arg(join_keys(keys))
                .quantity(keys.len()),
        ),
        SyncError::NoResultFound => Classification::new(
            C::NotFound,
            A::InformUserNoReport,
            MessageSpec::new(MessageTemplate::NoResult),
        ),
        SyncError::Network { cause, .. } => {
            let message = MessageSpec::new(MessageTemplate::NetworkUnavailable);
            if cause.as_ref().is_some_and(|cause| !cause.is_expected()) {
                Classification::new(C::Network, A::ReportAndAbort, message.report())
            } else {
                Classification::new(C::Network, A::InformUserNoReport, message)
            }
        }
        SyncError::Api {
            status: ApiStatus::ItemQuotaExceeded,
            ..
        } => Classification::new(
            C::Quota,
            A::InformUserWithRetryOption,
            item_quota_message(ctx),
        ),
        SyncError::Api {
            status: ApiStatus::CallQuotaExceeded,
            ..
        } => Classification::new(
            C::Quota,
            A::InformUserWithRetryOption,
            MessageSpec::new(MessageTemplate::CallQuotaExceeded)
                .title(TitleTemplate::CallQuotaExceeded),
        ),
        SyncError::Api {
            status: ApiStatus::PremiumRequired(filter),
            ..
        } => Classification::new(
            C::Entitlement,
            A::InformUserNoReport,
            MessageSpec::new(MessageTemplate::PremiumFilter)
                .title(TitleTemplate::PremiumMemberWarning)
                .arg(filter.as_str()),
        )
        .with_side_effect(SideEffect::ScheduleAccountRevalidation),
        SyncError::Integration { type_name, message } => Classification::new(
            C::Integration,
            A::ReportAndAbort,
            MessageSpec::new(MessageTemplate::IntegrationFailure)
                .title(TitleTemplate::IntegrationError)
                .arg(message.as_str())
                .arg(type_name.as_str())
                .report(),
        ),
        SyncError::Storage(_) => Classification::new(
            C::Storage,
            A::InformUserNoReport,
            MessageSpec::new(MessageTemplate::NoWritePermission),
        ),
        SyncError::OAuth(message) if message == OAUTH_VERIFIER_REJECTED => Classification::new(
            C::Auth,
            A::InformUserNoReport,
            MessageSpec::new(MessageTemplate::InvalidAuthorizationCode),
        ),
        SyncError::OAuth(_)
        | SyncError::Api {
            status: ApiStatus::Other(_),
            ..
        }
        | SyncError::Config(_)
        | SyncError::Other { .. } => unknown(err),
    }
}

fn unknown(err: &SyncError) -> Classification {
    let message = match err {
        SyncError::OAuth(message) | SyncError::Config(message) => message.clone(),
        SyncError::Api { message, .. } | SyncError::Other { message, .. } => message.clone(),
        other => other.to_string(),
    };
    Classification::new(
        Category::Unknown,
        RecoveryAction::ReportAndAbort,
        MessageSpec::new(MessageTemplate::Unexpected)
            .arg(message)
            .arg(err.type_name())
            .report(),
    )
}

fn item_quota_message(ctx: &ClassifyContext) -> MessageSpec {
    let (template, title) = if ctx.premium.unwrap_or(false) {
        (
            MessageTemplate::PremiumMemberItemQuotaExceeded,
            TitleTemplate::PremiumMemberWarning,
        )
    } else {
        (
            MessageTemplate::BasicMemberItemQuotaExceeded,
            TitleTemplate::BasicMemberWarning,
        )
    };

    let message = MessageSpec::new(template).title(title);
    match &ctx.quota {
        Some(quota) => message
            .arg(quota.limit.to_string())
            .arg(format_period(quota.period_minutes))
            .arg(quota.renews_at.format("%H:%M").to_string())
            .quantity(quota.limit as usize),
        None => message,
    }
}

/// Formats a quota window: minutes below one hour, whole hours otherwise.
pub fn format_period(period_minutes: u32) -> String {
    if period_minutes < 60 {
        plural(period_minutes, "minute")
    } else {
        plural(period_minutes / 60, "hour")
    }
}

fn plural(count: u32, unit: &str) -> String {
    if count == 1 {
        format!("{count} {unit}")
    } else {
        format!("{count} {unit}s")
    }
}

fn join_keys(keys: &[RemoteKey]) -> String {
    keys.iter()
        .map(RemoteKey::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Classifies failures and carries out their side effects.
pub struct ErrorHandler<C> {
    credentials: Arc<C>,
    account: AccountState,
    quota: QuotaTracker,
    credential_removed: bool,
}

impl<C: CredentialStore> ErrorHandler<C> {
    pub fn new(credentials: Arc<C>, account: AccountState, quota: QuotaTracker) -> Self {
        Self {
            credentials,
            account,
            quota,
            credential_removed: false,
        }
    }

    /// Skips credential removal when the failed run already removed it.
    pub fn credential_already_removed(mut self, removed: bool) -> Self {
        self.credential_removed = removed;
        self
    }

    /// Classifies `err` against the current account and quota state, then
    /// applies the resulting side effects.
    pub async fn handle(&self, err: &SyncError) -> Classification {
        error!("Handling failure ({}): {err}", err.type_name());

        let ctx = ClassifyContext::from_state(&self.quota, &self.account);
        let classification = classify(err, &ctx);

        for effect in &classification.side_effects {
            self.apply(*effect).await;
        }
        classification
    }

    async fn apply(&self, effect: SideEffect) {
        match effect {
            SideEffect::InvalidateCredential => {
                if self.credential_removed {
                    debug!("Stored credential already removed by the run");
                } else {
                    info!("Removing stored credential after session failure");
                    if let Err(e) = self.credentials.remove_credential().await {
                        warn!("Failed to remove credential: {e}");
                    }
                }
                self.account.clear_premium();
            }
            SideEffect::ScheduleAccountRevalidation => {
                info!("Scheduling account revalidation");
                self.account.schedule_revalidation();
            }
        }
    }
}

/// Builds a representative failure for `kind`, for diagnostics.
///
/// Recognised kinds: `invalid-credentials`, `session-invalid`,
/// `not-authorized`, `invalid-response`, `not-found`, `no-result`,
/// `network`, `network-unexpected`, `item-quota`, `call-quota`, `premium`,
/// `integration`, `storage`, `oauth-verifier`, `oauth`, `api-status`.
/// Any other kind yields an unclassified failure.
pub fn sample_error(kind: &str) -> SyncError {
    match kind {
        "invalid-credentials" => SyncError::InvalidCredentials("Account not found.".to_string()),
        "session-invalid" => SyncError::SessionInvalid("session expired".to_string()),
        "not-authorized" => SyncError::api(ApiStatus::NotAuthorized, "not authorized"),
        "invalid-response" => SyncError::InvalidResponse("unexpected payload".to_string()),
        "not-found" => SyncError::NotFound {
            keys: ["GC1", "GC2"]
                .into_iter()
                .filter_map(|code| RemoteKey::new(code).ok())
                .collect(),
        },
        "no-result" => SyncError::NoResultFound,
        "network" => SyncError::network("connect failed", Some(TransportCause::Timeout)),
        "network-unexpected" => SyncError::network(
            "connect failed",
            Some(TransportCause::Other {
                type_name: "ProtocolError".to_string(),
                message: "bad frame".to_string(),
            }),
        ),
        "item-quota" => SyncError::api(ApiStatus::ItemQuotaExceeded, "item quota exceeded"),
        "call-quota" => SyncError::api(ApiStatus::CallQuotaExceeded, "call quota exceeded"),
        "premium" => SyncError::api(
            ApiStatus::PremiumRequired(sync_core::PremiumFilter::Difficulty),
            "premium membership required",
        ),
        "integration" => SyncError::Integration {
            type_name: "IllegalStateException".to_string(),
            message: "host not running".to_string(),
        },
        "storage" => SyncError::Storage("permission denied".to_string()),
        "oauth-verifier" => SyncError::OAuth(OAUTH_VERIFIER_REJECTED.to_string()),
        "oauth" => SyncError::OAuth("token endpoint unavailable".to_string()),
        "api-status" => SyncError::api(ApiStatus::from_code(500), "internal error"),
        other => SyncError::other("Unclassified", format!("unknown failure kind '{other}'")),
    }
}
