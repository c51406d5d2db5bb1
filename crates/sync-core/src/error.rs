//! Failure taxonomy for synchronization runs.
//!
//! Every failure raised by the session gateway, the remote service, the local
//! store or the controller is one of the [`SyncError`] variants below. The
//! set is closed so that classification can be an exhaustive match.

use std::fmt;
use thiserror::Error;

use crate::types::RemoteKey;

/// Filters that the remote service reserves for premium accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PremiumFilter {
    BookmarksExclude,
    Difficulty,
    FavoritePoints,
    ContainerSize,
    GeocacheName,
    HiddenByUser,
    NotHiddenByUser,
    Terrain,
    TrackableCount,
}

impl PremiumFilter {
    pub const ALL: [PremiumFilter; 9] = [
        PremiumFilter::BookmarksExclude,
        PremiumFilter::Difficulty,
        PremiumFilter::FavoritePoints,
        PremiumFilter::ContainerSize,
        PremiumFilter::GeocacheName,
        PremiumFilter::HiddenByUser,
        PremiumFilter::NotHiddenByUser,
        PremiumFilter::Terrain,
        PremiumFilter::TrackableCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PremiumFilter::BookmarksExclude => "bookmarks_exclude",
            PremiumFilter::Difficulty => "difficulty",
            PremiumFilter::FavoritePoints => "favorite_points",
            PremiumFilter::ContainerSize => "container_size",
            PremiumFilter::GeocacheName => "geocache_name",
            PremiumFilter::HiddenByUser => "hidden_by_user",
            PremiumFilter::NotHiddenByUser => "not_hidden_by_user",
            PremiumFilter::Terrain => "terrain",
            PremiumFilter::TrackableCount => "trackable_count",
        }
    }
}

/// Status reported by the remote service for a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiStatus {
    /// The session or account is not authorized for the call.
    NotAuthorized,
    /// Per-period full record quota reached (status 118).
    ItemQuotaExceeded,
    /// Per-minute call quota reached (status 140).
    CallQuotaExceeded,
    /// The request used a filter reserved for premium accounts.
    PremiumRequired(PremiumFilter),
    /// Any status without dedicated handling.
    Other(u32),
}

impl ApiStatus {
    pub const ITEM_QUOTA_EXCEEDED: u32 = 118;
    pub const CALL_QUOTA_EXCEEDED: u32 = 140;

    /// Maps a numeric status code to its variant.
    pub fn from_code(code: u32) -> Self {
        match code {
            Self::ITEM_QUOTA_EXCEEDED => ApiStatus::ItemQuotaExceeded,
            Self::CALL_QUOTA_EXCEEDED => ApiStatus::CallQuotaExceeded,
            other => ApiStatus::Other(other),
        }
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiStatus::NotAuthorized => f.write_str("not authorized"),
            ApiStatus::ItemQuotaExceeded => write!(f, "item quota exceeded ({})", Self::ITEM_QUOTA_EXCEEDED),
            ApiStatus::CallQuotaExceeded => write!(f, "call quota exceeded ({})", Self::CALL_QUOTA_EXCEEDED),
            ApiStatus::PremiumRequired(filter) => {
                write!(f, "premium membership required for {} filter", filter.as_str())
            }
            ApiStatus::Other(code) => write!(f, "status {code}"),
        }
    }
}

/// Immediate cause of a transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCause {
    Timeout,
    UnknownHost,
    ConnectionRefused,
    EndOfStream,
    /// TLS layer failure with the message reported by the TLS stack.
    Tls { message: String },
    /// Anything else, identified by the underlying error type.
    Other { type_name: String, message: String },
}

impl TransportCause {
    /// Whether this cause is an everyday connectivity problem that does not
    /// warrant a diagnostic report.
    pub fn is_expected(&self) -> bool {
        match self {
            TransportCause::Timeout
            | TransportCause::UnknownHost
            | TransportCause::ConnectionRefused
            | TransportCause::EndOfStream => true,
            TransportCause::Tls { message } | TransportCause::Other { message, .. } => {
                message.contains("Connection reset by peer")
                    || message.contains("Connection timed out")
            }
        }
    }
}

impl fmt::Display for TransportCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportCause::Timeout => f.write_str("timeout"),
            TransportCause::UnknownHost => f.write_str("unknown host"),
            TransportCause::ConnectionRefused => f.write_str("connection refused"),
            TransportCause::EndOfStream => f.write_str("unexpected end of stream"),
            TransportCause::Tls { message } => write!(f, "tls: {message}"),
            TransportCause::Other { type_name, message } => write!(f, "{type_name}: {message}"),
        }
    }
}

/// Errors that can end a synchronization run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    #[error("Remote service error ({status}): {message}")]
    Api { status: ApiStatus, message: String },

    #[error("Invalid remote response: {0}")]
    InvalidResponse(String),

    #[error("Records not found: {}", join_keys(.keys))]
    NotFound { keys: Vec<RemoteKey> },

    #[error("No result found")]
    NoResultFound,

    #[error("Network error: {message}")]
    Network {
        message: String,
        cause: Option<TransportCause>,
    },

    #[error("Integration error ({type_name}): {message}")]
    Integration { type_name: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A failure raised while the host was about to continue into a follow-up
    /// action; the host may offer to continue anyway.
    #[error("{0}")]
    Continuable(Box<SyncError>),

    #[error("{type_name}: {message}")]
    Other { type_name: String, message: String },
}

impl SyncError {
    pub fn api(status: ApiStatus, message: impl Into<String>) -> Self {
        SyncError::Api {
            status,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>, cause: Option<TransportCause>) -> Self {
        SyncError::Network {
            message: message.into(),
            cause,
        }
    }

    pub fn other(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Other {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Wraps this failure as raised on the way into a follow-up action.
    pub fn continuable(self) -> Self {
        SyncError::Continuable(Box::new(self))
    }

    /// Whether the remote reported that the current session can no longer be used.
    pub fn is_session_expiry(&self) -> bool {
        matches!(
            self,
            SyncError::SessionInvalid(_)
                | SyncError::Api {
                    status: ApiStatus::NotAuthorized,
                    ..
                }
        )
    }

    /// Short type name used in diagnostic reports.
    pub fn type_name(&self) -> &str {
        match self {
            SyncError::InvalidCredentials(_) => "InvalidCredentials",
            SyncError::SessionInvalid(_) => "SessionInvalid",
            SyncError::Api { .. } => "Api",
            SyncError::InvalidResponse(_) => "InvalidResponse",
            SyncError::NotFound { .. } => "NotFound",
            SyncError::NoResultFound => "NoResultFound",
            SyncError::Network { .. } => "Network",
            SyncError::Integration { type_name, .. } => type_name,
            SyncError::Storage(_) => "Storage",
            SyncError::OAuth(_) => "OAuth",
            SyncError::Config(_) => "Config",
            SyncError::Continuable(inner) => inner.type_name(),
            SyncError::Other { type_name, .. } => type_name,
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

fn join_keys(keys: &[RemoteKey]) -> String {
    keys.iter()
        .map(RemoteKey::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
