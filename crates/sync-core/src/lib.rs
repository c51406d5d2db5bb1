//! Core types for waypoint-sync.
//!
//! This crate provides the foundational pieces shared by the synchronization
//! controller, its collaborators and the error classifier:
//!
//! - [`types`] - record handles, snapshots, remote records and merge results
//! - [`error`] - the closed [`SyncError`] failure taxonomy
//! - [`traits`] - collaborator interfaces (credentials, remote, local store, progress)
//! - [`state`] - process-wide quota and account state handles
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── checkpoint       (run checkpoints for resumable syncs)
//!    │
//!    └─── waypoint-sync    (gateway, sizer, reconciliation, controller, classifier)
//! ```

pub mod error;
pub mod state;
pub mod traits;
pub mod types;

// Re-exports for convenience
pub use error::{ApiStatus, PremiumFilter, Result, SyncError, TransportCause};
pub use state::{AccountState, QuotaTracker};
pub use traits::{CredentialStore, LocalStore, ProgressSink, RemoteDataService, SilentProgress};
pub use types::{
    AccountProfile, Credential, FetchResponse, Fields, LocalSnapshot, MergedRecord, QuotaSnapshot,
    RecordHandle, RecordLog, RemoteKey, RemoteRecord, Session,
};
