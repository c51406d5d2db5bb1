//! In-memory collaborators for controller and classifier tests.
//!
//! Every collaborator records how it was called so tests can assert on the
//! exact sequence of fetches, persists and progress updates.

pub mod credentials;
pub mod fixtures;
pub mod local;
pub mod progress;
pub mod remote;

pub use credentials::MemoryCredentialStore;
pub use fixtures::{eligible_snapshots, handles_of, key, remote_records_for};
pub use local::MemoryLocalStore;
pub use progress::RecordingProgress;
pub use remote::MockRemote;
