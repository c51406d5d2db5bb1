//! Waypoint Sync Library
//!
//! Incremental synchronization of locally stored waypoint records against a
//! rate-limited remote geocaching API.
//!
//! # Features
//!
//! - Batch synchronization: cancellable fetch/merge/persist loop over record handles
//! - Adaptive batch sizing: keeps every remote call inside a latency band
//! - Reconciliation: remote fields win, local annotations and logs survive
//! - Failure classification: every failure maps to one recovery action
//! - Resumable runs: batch checkpoints let an interrupted run continue
//!
//! # Example
//!
//! ```rust,ignore
//! use waypoint_sync::{ControllerConfig, SyncController};
//!
//! let mut controller = SyncController::new(
//!     remote, local, credentials, QuotaTracker::new(), AccountState::new(),
//!     ControllerConfig::default(),
//! );
//! let outcome = controller.run(&handles, &|n| println!("{n}"), &cancel).await;
//! ```

use std::path::PathBuf;

use clap::Parser;

pub mod classify;
pub mod config;
pub mod controller;
pub mod gateway;
pub mod reconcile;
pub mod sizer;
pub mod store;
pub mod testing;

pub use classify::{
    classify, Category, Classification, ClassifyContext, ErrorHandler, MessageSpec,
    MessageTemplate, RecoveryAction, SideEffect, TitleTemplate,
};
pub use config::SyncSettings;
pub use controller::{
    BatchCheckpoint, ControllerConfig, ControllerState, RunOutcome, RunStats, RunSummary,
    SyncController,
};
pub use gateway::SessionGateway;
pub use sizer::{next_batch_size, SizerConfig};

/// Files a CLI sync run works with.
#[derive(Parser, Clone, Debug)]
pub struct StoreOpts {
    /// JSON-lines file with the local waypoint snapshots
    #[arg(long, env = "WAYPOINT_SYNC_LOCAL")]
    pub local: PathBuf,

    /// JSON-lines export the remote service answers from
    #[arg(long, env = "WAYPOINT_SYNC_REMOTE")]
    pub remote: PathBuf,

    /// TOML file holding the credential and account profile
    #[arg(long, env = "WAYPOINT_SYNC_CREDENTIALS", default_value = "credentials.toml")]
    pub credentials: PathBuf,

    /// Store this token before syncing
    #[arg(long, env = "WAYPOINT_SYNC_TOKEN")]
    pub token: Option<String>,

    /// Items the remote serves per quota window
    #[arg(long)]
    pub item_quota: Option<u32>,

    /// Length of the quota window in minutes
    #[arg(long, default_value = "1440")]
    pub quota_period_minutes: u32,
}

/// Overrides for values from the settings file.
#[derive(Parser, Clone, Debug, Default)]
pub struct TuningOpts {
    /// Settings file (TOML)
    #[arg(long, env = "WAYPOINT_SYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logs fetched per record
    #[arg(long)]
    pub log_depth: Option<u32>,

    /// Batch size of the first request
    #[arg(long)]
    pub initial_batch_size: Option<usize>,

    /// Directory for run checkpoints
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,
}

impl TuningOpts {
    /// Loads the settings file (or defaults) and applies the overrides.
    pub fn settings(&self) -> anyhow::Result<SyncSettings> {
        let mut settings = match &self.config {
            Some(path) => SyncSettings::from_file(path)?,
            None => SyncSettings::default(),
        };
        if let Some(log_depth) = self.log_depth {
            settings.log_depth = log_depth;
        }
        if let Some(size) = self.initial_batch_size {
            settings.initial_batch_size = size;
        }
        if let Some(dir) = &self.checkpoint_dir {
            settings.checkpoint_dir = Some(dir.clone());
        }
        settings.validate()?;
        Ok(settings)
    }
}
