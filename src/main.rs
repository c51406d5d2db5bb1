//! Command-line interface for waypoint-sync
//!
//! # Usage Examples
//!
//! ## Sync
//! ```bash
//! # Refresh every waypoint in a local store from a remote export
//! waypoint-sync sync \
//!   --local waypoints.jsonl \
//!   --remote export.jsonl \
//!   --credentials credentials.toml \
//!   --token "$WAYPOINT_SYNC_TOKEN"
//!
//! # Keep checkpoints and resume an interrupted run
//! waypoint-sync sync --local waypoints.jsonl --remote export.jsonl \
//!   --checkpoint-dir .waypoint-sync/checkpoints --resume
//! ```
//!
//! ## Classify
//! ```bash
//! # Show how a failure kind is handled
//! waypoint-sync classify item-quota --premium
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use checkpoint::{Checkpoint, CheckpointManager, CheckpointStorage};
use clap::{Parser, Subcommand};
use sync_core::{AccountState, QuotaTracker, QuotaSnapshot};
use tokio_util::sync::CancellationToken;
use waypoint_sync::classify::{classify, sample_error, ClassifyContext, ErrorHandler};
use waypoint_sync::store::{FileCredentialStore, JsonlLocalStore, MirrorRemote};
use waypoint_sync::{BatchCheckpoint, RunOutcome, StoreOpts, SyncController, TuningOpts};

#[derive(Parser)]
#[command(name = "waypoint-sync")]
#[command(about = "Incrementally refresh local waypoints from a rate-limited remote API")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize every local record that carries a remote key
    Sync {
        #[command(flatten)]
        stores: StoreOpts,

        #[command(flatten)]
        tuning: TuningOpts,

        /// Continue from the last checkpoint of this store
        #[arg(long)]
        resume: bool,
    },

    /// Print how a failure kind is classified
    Classify {
        /// Failure kind, e.g. session-invalid, item-quota, network-unexpected
        kind: String,

        /// Classify as a premium member
        #[arg(long)]
        premium: bool,

        /// Treat the failure as raised before a follow-up action
        #[arg(long)]
        continuable: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync {
            stores,
            tuning,
            resume,
        } => run_sync(stores, tuning, resume).await,
        Commands::Classify {
            kind,
            premium,
            continuable,
        } => {
            let mut err = sample_error(&kind);
            if continuable {
                err = err.continuable();
            }
            let ctx = ClassifyContext {
                quota: Some(QuotaSnapshot {
                    current: 6,
                    limit: 6,
                    period_minutes: 1440,
                    renews_at: chrono::Utc::now(),
                }),
                premium: Some(premium),
            };
            let classification = classify(&err, &ctx);
            println!("{}", serde_json::to_string_pretty(&classification)?);
            Ok(())
        }
    }
}

async fn run_sync(stores: StoreOpts, tuning: TuningOpts, resume: bool) -> anyhow::Result<()> {
    let settings = tuning.settings()?;

    let local = Arc::new(
        JsonlLocalStore::open(&stores.local)
            .with_context(|| format!("Failed to open local store {:?}", stores.local))?,
    );
    let mut remote = MirrorRemote::from_file(&stores.remote)
        .with_context(|| format!("Failed to load remote export {:?}", stores.remote))?;
    if let Some(limit) = stores.item_quota {
        remote = remote.with_item_quota(limit, stores.quota_period_minutes);
    }
    let remote = Arc::new(remote);

    let credentials = Arc::new(
        FileCredentialStore::open(&stores.credentials)
            .with_context(|| format!("Failed to open credentials {:?}", stores.credentials))?,
    );
    if let Some(token) = &stores.token {
        credentials.save_token(token.as_str())?;
    }

    let quota = QuotaTracker::new();
    let account = AccountState::new();

    let storage = CheckpointStorage::from_dir(settings.checkpoint_dir.clone());
    let checkpoints =
        CheckpointManager::<BatchCheckpoint>::new(storage.build_store(), store_scope(&stores.local));

    let start = if resume {
        if !storage.is_enabled() {
            anyhow::bail!("--resume requires a checkpoint directory");
        }
        let checkpoint = checkpoints.load().await?;
        match &checkpoint {
            Some(cp) => tracing::info!("Found checkpoint {}", cp.to_cli_string()),
            None => tracing::info!("No checkpoint found, starting from the beginning"),
        }
        checkpoint
    } else {
        None
    };

    let mut controller = SyncController::new(
        Arc::clone(&remote),
        Arc::clone(&local),
        Arc::clone(&credentials),
        quota.clone(),
        account.clone(),
        settings.controller_config(),
    );
    if storage.is_enabled() {
        controller = controller.with_checkpoints(checkpoints);
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current batch");
            signal_token.cancel();
        }
    });

    let handles = local.handles();
    let total = handles.len();
    let progress = move |current: usize| tracing::info!("Progress: {current}/{total}");

    let summary = controller
        .run_from(&handles, start, &progress, &cancel)
        .await;

    local
        .compact()
        .await
        .with_context(|| format!("Failed to compact local store {:?}", stores.local))?;

    if let Some(snapshot) = quota.snapshot() {
        tracing::info!(
            "Quota: {}/{} items, renews at {}",
            snapshot.current,
            snapshot.limit,
            snapshot.renews_at
        );
    }

    match summary.outcome {
        RunOutcome::Completed { did_work } => {
            println!(
                "Completed: {} records merged in {} fetches ({:?}){}",
                summary.stats.records_merged,
                summary.stats.fetch_calls,
                summary.stats.elapsed,
                if did_work { "" } else { ", nothing to sync" }
            );
            Ok(())
        }
        RunOutcome::Cancelled => {
            println!(
                "Cancelled after {} records merged",
                summary.stats.records_merged
            );
            Ok(())
        }
        RunOutcome::Failed(err) => {
            let handler = ErrorHandler::new(credentials, account, quota)
                .credential_already_removed(summary.stats.credential_removed);
            let classification = handler.handle(&err).await;
            eprintln!("{}", serde_json::to_string_pretty(&classification)?);
            Err(anyhow::Error::new(err).context(format!(
                "Sync failed ({:?}, {:?})",
                classification.category, classification.action
            )))
        }
    }
}

/// Checkpoint scope for a local store file.
fn store_scope(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "waypoints".to_string())
}
