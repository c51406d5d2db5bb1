//! Batch synchronization controller.
//!
//! Drives the fetch/merge/persist loop over an ordered list of record handles:
//!
//! 1. slice the handles at the cursor using the current batch size
//! 2. resolve each handle to its local snapshot, skipping ineligible ones
//! 3. fetch the eligible keys in one remote call and time it
//! 4. merge with the local snapshots and persist every merged record
//! 5. advance the cursor by the raw slice length and adapt the batch size
//!
//! A run is cancellable between slices and can be resumed from a
//! [`BatchCheckpoint`] when a checkpoint store is configured.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use checkpoint::{Checkpoint, CheckpointManager};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use sync_core::{
    AccountState, CredentialStore, LocalSnapshot, LocalStore, ProgressSink, QuotaTracker,
    RecordHandle, RemoteDataService, RemoteKey, Result, SyncError,
};

use crate::gateway::SessionGateway;
use crate::reconcile;
use crate::sizer::{SizerConfig, INITIAL_BATCH};

/// Default number of logs fetched per record.
pub const DEFAULT_LOG_DEPTH: u32 = 5;

/// Tuning of a controller's runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Batch size of the first slice, clamped into the sizer bounds.
    pub initial_batch_size: usize,
    /// Maximum number of logs requested per record.
    pub log_depth: u32,
    pub sizer: SizerConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: INITIAL_BATCH,
            log_depth: DEFAULT_LOG_DEPTH,
            sizer: SizerConfig::default(),
        }
    }
}

/// Lifecycle of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every handle was processed. `did_work` is false when no remote call was made.
    Completed { did_work: bool },
    Cancelled,
    Failed(SyncError),
}

impl RunOutcome {
    pub fn state(&self) -> ControllerState {
        match self {
            RunOutcome::Completed { .. } => ControllerState::Completed,
            RunOutcome::Cancelled => ControllerState::Cancelled,
            RunOutcome::Failed(_) => ControllerState::Failed,
        }
    }
}

/// Counters collected over one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub fetch_calls: usize,
    pub records_merged: usize,
    /// Remote records without a matching local snapshot.
    pub records_dropped: usize,
    /// Handles without a snapshot or without a remote key.
    pub handles_skipped: usize,
    pub final_batch_size: usize,
    pub elapsed: Duration,
    /// The run removed the stored credential after its session expired.
    pub credential_removed: bool,
}

#[derive(Debug)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub stats: RunStats,
}

/// Resume point of an interrupted run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCheckpoint {
    /// Number of handles already processed.
    pub cursor: usize,
    /// Batch size to continue with.
    pub batch_size: usize,
    /// Length of the handle list the checkpoint was taken for.
    pub total: usize,
}

impl Checkpoint for BatchCheckpoint {
    const KIND: &'static str = "batch";

    fn to_cli_string(&self) -> String {
        format!("{}:{}:{}", self.cursor, self.batch_size, self.total)
    }

    fn from_cli_string(s: &str) -> anyhow::Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            anyhow::bail!("Invalid batch checkpoint '{s}': expected 'cursor:batch_size:total'");
        }
        Ok(Self {
            cursor: parts[0].parse().context("Invalid cursor")?,
            batch_size: parts[1].parse().context("Invalid batch size")?,
            total: parts[2].parse().context("Invalid total")?,
        })
    }
}

/// Runs batch synchronizations against one remote service and local store.
///
/// Runs take `&mut self`, so a controller never executes two runs at once.
pub struct SyncController<R, L, C> {
    gateway: SessionGateway<R, C>,
    remote: Arc<R>,
    local: Arc<L>,
    credentials: Arc<C>,
    quota: QuotaTracker,
    config: ControllerConfig,
    checkpoints: Option<CheckpointManager<BatchCheckpoint>>,
    state: ControllerState,
}

impl<R, L, C> SyncController<R, L, C>
where
    R: RemoteDataService,
    L: LocalStore,
    C: CredentialStore,
{
    pub fn new(
        remote: Arc<R>,
        local: Arc<L>,
        credentials: Arc<C>,
        quota: QuotaTracker,
        account: AccountState,
        config: ControllerConfig,
    ) -> Self {
        Self {
            gateway: SessionGateway::new(Arc::clone(&remote), Arc::clone(&credentials), account),
            remote,
            local,
            credentials,
            quota,
            config,
            checkpoints: None,
            state: ControllerState::Idle,
        }
    }

    /// Stores a [`BatchCheckpoint`] after every processed slice.
    pub fn with_checkpoints(mut self, checkpoints: CheckpointManager<BatchCheckpoint>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn quota(&self) -> &QuotaTracker {
        &self.quota
    }

    pub async fn run(
        &mut self,
        handles: &[RecordHandle],
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        self.run_detailed(handles, progress, cancel).await.outcome
    }

    pub async fn run_detailed(
        &mut self,
        handles: &[RecordHandle],
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> RunSummary {
        self.run_from(handles, None, progress, cancel).await
    }

    /// Runs over `handles`, starting at `resume` when given.
    pub async fn run_from(
        &mut self,
        handles: &[RecordHandle],
        resume: Option<BatchCheckpoint>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> RunSummary {
        let started = Instant::now();
        self.state = ControllerState::Running;

        let mut stats = RunStats::default();
        let outcome = match self.start_position(handles.len(), resume) {
            Ok((cursor, batch_size)) => {
                self.execute(handles, cursor, batch_size, progress, cancel, &mut stats)
                    .await
            }
            Err(e) => RunOutcome::Failed(e),
        };

        stats.elapsed = started.elapsed();
        self.state = outcome.state();

        match &outcome {
            RunOutcome::Completed { did_work } => info!(
                "Sync completed: {} fetches, {} records merged, {} handles skipped (did work: {})",
                stats.fetch_calls, stats.records_merged, stats.handles_skipped, did_work
            ),
            RunOutcome::Cancelled => info!(
                "Sync cancelled after {} fetches, {} records merged",
                stats.fetch_calls, stats.records_merged
            ),
            RunOutcome::Failed(e) => error!("Sync failed: {e}"),
        }

        RunSummary { outcome, stats }
    }

    fn start_position(
        &self,
        total: usize,
        resume: Option<BatchCheckpoint>,
    ) -> Result<(usize, usize)> {
        let sizer = &self.config.sizer;
        match resume {
            None => Ok((0, sizer.clamp(self.config.initial_batch_size))),
            Some(checkpoint) => {
                if checkpoint.total != total || checkpoint.cursor > total {
                    return Err(SyncError::Config(format!(
                        "checkpoint {} does not match {} handles",
                        checkpoint.to_cli_string(),
                        total
                    )));
                }
                info!("Resuming sync from {}", checkpoint.to_cli_string());
                Ok((checkpoint.cursor, sizer.clamp(checkpoint.batch_size)))
            }
        }
    }

    async fn execute(
        &self,
        handles: &[RecordHandle],
        mut cursor: usize,
        mut batch_size: usize,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
        stats: &mut RunStats,
    ) -> RunOutcome {
        let total = handles.len();
        stats.final_batch_size = batch_size;
        progress.publish(cursor);

        info!("Starting sync of {total} records at {cursor} with batch size {batch_size}");

        let session = match self.gateway.open().await {
            Ok(session) => session,
            Err(e) => return RunOutcome::Failed(e),
        };

        while cursor < total {
            if cancel.is_cancelled() {
                return RunOutcome::Cancelled;
            }

            let end = (cursor + batch_size).min(total);
            let slice = &handles[cursor..end];

            let snapshots = match self.resolve_eligible(slice, stats).await {
                Ok(snapshots) => snapshots,
                Err(e) => return RunOutcome::Failed(e),
            };

            if snapshots.is_empty() {
                debug!("No eligible records in [{cursor}, {end}), skipping fetch");
                cursor = end;
                progress.publish(cursor);
                self.save_checkpoint(cursor, batch_size, total).await;
                continue;
            }

            let keys: Vec<RemoteKey> = snapshots
                .iter()
                .filter_map(|snapshot| snapshot.remote_key.clone())
                .collect();

            let request_started = Instant::now();
            let fetched = self
                .remote
                .fetch_by_keys(&session, &keys, self.config.log_depth)
                .await;
            let elapsed = request_started.elapsed();
            stats.fetch_calls += 1;

            let response = match fetched {
                Ok(response) => response,
                Err(e) if e.is_session_expiry() => {
                    warn!("Session expired, removing stored credential");
                    match self.credentials.remove_credential().await {
                        Ok(()) => stats.credential_removed = true,
                        Err(remove_err) => error!("Failed to remove credential: {remove_err}"),
                    }
                    session.invalidate();
                    return RunOutcome::Failed(e);
                }
                Err(e) => return RunOutcome::Failed(e),
            };

            if let Some(quota) = response.quota {
                self.quota.update(quota);
            }

            let returned = response.records.len();
            if returned == 0 {
                warn!("Remote returned no records for {} keys", keys.len());
            }

            let merged = match reconcile::merge(response.records, &snapshots) {
                Ok(merged) => merged,
                Err(e) => return RunOutcome::Failed(e),
            };
            stats.records_dropped += returned - merged.len();

            for record in &merged {
                if let Err(e) = self.local.persist(record).await {
                    return RunOutcome::Failed(e);
                }
            }
            stats.records_merged += merged.len();

            if cancel.is_cancelled() {
                return RunOutcome::Cancelled;
            }

            cursor = end;
            progress.publish(cursor);

            batch_size = self.config.sizer.next(batch_size, elapsed);
            stats.final_batch_size = batch_size;

            debug!(
                "Synced {} of {} keys in {:?}, cursor {}/{}, next batch size {}",
                merged.len(),
                keys.len(),
                elapsed,
                cursor,
                total,
                batch_size
            );

            self.save_checkpoint(cursor, batch_size, total).await;
        }

        progress.publish(cursor);
        self.clear_checkpoint().await;

        RunOutcome::Completed {
            did_work: stats.fetch_calls > 0,
        }
    }

    /// Resolves `slice` to the snapshots that carry a remote key.
    async fn resolve_eligible(
        &self,
        slice: &[RecordHandle],
        stats: &mut RunStats,
    ) -> Result<Vec<LocalSnapshot>> {
        let mut eligible = Vec::with_capacity(slice.len());
        for &handle in slice {
            match self.local.resolve(handle).await? {
                Some(snapshot) if snapshot.is_eligible() => eligible.push(snapshot),
                Some(_) => {
                    warn!("Skipping {handle}: no remote key");
                    stats.handles_skipped += 1;
                }
                None => {
                    warn!("Skipping {handle}: no local snapshot");
                    stats.handles_skipped += 1;
                }
            }
        }
        Ok(eligible)
    }

    async fn save_checkpoint(&self, cursor: usize, batch_size: usize, total: usize) {
        let Some(checkpoints) = &self.checkpoints else {
            return;
        };
        let checkpoint = BatchCheckpoint {
            cursor,
            batch_size,
            total,
        };
        if let Err(e) = checkpoints.save(&checkpoint).await {
            warn!("Failed to save checkpoint {}: {e:#}", checkpoint.to_cli_string());
        }
    }

    async fn clear_checkpoint(&self) {
        if let Some(checkpoints) = &self.checkpoints {
            if let Err(e) = checkpoints.clear().await {
                warn!("Failed to clear checkpoint: {e:#}");
            }
        }
    }
}
