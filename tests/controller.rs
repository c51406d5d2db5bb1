//! Controller behaviour against in-memory collaborators.
//!
//! Fetch latency is simulated on a paused tokio clock, so elapsed times seen by
//! the batch sizer are exact.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use sync_core::{
    AccountProfile, AccountState, ApiStatus, Credential, LocalSnapshot, QuotaSnapshot,
    QuotaTracker, RecordHandle, RemoteRecord, SyncError,
};
use tokio_util::sync::CancellationToken;
use waypoint_sync::testing::{
    eligible_snapshots, handles_of, key, remote_records_for, MemoryCredentialStore,
    MemoryLocalStore, MockRemote, RecordingProgress,
};
use waypoint_sync::{ControllerConfig, ControllerState, ErrorHandler, RunOutcome, SyncController};

type Controller = SyncController<MockRemote, MemoryLocalStore, MemoryCredentialStore>;

const IN_BAND: Duration = Duration::from_millis(2_000);

fn credentials() -> Arc<MemoryCredentialStore> {
    Arc::new(MemoryCredentialStore::with_credential(Credential::new(
        "token",
    )))
}

fn controller(
    remote: &Arc<MockRemote>,
    local: &Arc<MemoryLocalStore>,
    credentials: &Arc<MemoryCredentialStore>,
) -> Controller {
    SyncController::new(
        Arc::clone(remote),
        Arc::clone(local),
        Arc::clone(credentials),
        QuotaTracker::new(),
        AccountState::new(),
        ControllerConfig::default(),
    )
}

struct Fixture {
    remote: Arc<MockRemote>,
    local: Arc<MemoryLocalStore>,
    credentials: Arc<MemoryCredentialStore>,
    handles: Vec<RecordHandle>,
}

fn eligible_fixture(count: usize, delay: Duration) -> Fixture {
    let snapshots = eligible_snapshots(count);
    Fixture {
        remote: Arc::new(MockRemote::with_records(remote_records_for(&snapshots)).with_delay(delay)),
        local: Arc::new(MemoryLocalStore::with_snapshots(snapshots.clone())),
        credentials: credentials(),
        handles: handles_of(&snapshots),
    }
}

impl Fixture {
    fn controller(&self) -> Controller {
        controller(&self.remote, &self.local, &self.credentials)
    }
}

fn assert_monotonic(updates: &[usize], total: usize) {
    assert!(
        updates.windows(2).all(|pair| pair[0] <= pair[1]),
        "progress went backwards: {updates:?}"
    );
    assert!(updates.iter().all(|&current| current <= total));
}

#[tokio::test(start_paused = true)]
async fn test_full_run_with_steady_latency() {
    let fixture = eligible_fixture(250, IN_BAND);
    let mut controller = fixture.controller();
    let progress = RecordingProgress::new();
    let cancel = CancellationToken::new();

    assert_eq!(controller.state(), ControllerState::Idle);
    let summary = controller
        .run_detailed(&fixture.handles, &progress, &cancel)
        .await;

    assert!(matches!(
        summary.outcome,
        RunOutcome::Completed { did_work: true }
    ));
    assert_eq!(controller.state(), ControllerState::Completed);

    let calls = fixture.remote.calls();
    assert_eq!(calls.len(), 25);
    assert!(calls.iter().all(|keys| keys.len() == 10));
    assert_eq!(calls[0][0], key("GC1"));
    assert_eq!(calls[24][9], key("GC250"));

    let updates = progress.updates();
    assert_eq!(updates.first(), Some(&0));
    assert_eq!(updates.last(), Some(&250));
    assert_monotonic(&updates, 250);

    assert_eq!(summary.stats.fetch_calls, 25);
    assert_eq!(summary.stats.records_merged, 250);
    assert_eq!(summary.stats.final_batch_size, 10);
    assert_eq!(fixture.local.persisted().len(), 250);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_freezes_progress() {
    let fixture = eligible_fixture(250, IN_BAND);
    let mut controller = fixture.controller();
    let cancel = CancellationToken::new();
    let progress = RecordingProgress::cancel_after(3, cancel.clone());

    let outcome = controller.run(&fixture.handles, &progress, &cancel).await;

    assert!(matches!(outcome, RunOutcome::Cancelled));
    assert_eq!(controller.state(), ControllerState::Cancelled);
    assert_eq!(progress.updates(), vec![0, 10, 20]);
    assert_eq!(fixture.remote.fetch_count(), 2);
    assert_eq!(fixture.local.persisted().len(), 20);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_start_makes_no_fetch() {
    let fixture = eligible_fixture(30, IN_BAND);
    let mut controller = fixture.controller();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let progress = RecordingProgress::new();

    let outcome = controller.run(&fixture.handles, &progress, &cancel).await;

    assert!(matches!(outcome, RunOutcome::Cancelled));
    assert_eq!(progress.updates(), vec![0]);
    assert_eq!(fixture.remote.fetch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_session_expiry_removes_credential() {
    for err in [
        SyncError::SessionInvalid("expired".into()),
        SyncError::api(ApiStatus::NotAuthorized, "not authorized"),
    ] {
        let fixture = eligible_fixture(50, IN_BAND);
        fixture.remote.fail_fetch(2, err);
        let mut controller = fixture.controller();
        let progress = RecordingProgress::new();

        let summary = controller
            .run_detailed(&fixture.handles, &progress, &CancellationToken::new())
            .await;

        let err = match summary.outcome {
            RunOutcome::Failed(err) => err,
            other => panic!("expected failure, got {other:?}"),
        };
        assert!(err.is_session_expiry());
        assert!(summary.stats.credential_removed);
        assert_eq!(controller.state(), ControllerState::Failed);
        assert!(fixture.credentials.current().is_none());
        assert_eq!(fixture.credentials.removals(), 1);
        assert_eq!(fixture.remote.fetch_count(), 2);
        assert_eq!(fixture.remote.sessions_opened(), 1);
        assert_eq!(progress.updates(), vec![0, 10]);

        // Handling the failure afterwards does not remove the credential again
        let handler = ErrorHandler::new(
            Arc::clone(&fixture.credentials),
            AccountState::new(),
            QuotaTracker::new(),
        )
        .credential_already_removed(summary.stats.credential_removed);
        handler.handle(&err).await;
        assert_eq!(fixture.credentials.removals(), 1);
    }
}

#[tokio::test]
async fn test_missing_credential_fails_before_any_fetch() {
    let snapshots = eligible_snapshots(5);
    let remote = Arc::new(MockRemote::with_records(remote_records_for(&snapshots)));
    let local = Arc::new(MemoryLocalStore::with_snapshots(snapshots.clone()));
    let credentials = Arc::new(MemoryCredentialStore::default());
    let mut controller = controller(&remote, &local, &credentials);
    let progress = RecordingProgress::new();

    let outcome = controller
        .run(&handles_of(&snapshots), &progress, &CancellationToken::new())
        .await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed(SyncError::InvalidCredentials(_))
    ));
    assert_eq!(credentials.removals(), 1);
    assert_eq!(remote.sessions_opened(), 0);
    assert_eq!(remote.fetch_count(), 0);
    assert_eq!(progress.updates(), vec![0]);
}

#[tokio::test]
async fn test_missing_credential_reported_even_when_removal_fails() {
    let snapshots = eligible_snapshots(5);
    let remote = Arc::new(MockRemote::with_records(remote_records_for(&snapshots)));
    let local = Arc::new(MemoryLocalStore::with_snapshots(snapshots.clone()));
    let credentials = Arc::new(MemoryCredentialStore::default());
    credentials.fail_removal(SyncError::Storage("read-only".into()));
    let mut controller = controller(&remote, &local, &credentials);

    let outcome = controller
        .run(
            &handles_of(&snapshots),
            &RecordingProgress::new(),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed(SyncError::InvalidCredentials(_))
    ));
    assert_eq!(credentials.removals(), 1);
    assert_eq!(remote.fetch_count(), 0);
}

#[tokio::test]
async fn test_rejected_credential_is_not_retried() {
    let fixture = eligible_fixture(5, Duration::ZERO);
    fixture
        .remote
        .fail_open(SyncError::InvalidCredentials("rejected".into()));
    let mut controller = fixture.controller();

    let outcome = controller
        .run(
            &fixture.handles,
            &RecordingProgress::new(),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed(SyncError::InvalidCredentials(_))
    ));
    assert_eq!(fixture.remote.fetch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ineligible_slice_makes_no_fetch_and_keeps_batch_size() {
    // Handles 1..=10 have no key, 11..=20 are eligible, 99 has no snapshot
    let eligible: Vec<LocalSnapshot> = eligible_snapshots(20).into_iter().skip(10).collect();
    let unkeyed: Vec<LocalSnapshot> = (1..=10)
        .map(|id| LocalSnapshot::new(RecordHandle(id), None))
        .collect();

    let remote = Arc::new(MockRemote::with_records(remote_records_for(&eligible)));
    let local = Arc::new(MemoryLocalStore::with_snapshots(
        unkeyed.into_iter().chain(eligible.clone()),
    ));
    let credentials = credentials();
    let mut controller = controller(&remote, &local, &credentials);

    let mut handles: Vec<RecordHandle> = (1..=20).map(RecordHandle).collect();
    handles.push(RecordHandle(99));
    let progress = RecordingProgress::new();

    let summary = controller
        .run_detailed(&handles, &progress, &CancellationToken::new())
        .await;

    assert!(matches!(
        summary.outcome,
        RunOutcome::Completed { did_work: true }
    ));
    // Only the eligible slice was fetched; the fast fetch grew 10 -> 15
    assert_eq!(remote.calls(), vec![handles_keys(11..=20)]);
    assert_eq!(summary.stats.final_batch_size, 15);
    assert_eq!(summary.stats.handles_skipped, 11);
    assert_eq!(progress.updates(), vec![0, 10, 20, 21, 21]);
}

fn handles_keys(ids: std::ops::RangeInclusive<i64>) -> Vec<sync_core::RemoteKey> {
    ids.map(|id| key(&format!("GC{id}"))).collect()
}

#[tokio::test(start_paused = true)]
async fn test_request_size_is_eligible_count() {
    let mut snapshots = eligible_snapshots(10);
    for snapshot in snapshots.iter_mut().take(3) {
        snapshot.remote_key = None;
    }
    let remote = Arc::new(
        MockRemote::with_records(remote_records_for(&snapshots)).with_delay(IN_BAND),
    );
    let local = Arc::new(MemoryLocalStore::with_snapshots(snapshots.clone()));
    let credentials = credentials();
    let mut controller = controller(&remote, &local, &credentials);
    let progress = RecordingProgress::new();

    let outcome = controller
        .run(&handles_of(&snapshots), &progress, &CancellationToken::new())
        .await;

    assert!(matches!(outcome, RunOutcome::Completed { did_work: true }));
    assert_eq!(remote.calls(), vec![handles_keys(4..=10)]);
    assert_eq!(progress.last(), Some(10));
}

#[tokio::test]
async fn test_nothing_eligible_means_no_work() {
    let snapshots: Vec<LocalSnapshot> = (1..=25)
        .map(|id| LocalSnapshot::new(RecordHandle(id), None))
        .collect();
    let remote = Arc::new(MockRemote::default());
    let local = Arc::new(MemoryLocalStore::with_snapshots(snapshots.clone()));
    let credentials = credentials();
    let mut controller = controller(&remote, &local, &credentials);
    let progress = RecordingProgress::new();

    let outcome = controller
        .run(&handles_of(&snapshots), &progress, &CancellationToken::new())
        .await;

    assert!(matches!(
        outcome,
        RunOutcome::Completed { did_work: false }
    ));
    assert_eq!(remote.fetch_count(), 0);
    assert_eq!(progress.updates(), vec![0, 10, 20, 25, 25]);
}

#[tokio::test]
async fn test_empty_handle_list_publishes_first_and_last_update() {
    let fixture = eligible_fixture(0, Duration::ZERO);
    let mut controller = fixture.controller();
    let progress = RecordingProgress::new();

    let outcome = controller
        .run(&[], &progress, &CancellationToken::new())
        .await;

    assert!(matches!(
        outcome,
        RunOutcome::Completed { did_work: false }
    ));
    assert_eq!(progress.updates(), vec![0, 0]);
}

#[tokio::test(start_paused = true)]
async fn test_fast_fetches_grow_batches() {
    let fixture = eligible_fixture(100, Duration::from_millis(100));
    let mut controller = fixture.controller();
    let progress = RecordingProgress::new();

    controller
        .run(&fixture.handles, &progress, &CancellationToken::new())
        .await;

    let sizes: Vec<usize> = fixture.remote.calls().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![10, 15, 20, 25, 30]);
    assert_eq!(progress.updates(), vec![0, 10, 25, 45, 70, 100, 100]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_fetches_shrink_batches_to_minimum() {
    let fixture = eligible_fixture(40, Duration::from_millis(5_000));
    let mut controller = fixture.controller();

    let summary = controller
        .run_detailed(
            &fixture.handles,
            &RecordingProgress::new(),
            &CancellationToken::new(),
        )
        .await;

    let sizes: Vec<usize> = fixture.remote.calls().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![10, 5, 5, 5, 5, 5, 5]);
    assert_eq!(summary.stats.final_batch_size, 5);
}

#[tokio::test]
async fn test_initial_batch_size_is_clamped() {
    let fixture = eligible_fixture(8, Duration::ZERO);
    let mut controller = SyncController::new(
        Arc::clone(&fixture.remote),
        Arc::clone(&fixture.local),
        Arc::clone(&fixture.credentials),
        QuotaTracker::new(),
        AccountState::new(),
        ControllerConfig {
            initial_batch_size: 1,
            ..ControllerConfig::default()
        },
    );

    controller
        .run(
            &fixture.handles,
            &RecordingProgress::new(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(fixture.remote.calls()[0].len(), 5);
}

#[tokio::test]
async fn test_persistence_failure_fails_run() {
    let fixture = eligible_fixture(30, Duration::ZERO);
    fixture.local.fail_persist_for(RecordHandle(5));
    let mut controller = fixture.controller();
    let progress = RecordingProgress::new();

    let outcome = controller
        .run(&fixture.handles, &progress, &CancellationToken::new())
        .await;

    assert!(matches!(outcome, RunOutcome::Failed(SyncError::Storage(_))));
    assert_eq!(fixture.remote.fetch_count(), 1);
    assert_eq!(progress.updates(), vec![0]);
    assert_eq!(fixture.local.persisted().len(), 4);
}

#[tokio::test]
async fn test_other_fetch_failures_are_not_retried() {
    let fixture = eligible_fixture(30, Duration::ZERO);
    fixture.remote.fail_fetch(
        1,
        SyncError::api(ApiStatus::CallQuotaExceeded, "too many calls"),
    );
    let mut controller = fixture.controller();

    let outcome = controller
        .run(
            &fixture.handles,
            &RecordingProgress::new(),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed(SyncError::Api {
            status: ApiStatus::CallQuotaExceeded,
            ..
        })
    ));
    assert_eq!(fixture.remote.fetch_count(), 1);
    // Only session failures touch the credential
    assert!(fixture.credentials.current().is_some());
}

#[tokio::test]
async fn test_reordered_and_unmatched_records_are_merged_by_key() {
    let snapshots = eligible_snapshots(10);
    let remote = Arc::new(
        MockRemote::with_records(remote_records_for(&snapshots))
            .reversed()
            .with_extra_record(RemoteRecord::new(key("GC999"))),
    );
    let local = Arc::new(MemoryLocalStore::with_snapshots(snapshots.clone()));
    let credentials = credentials();
    let mut controller = controller(&remote, &local, &credentials);

    let summary = controller
        .run_detailed(
            &handles_of(&snapshots),
            &RecordingProgress::new(),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(
        summary.outcome,
        RunOutcome::Completed { did_work: true }
    ));
    assert_eq!(summary.stats.records_merged, 10);
    assert_eq!(summary.stats.records_dropped, 1);

    let persisted = local.persisted();
    assert_eq!(persisted[0].handle, RecordHandle(10));
    let merged = local.snapshot(RecordHandle(3)).unwrap();
    assert_eq!(merged.fields["name"], "Remote GC3");
    assert_eq!(merged.fields["user_note"], "note 3");
}

#[tokio::test]
async fn test_keyless_remote_record_fails_run() {
    let snapshots = eligible_snapshots(5);
    let remote = Arc::new(
        MockRemote::with_records(remote_records_for(&snapshots)).with_extra_record(RemoteRecord {
            key: None,
            fields: Default::default(),
            logs: Vec::new(),
        }),
    );
    let local = Arc::new(MemoryLocalStore::with_snapshots(snapshots.clone()));
    let credentials = credentials();
    let mut controller = controller(&remote, &local, &credentials);

    let outcome = controller
        .run(
            &handles_of(&snapshots),
            &RecordingProgress::new(),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed(SyncError::InvalidResponse(_))
    ));
    assert!(local.persisted().is_empty());
}

#[tokio::test]
async fn test_empty_response_still_advances() {
    let snapshots = eligible_snapshots(12);
    let remote = Arc::new(MockRemote::default());
    let local = Arc::new(MemoryLocalStore::with_snapshots(snapshots.clone()));
    let credentials = credentials();
    let mut controller = controller(&remote, &local, &credentials);
    let progress = RecordingProgress::new();

    let outcome = controller
        .run(&handles_of(&snapshots), &progress, &CancellationToken::new())
        .await;

    assert!(matches!(outcome, RunOutcome::Completed { did_work: true }));
    assert_eq!(remote.fetch_count(), 2);
    assert_eq!(progress.last(), Some(12));
}

#[tokio::test]
async fn test_quota_and_log_depth() {
    let quota = QuotaSnapshot {
        current: 20,
        limit: 6_000,
        period_minutes: 1_440,
        renews_at: Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap(),
    };
    let snapshots = eligible_snapshots(20);
    let remote = Arc::new(MockRemote::with_records(remote_records_for(&snapshots)).with_quota(quota));
    let local = Arc::new(MemoryLocalStore::with_snapshots(snapshots.clone()));
    let credentials = credentials();
    let tracker = QuotaTracker::new();
    let mut controller = SyncController::new(
        Arc::clone(&remote),
        Arc::clone(&local),
        Arc::clone(&credentials),
        tracker.clone(),
        AccountState::new(),
        ControllerConfig {
            log_depth: 12,
            ..ControllerConfig::default()
        },
    );

    controller
        .run(
            &handles_of(&snapshots),
            &RecordingProgress::new(),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(tracker.snapshot(), Some(quota));
    assert_eq!(controller.quota().snapshot(), Some(quota));
    assert!(remote.log_depths().iter().all(|&depth| depth == 12));
}

#[tokio::test]
async fn test_account_profile_refreshed_when_due() {
    let snapshots = eligible_snapshots(3);
    let remote = Arc::new(
        MockRemote::with_records(remote_records_for(&snapshots)).with_profile(Some(
            AccountProfile {
                user_name: "cacher".into(),
                premium: true,
            },
        )),
    );
    let local = Arc::new(MemoryLocalStore::with_snapshots(snapshots.clone()));
    let credentials = credentials();
    credentials.set_renewal_due(true);
    let account = AccountState::new();
    account.schedule_revalidation();
    let mut controller = SyncController::new(
        Arc::clone(&remote),
        Arc::clone(&local),
        Arc::clone(&credentials),
        QuotaTracker::new(),
        account.clone(),
        ControllerConfig::default(),
    );

    let outcome = controller
        .run(
            &handles_of(&snapshots),
            &RecordingProgress::new(),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(outcome, RunOutcome::Completed { did_work: true }));
    assert_eq!(account.is_premium(), Some(true));
    assert!(!account.revalidation_scheduled());
    assert_eq!(credentials.profile().map(|p| p.user_name), Some("cacher".into()));
}

#[tokio::test]
async fn test_missing_account_profile_is_invalid_response() {
    let fixture = eligible_fixture(3, Duration::ZERO);
    fixture.credentials.set_renewal_due(true);
    let mut controller = fixture.controller();

    let outcome = controller
        .run(
            &fixture.handles,
            &RecordingProgress::new(),
            &CancellationToken::new(),
        )
        .await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed(SyncError::InvalidResponse(_))
    ));
    assert_eq!(fixture.remote.fetch_count(), 0);
}

#[tokio::test]
async fn test_controller_can_run_again() {
    let fixture = eligible_fixture(15, Duration::ZERO);
    let mut controller = fixture.controller();
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        let outcome = controller
            .run(&fixture.handles, &RecordingProgress::new(), &cancel)
            .await;
        assert!(matches!(outcome, RunOutcome::Completed { did_work: true }));
    }
    assert_eq!(fixture.remote.sessions_opened(), 2);
}
