//! Sync scenarios: error-class retry behavior, the noop audit trail, and a
//! full daemon cycle over a mocked transport.

use std::sync::Arc;
use std::time::Duration;

use omnimem_e2e_tests::{count_log_events, home, write_note, ScriptedSyncRunner};

use omnimem_core::{
    bootstrap_sync, run_sync, run_sync_with_retry, DaemonConfig, SyncDaemon, SyncErrorKind,
    SyncMode, SyncRetryPolicy, SyncSettings,
};

#[test]
fn auth_failure_is_not_retried() {
    let runner = ScriptedSyncRunner::failing("fatal: Authentication failed");
    let out = run_sync_with_retry(
        &runner,
        SyncMode::Pull,
        &SyncSettings::default(),
        &SyncRetryPolicy {
            max_attempts: 5,
            ..SyncRetryPolicy::default()
        },
        |_| {},
    );
    assert!(!out.ok);
    assert_eq!(out.error_kind, SyncErrorKind::Auth);
    assert!(!out.retryable);
    assert_eq!(out.attempts, 1);
    assert_eq!(runner.calls(), 1);
    assert!(out.remediation_hint.unwrap().contains("Authentication failed"));
}

#[test]
fn conflict_failure_surfaces_remediation() {
    let runner = ScriptedSyncRunner::failing("error: non-fast-forward, fetch first");
    let out = run_sync_with_retry(
        &runner,
        SyncMode::Push,
        &SyncSettings::default(),
        &SyncRetryPolicy::default(),
        |_| {},
    );
    assert_eq!(out.error_kind, SyncErrorKind::Conflict);
    assert!(!out.retryable);
    assert_eq!(runner.calls(), 1);
    assert!(out.remediation_hint.unwrap().contains("Sync conflict"));
}

#[test]
fn network_failures_retry_with_bounded_sleep() {
    let runner = ScriptedSyncRunner::failing("could not resolve host: github.com");
    let mut total = Duration::ZERO;
    let out = run_sync_with_retry(
        &runner,
        SyncMode::Pull,
        &SyncSettings::default(),
        &SyncRetryPolicy {
            max_attempts: 3,
            initial_backoff_s: 1,
            max_backoff_s: 8,
        },
        |d| total += d,
    );
    assert!(!out.ok);
    assert_eq!(out.attempts, 3);
    assert_eq!(runner.calls(), 3);
    // Backoffs 1s then 2s; never more than the capped schedule.
    assert_eq!(total, Duration::from_secs(3));
}

#[test]
fn noop_sync_always_ok_and_audited() {
    let h = home();
    let runner = ScriptedSyncRunner::ok();
    let out = run_sync(&h.store, &runner, SyncMode::Noop, &SyncSettings::default()).unwrap();
    assert!(out.ok);
    assert_eq!(count_log_events(h.paths(), "memory.sync"), 1);
}

#[test]
fn bootstrap_runs_pull_reindex_push() {
    let h = home();
    write_note(&h.store, "OM", "s1", "content to replicate", "body");
    let runner = ScriptedSyncRunner::ok();
    let report = bootstrap_sync(
        &h.store,
        &runner,
        &SyncSettings::default(),
        &SyncRetryPolicy::default(),
    )
    .unwrap();
    assert!(report.ok);
    assert!(report.pull.ok);
    assert!(report.reindex.ok);
    assert!(report.push.ok);
    assert!(report.reindex.memories_indexed >= 1);
}

#[tokio::test]
async fn daemon_once_cycle_reports_all_phases() {
    let h = home();
    write_note(&h.store, "OM", "s-daemon", "daemon seed content", "body");
    let store = Arc::new(h.store);
    let daemon = SyncDaemon::new(
        store,
        Arc::new(ScriptedSyncRunner::ok()),
        SyncSettings::default(),
        DaemonConfig {
            once: true,
            ..DaemonConfig::default()
        },
    );
    let (_tx, rx) = tokio::sync::watch::channel(false);
    let report = daemon.run(rx).await.unwrap();
    assert!(report.ok);
    assert_eq!(report.cycles, 1);
    assert_eq!(report.mode, "once");
    assert!(report.last_pull.unwrap().ok);
    assert!(report.last_reindex.unwrap().ok);
    assert_eq!(report.weave.runs, 1);
    assert_eq!(report.maintenance.runs, 1);
    let maintenance = report.maintenance.last_result.unwrap();
    assert!(maintenance.ok);
    assert!(!maintenance.prune.enabled); // off by default
}

#[tokio::test]
async fn daemon_counts_failures_and_keeps_going() {
    let h = home();
    let store = Arc::new(h.store);
    let daemon = SyncDaemon::new(
        store,
        Arc::new(ScriptedSyncRunner::failing("connection reset by peer")),
        SyncSettings::default(),
        DaemonConfig {
            once: true,
            retry: SyncRetryPolicy {
                max_attempts: 2,
                initial_backoff_s: 1,
                max_backoff_s: 1,
            },
            ..DaemonConfig::default()
        },
    );
    let (_tx, rx) = tokio::sync::watch::channel(false);
    let report = daemon.run(rx).await.unwrap();
    assert!(!report.ok);
    assert_eq!(report.pull_failures, 1);
    assert_eq!(report.last_error_kind, SyncErrorKind::Network);
    // Governance still happened despite the dead transport.
    assert_eq!(report.maintenance.runs, 1);
}
