//! Sync - git-backed replication plus the background maintenance daemon.
//!
//! Git is the inter-host transport; the store stays single-writer per host.
//! Failures are classified from CLI output into auth / network / conflict /
//! unknown, and only the retryable classes are retried.

mod daemon;
mod git;
mod retry;

pub use daemon::{
    bootstrap_sync, latest_content_mtime, DaemonConfig, DaemonReport, MaintenanceConfig,
    MaintenanceReport, SyncDaemon, WeaveConfig,
};
pub use git::{
    classify_sync_error, should_retry_sync_error, sync_error_hint, GitSync, SyncErrorKind,
    SyncMode, SyncOutcome, SyncRunner, SyncSettings,
};
pub use retry::{run_sync_with_retry, SyncRetryPolicy};

use serde_json::json;

use crate::error::Result;
use crate::memory::EventType;
use crate::store::MemoryStore;

/// Run one sync mode and record the audit event for status-class modes.
pub fn run_sync(
    store: &MemoryStore,
    runner: &dyn SyncRunner,
    mode: SyncMode,
    settings: &SyncSettings,
) -> Result<SyncOutcome> {
    let outcome = runner.run_mode(mode, settings);
    if matches!(mode, SyncMode::Noop | SyncMode::Status) {
        store.record_system_event(
            EventType::Sync,
            json!({
                "mode": mode.as_str(),
                "ok": outcome.ok,
                "message": outcome.message,
                "remote_name": settings.remote_name,
                "branch": settings.branch,
            }),
        )?;
    }
    Ok(outcome)
}

// ============================================================================
// TESTS
// ============================================================================
