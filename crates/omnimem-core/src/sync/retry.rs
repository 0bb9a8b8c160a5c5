//! Retry wrapper for sync sub-steps.
//!
//! Exponential backoff with a cap; auth and conflict failures stop the loop
//! immediately because retrying them only burns the budget.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::git::{should_retry_sync_error, SyncMode, SyncOutcome, SyncRunner, SyncSettings};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncRetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_s: u64,
    pub max_backoff_s: u64,
}

impl Default for SyncRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_s: 1,
            max_backoff_s: 8,
        }
    }
}

/// Run one sync mode under the retry policy. The returned outcome carries
/// the attempt count and final classification.
pub fn run_sync_with_retry(
    runner: &dyn SyncRunner,
    mode: SyncMode,
    settings: &SyncSettings,
    policy: &SyncRetryPolicy,
    mut sleep: impl FnMut(Duration),
) -> SyncOutcome {
    let attempts = policy.max_attempts.max(1);
    let mut backoff = Duration::from_secs(policy.initial_backoff_s.max(1));
    let cap = Duration::from_secs(policy.max_backoff_s.max(policy.initial_backoff_s.max(1)));

    let mut last = SyncOutcome::failure(mode, "sync retry not executed", "");
    for attempt in 1..=attempts {
        let mut outcome = runner.run_mode(mode, settings);
        outcome.attempts = attempt;
        if outcome.ok {
            return outcome;
        }
        let retryable = should_retry_sync_error(outcome.error_kind);
        outcome.retryable = retryable;
        last = outcome;
        if !retryable {
            break;
        }
        if attempt < attempts {
            sleep(backoff);
            backoff = (backoff * 2).min(cap);
        }
    }
    last
}

// ============================================================================
// TESTS
// ============================================================================
