//! Sync daemon - the single scheduler loop for pull, push, weave, and
//! maintenance phases.
//!
//! Phases are serialized within one loop; maintenance additionally holds a
//! mutex so two passes can never overlap even if a future caller drives the
//! daemon from several tasks. The loop sleeps on a cancellable timer and
//! exits at the next phase boundary once the stop signal fires.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;

use crate::config::MemoryPaths;
use crate::error::Result;
use crate::governor::{
    self, apply_decay, build_temporal_tree, compress_hot_sessions, consolidate_memories,
    distill_session_memory, rehearse_memory_traces, trigger_reflective_summaries,
    AdaptiveOptions, AdaptiveQuantiles, ConsolidateOptions, DecayOptions, DistillOptions,
    ReflectionOptions, RehearsalOptions, TemporalTreeOptions,
};
use crate::graph::{weave_links, WeaveOptions, WeaveReport};
use crate::memory::{EventType, Kind, Layer};
use crate::store::{MemoryStore, PruneOptions, ReindexReport};

use super::git::{SyncErrorKind, SyncMode, SyncOutcome, SyncRunner, SyncSettings};
use super::retry::{run_sync_with_retry, SyncRetryPolicy};

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaveConfig {
    pub enabled: bool,
    pub interval_s: u64,
    pub limit: usize,
    pub min_weight: f64,
    pub max_per_src: usize,
    pub max_wait_s: f64,
    pub include_archive: bool,
}

impl Default for WeaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_s: 300,
            limit: 220,
            min_weight: 0.18,
            max_per_src: 6,
            max_wait_s: 12.0,
            include_archive: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub interval_s: u64,
    pub decay_days: i64,
    pub decay_limit: usize,
    pub prune_enabled: bool,
    pub prune_days: i64,
    pub prune_limit: usize,
    pub prune_layers: Vec<String>,
    pub prune_keep_kinds: Vec<String>,
    pub consolidate_limit: usize,
    pub compress_sessions: usize,
    pub compress_min_items: usize,
    pub distill_enabled: bool,
    pub distill_sessions: usize,
    pub distill_min_items: usize,
    pub temporal_tree_enabled: bool,
    pub temporal_tree_days: i64,
    pub rehearsal_enabled: bool,
    pub rehearsal_days: i64,
    pub rehearsal_limit: usize,
    pub reflection_enabled: bool,
    pub reflection_days: i64,
    pub reflection_limit: usize,
    pub reflection_min_repeats: usize,
    pub reflection_max_avg_retrieved: f64,
    pub adaptive_days: i64,
    pub adaptive: AdaptiveQuantiles,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_s: 300,
            decay_days: 14,
            decay_limit: 120,
            prune_enabled: false,
            prune_days: 45,
            prune_limit: 300,
            prune_layers: vec!["instant".to_string(), "short".to_string()],
            prune_keep_kinds: vec!["decision".to_string(), "checkpoint".to_string()],
            consolidate_limit: 80,
            compress_sessions: 2,
            compress_min_items: 8,
            distill_enabled: true,
            distill_sessions: 1,
            distill_min_items: 12,
            temporal_tree_enabled: true,
            temporal_tree_days: 30,
            rehearsal_enabled: true,
            rehearsal_days: 45,
            rehearsal_limit: 16,
            reflection_enabled: true,
            reflection_days: 14,
            reflection_limit: 4,
            reflection_min_repeats: 2,
            reflection_max_avg_retrieved: 2.0,
            adaptive_days: 14,
            adaptive: AdaptiveQuantiles::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub scan_interval_s: u64,
    pub pull_interval_s: u64,
    pub weave: WeaveConfig,
    pub maintenance: MaintenanceConfig,
    pub retry: SyncRetryPolicy,
    pub once: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            scan_interval_s: 8,
            pull_interval_s: 30,
            weave: WeaveConfig::default(),
            maintenance: MaintenanceConfig::default(),
            retry: SyncRetryPolicy::default(),
            once: false,
        }
    }
}

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub ok: bool,
    pub decay: PhaseCounts,
    pub prune: PhaseCounts,
    pub consolidate: ConsolidateCounts,
    pub compress: CompressCounts,
    pub distill: DistillCounts,
    pub temporal_tree: TemporalCounts,
    pub rehearsal: PhaseCounts,
    pub reflection: PhaseCounts,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseCounts {
    pub enabled: bool,
    pub count: usize,
    pub ok: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidateCounts {
    pub promoted: usize,
    pub demoted: usize,
    pub errors: usize,
    pub ok: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CompressCounts {
    pub sessions: usize,
    pub compressed: usize,
    pub ok: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DistillCounts {
    pub enabled: bool,
    pub sessions: usize,
    pub distilled: usize,
    pub errors: usize,
    pub ok: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TemporalCounts {
    pub enabled: bool,
    pub made: usize,
    pub temporal_links: usize,
    pub distill_links: usize,
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseStats<T: Serialize> {
    pub enabled: bool,
    pub interval_s: u64,
    pub runs: u32,
    pub failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_result: Option<T>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushStrategy {
    pub mode: &'static str,
    pub push_check_interval_s: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaemonReport {
    pub ok: bool,
    pub cycles: u64,
    pub mode: &'static str,
    pub pull_failures: u32,
    pub push_failures: u32,
    pub reindex_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pull: Option<SyncOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_push: Option<SyncOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reindex: Option<ReindexReport>,
    pub weave: PhaseStats<WeaveReport>,
    pub maintenance: PhaseStats<MaintenanceReport>,
    pub last_error_kind: SyncErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation_hint: Option<String>,
    pub retry: SyncRetryPolicy,
    pub push_strategy: PushStrategy,
}

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    pub ok: bool,
    pub pull: SyncOutcome,
    pub reindex: ReindexReport,
    pub push: SyncOutcome,
}

// ============================================================================
// HELPERS
// ============================================================================

/// Newest mtime under the markdown tree and event log.
pub fn latest_content_mtime(paths: &MemoryPaths) -> Option<SystemTime> {
    let mut latest: Option<SystemTime> = None;
    for root in [&paths.markdown_root, &paths.jsonl_root] {
        if !root.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(root).into_iter().flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                if let Ok(mtime) = meta.modified() {
                    if latest.map_or(true, |l| mtime > l) {
                        latest = Some(mtime);
                    }
                }
            }
        }
    }
    latest
}

/// Push when content advanced or the tree is dirty, throttled to one attempt
/// per `clamp(scan_interval, 3, 60)` seconds.
pub(crate) fn should_attempt_push(
    since_last_attempt: Option<Duration>,
    scan_interval_s: u64,
    content_changed: bool,
    repo_dirty: bool,
) -> bool {
    let push_every = Duration::from_secs(scan_interval_s.clamp(3, 60));
    let waited = since_last_attempt.map_or(true, |e| e >= push_every);
    waited && (content_changed || repo_dirty)
}

fn phase_due(last: Option<Instant>, interval: Duration) -> bool {
    last.map_or(true, |t| t.elapsed() >= interval)
}

/// Pull, reindex, push: first-contact setup for a fresh host.
pub fn bootstrap_sync(
    store: &MemoryStore,
    runner: &dyn SyncRunner,
    settings: &SyncSettings,
    policy: &SyncRetryPolicy,
) -> Result<BootstrapReport> {
    let pull = run_sync_with_retry(runner, SyncMode::Pull, settings, policy, |d| {
        std::thread::sleep(d)
    });
    let reindex = store.reindex(true)?;
    let push = run_sync_with_retry(runner, SyncMode::Push, settings, policy, |d| {
        std::thread::sleep(d)
    });
    Ok(BootstrapReport {
        ok: pull.ok && reindex.ok && push.ok,
        pull,
        reindex,
        push,
    })
}

// ============================================================================
// DAEMON
// ============================================================================

pub struct SyncDaemon {
    store: Arc<MemoryStore>,
    runner: Arc<dyn SyncRunner>,
    settings: SyncSettings,
    config: DaemonConfig,
    /// Two maintenance passes must never run concurrently.
    maintenance_lock: tokio::sync::Mutex<()>,
}

impl SyncDaemon {
    pub fn new(
        store: Arc<MemoryStore>,
        runner: Arc<dyn SyncRunner>,
        settings: SyncSettings,
        config: DaemonConfig,
    ) -> Self {
        Self {
            store,
            runner,
            settings,
            config,
            maintenance_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run the scheduler loop until `once` completes a cycle or the stop
    /// signal fires. The current phase always finishes before exit.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) -> Result<DaemonReport> {
        let paths = self.store.paths().clone();
        let mut cycles = 0u64;
        let mut pull_failures = 0u32;
        let mut push_failures = 0u32;
        let mut reindex_failures = 0u32;
        let mut last_pull: Option<Instant> = None;
        let mut last_push_attempt: Option<Instant> = None;
        let mut last_pull_result: Option<SyncOutcome> = None;
        let mut last_push_result: Option<SyncOutcome> = None;
        let mut last_reindex_result: Option<ReindexReport> = None;
        let mut last_seen = latest_content_mtime(&paths);
        let mut last_error_kind = SyncErrorKind::None;

        let mut weave_runs = 0u32;
        let mut weave_failures = 0u32;
        let mut last_weave: Option<Instant> = None;
        let mut last_weave_seen = last_seen;
        let mut last_weave_result: Option<WeaveReport> = None;

        let mut maintenance_runs = 0u32;
        let mut maintenance_failures = 0u32;
        let mut last_maintenance: Option<Instant> = None;
        let mut last_maintenance_result: Option<MaintenanceReport> = None;

        let pull_interval = Duration::from_secs(self.config.pull_interval_s.max(1));
        let weave_interval = Duration::from_secs(self.config.weave.interval_s.max(30));
        let maintenance_interval =
            Duration::from_secs(self.config.maintenance.interval_s.max(60));

        loop {
            if *stop.borrow() {
                break;
            }
            cycles += 1;
            let mut want_weave = false;

            // Pull phase: fetch + rebase, then rebuild the view from the log.
            if phase_due(last_pull, pull_interval) {
                let outcome = run_sync_with_retry(
                    self.runner.as_ref(),
                    SyncMode::Pull,
                    &self.settings,
                    &self.config.retry,
                    |d| std::thread::sleep(d),
                );
                if outcome.ok {
                    match self.store.reindex(true) {
                        Ok(report) => {
                            want_weave = true;
                            last_reindex_result = Some(report);
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "reindex after pull failed");
                            reindex_failures += 1;
                            last_error_kind = SyncErrorKind::Unknown;
                        }
                    }
                } else {
                    pull_failures += 1;
                    last_error_kind = outcome.error_kind;
                }
                last_pull_result = Some(outcome);
                last_pull = Some(Instant::now());
                last_seen = latest_content_mtime(&paths);
            }

            // Push phase: mtime-or-dirty trigger, throttled.
            let current_seen = latest_content_mtime(&paths);
            let content_changed = match (current_seen, last_seen) {
                (Some(cur), Some(prev)) => cur > prev,
                (Some(_), None) => true,
                _ => false,
            };
            if should_attempt_push(
                last_push_attempt.map(|t| t.elapsed()),
                self.config.scan_interval_s,
                content_changed,
                self.runner.is_dirty(),
            ) {
                let outcome = run_sync_with_retry(
                    self.runner.as_ref(),
                    SyncMode::Push,
                    &self.settings,
                    &self.config.retry,
                    |d| std::thread::sleep(d),
                );
                if !outcome.ok {
                    push_failures += 1;
                    last_error_kind = outcome.error_kind;
                }
                last_push_result = Some(outcome);
                last_push_attempt = Some(Instant::now());
                last_seen = latest_content_mtime(&paths);
                want_weave = true;
            }

            // Weave phase: after content movement, under a wall-time cap.
            if self.config.weave.enabled {
                let weave_due = phase_due(last_weave, weave_interval);
                let changed_since_weave = match (current_seen, last_weave_seen) {
                    (Some(cur), Some(prev)) => cur > prev,
                    (Some(_), None) => true,
                    _ => false,
                };
                if weave_due && (want_weave || changed_since_weave) {
                    match weave_links(
                        &self.store,
                        &WeaveOptions {
                            project_id: String::new(),
                            limit: self.config.weave.limit,
                            min_weight: self.config.weave.min_weight,
                            max_per_src: self.config.weave.max_per_src,
                            include_archive: self.config.weave.include_archive,
                            max_wait: Duration::from_secs_f64(self.config.weave.max_wait_s),
                        },
                    ) {
                        Ok(report) => {
                            weave_runs += 1;
                            last_weave = Some(Instant::now());
                            last_weave_seen = latest_content_mtime(&paths);
                            last_weave_result = Some(report);
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "weave pass failed");
                            weave_failures += 1;
                        }
                    }
                }
            }

            // Maintenance phase.
            if self.config.maintenance.enabled
                && phase_due(last_maintenance, maintenance_interval)
            {
                let report = self.run_maintenance().await;
                if report.ok {
                    maintenance_runs += 1;
                } else {
                    maintenance_failures += 1;
                }
                last_maintenance = Some(Instant::now());
                last_maintenance_result = Some(report);
            }

            if self.config.once {
                break;
            }
            let scan = Duration::from_secs(self.config.scan_interval_s.max(1));
            tokio::select! {
                _ = tokio::time::sleep(scan) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        let ok = pull_failures == 0 && push_failures == 0 && reindex_failures == 0;
        let report = DaemonReport {
            ok,
            cycles,
            mode: if self.config.once { "once" } else { "daemon" },
            pull_failures,
            push_failures,
            reindex_failures,
            last_pull: last_pull_result,
            last_push: last_push_result,
            last_reindex: last_reindex_result,
            weave: PhaseStats {
                enabled: self.config.weave.enabled,
                interval_s: self.config.weave.interval_s,
                runs: weave_runs,
                failures: weave_failures,
                last_result: last_weave_result,
            },
            maintenance: PhaseStats {
                enabled: self.config.maintenance.enabled,
                interval_s: self.config.maintenance.interval_s,
                runs: maintenance_runs,
                failures: maintenance_failures,
                last_result: last_maintenance_result,
            },
            last_error_kind,
            remediation_hint: super::git::sync_error_hint(last_error_kind).map(str::to_string),
            retry: self.config.retry,
            push_strategy: PushStrategy {
                mode: "mtime_or_dirty",
                push_check_interval_s: self.config.scan_interval_s.clamp(3, 60),
            },
        };
        self.store.record_system_event(
            EventType::Sync,
            json!({"daemon": serde_json::to_value(&report)?}),
        )?;
        Ok(report)
    }

    /// One governance pass: decay -> prune -> consolidate -> compress ->
    /// distill -> temporal tree -> rehearsal -> reflection.
    async fn run_maintenance(&self) -> MaintenanceReport {
        let _guard = self.maintenance_lock.lock().await;
        let cfg = &self.config.maintenance;
        let store = self.store.as_ref();
        let mut report = MaintenanceReport::default();
        let mut ok = true;

        match apply_decay(
            store,
            &DecayOptions {
                days: cfg.decay_days,
                limit: cfg.decay_limit,
                ..DecayOptions::default()
            },
        ) {
            Ok(out) => {
                report.decay = PhaseCounts {
                    enabled: true,
                    count: out.decayed,
                    ok: out.ok,
                };
            }
            Err(err) => {
                tracing::warn!(error = %err, "decay pass failed");
                ok = false;
            }
        }

        report.prune.enabled = cfg.prune_enabled;
        if cfg.prune_enabled {
            let layers: Vec<Layer> = cfg
                .prune_layers
                .iter()
                .filter_map(|l| l.parse::<Layer>().ok())
                .collect();
            let keep_kinds: Vec<Kind> = cfg
                .prune_keep_kinds
                .iter()
                .filter_map(|k| k.parse::<Kind>().ok())
                .collect();
            match store.prune_memories(&PruneOptions {
                days: cfg.prune_days,
                limit: cfg.prune_limit,
                layers,
                keep_kinds,
                ..PruneOptions::default()
            }) {
                Ok(out) => {
                    report.prune.count = out.deleted;
                    report.prune.ok = out.ok;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "prune pass failed");
                    ok = false;
                }
            }
        } else {
            report.prune.ok = true;
        }

        match consolidate_memories(
            store,
            &ConsolidateOptions {
                limit: cfg.consolidate_limit,
                adaptive: Some(AdaptiveOptions {
                    days: cfg.adaptive_days,
                    quantiles: cfg.adaptive,
                    ..AdaptiveOptions::default()
                }),
                ..ConsolidateOptions::default()
            },
        ) {
            Ok(out) => {
                report.consolidate = ConsolidateCounts {
                    promoted: out.promote.len(),
                    demoted: out.demote.len(),
                    errors: out.errors.len(),
                    ok: out.ok,
                };
            }
            Err(err) => {
                tracing::warn!(error = %err, "consolidate pass failed");
                ok = false;
            }
        }

        match compress_hot_sessions(
            store,
            "",
            cfg.compress_sessions,
            120,
            cfg.compress_min_items,
            false,
        ) {
            Ok(out) => {
                report.compress = CompressCounts {
                    sessions: out.sessions.len(),
                    compressed: out.items.iter().filter(|i| i.compressed).count(),
                    ok: out.ok,
                };
            }
            Err(err) => {
                tracing::warn!(error = %err, "compress pass failed");
                ok = false;
            }
        }

        report.distill.enabled = cfg.distill_enabled;
        report.distill.ok = true;
        if cfg.distill_enabled {
            match governor::hot_sessions(store, "", cfg.distill_sessions) {
                Ok(sessions) => {
                    for session_id in sessions {
                        report.distill.sessions += 1;
                        match distill_session_memory(
                            store,
                            &DistillOptions {
                                session_id,
                                min_items: cfg.distill_min_items,
                                ..DistillOptions::default()
                            },
                        ) {
                            Ok(out) if out.distilled => report.distill.distilled += 1,
                            Ok(_) => {}
                            Err(err) => {
                                tracing::warn!(error = %err, "distill pass failed");
                                report.distill.errors += 1;
                                report.distill.ok = false;
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "distill session scan failed");
                    ok = false;
                }
            }
        }

        report.temporal_tree.enabled = cfg.temporal_tree_enabled;
        report.temporal_tree.ok = true;
        if cfg.temporal_tree_enabled {
            match build_temporal_tree(
                store,
                &TemporalTreeOptions {
                    days: cfg.temporal_tree_days,
                    max_sessions: (cfg.compress_sessions * 4).max(6),
                    ..TemporalTreeOptions::default()
                },
            ) {
                Ok(out) => {
                    report.temporal_tree.made = out.made;
                    report.temporal_tree.temporal_links = out.temporal_links;
                    report.temporal_tree.distill_links = out.distill_links;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "temporal tree pass failed");
                    report.temporal_tree.ok = false;
                    ok = false;
                }
            }
        }

        report.rehearsal.enabled = cfg.rehearsal_enabled;
        report.rehearsal.ok = true;
        if cfg.rehearsal_enabled {
            match rehearse_memory_traces(
                store,
                &RehearsalOptions {
                    days: cfg.rehearsal_days,
                    limit: cfg.rehearsal_limit,
                    ..RehearsalOptions::default()
                },
            ) {
                Ok(out) => report.rehearsal.count = out.selected_count,
                Err(err) => {
                    tracing::warn!(error = %err, "rehearsal pass failed");
                    report.rehearsal.ok = false;
                    ok = false;
                }
            }
        }

        report.reflection.enabled = cfg.reflection_enabled;
        report.reflection.ok = true;
        if cfg.reflection_enabled {
            match trigger_reflective_summaries(
                store,
                &ReflectionOptions {
                    days: cfg.reflection_days,
                    limit: cfg.reflection_limit,
                    min_repeats: cfg.reflection_min_repeats,
                    max_avg_retrieved: cfg.reflection_max_avg_retrieved,
                    ..ReflectionOptions::default()
                },
            ) {
                Ok(out) => report.reflection.count = out.created_count,
                Err(err) => {
                    tracing::warn!(error = %err, "reflection pass failed");
                    report.reflection.ok = false;
                    ok = false;
                }
            }
        }

        report.ok = ok
            && report.decay.ok
            && report.prune.ok
            && report.consolidate.ok
            && report.compress.ok;
        report
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{open_test_store, write_simple, MockSyncRunner};

    #[test]
    fn test_push_trigger_on_dirty_repo() {
        assert!(should_attempt_push(
            Some(Duration::from_secs(20)),
            8,
            false,
            true
        ));
    }

    #[test]
    fn test_push_not_triggered_before_interval() {
        assert!(!should_attempt_push(
            Some(Duration::from_secs(2)),
            8,
            true,
            true
        ));
    }

    #[test]
    fn test_push_needs_a_reason() {
        assert!(!should_attempt_push(None, 8, false, false));
        assert!(should_attempt_push(None, 8, true, false));
    }

    #[test]
    fn test_push_interval_clamped() {
        // scan_interval 200 clamps to 60.
        assert!(!should_attempt_push(Some(Duration::from_secs(59)), 200, true, false));
        assert!(should_attempt_push(Some(Duration::from_secs(60)), 200, true, false));
        // scan_interval 1 clamps to 3.
        assert!(!should_attempt_push(Some(Duration::from_secs(2)), 1, true, false));
    }

    #[tokio::test]
    async fn test_once_cycle_runs_all_phases() {
        let (store, _dir) = open_test_store();
        write_simple(&store, "daemon seed memory", "OM", "s-daemon");
        let store = Arc::new(store);
        let daemon = SyncDaemon::new(
            store.clone(),
            Arc::new(MockSyncRunner::always_ok()),
            SyncSettings::default(),
            DaemonConfig {
                once: true,
                ..DaemonConfig::default()
            },
        );
        let (_tx, rx) = watch::channel(false);
        let report = daemon.run(rx).await.unwrap();
        assert!(report.ok);
        assert_eq!(report.cycles, 1);
        assert_eq!(report.mode, "once");
        assert_eq!(report.pull_failures, 0);
        assert!(report.last_pull.is_some());
        assert!(report.last_reindex.is_some());
        assert_eq!(report.weave.runs, 1);
        assert_eq!(report.maintenance.runs, 1);
        assert!(report.maintenance.last_result.as_ref().unwrap().ok);
    }

    #[tokio::test]
    async fn test_pull_failures_are_counted_and_loop_continues() {
        let (store, _dir) = open_test_store();
        let store = Arc::new(store);
        let daemon = SyncDaemon::new(
            store,
            Arc::new(MockSyncRunner::always_failing("could not resolve host")),
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
        let (_tx, rx) = watch::channel(false);
        let report = daemon.run(rx).await.unwrap();
        assert!(!report.ok);
        assert_eq!(report.pull_failures, 1);
        assert_eq!(report.last_error_kind, SyncErrorKind::Network);
        assert!(report.remediation_hint.unwrap().contains("Network issue"));
        // Maintenance still ran despite the failed pull.
        assert_eq!(report.maintenance.runs, 1);
    }

    #[tokio::test]
    async fn test_stop_signal_exits_loop() {
        let (store, _dir) = open_test_store();
        let store = Arc::new(store);
        let daemon = Arc::new(SyncDaemon::new(
            store,
            Arc::new(MockSyncRunner::always_ok()),
            SyncSettings::default(),
            DaemonConfig {
                scan_interval_s: 1,
                ..DaemonConfig::default()
            },
        ));
        let (tx, rx) = watch::channel(false);
        let handle = {
            let daemon = daemon.clone();
            tokio::spawn(async move { daemon.run(rx).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        let report = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("daemon must exit after stop")
            .unwrap()
            .unwrap();
        assert!(report.cycles >= 1);
        assert_eq!(report.mode, "daemon");
    }

    #[test]
    fn test_daemon_config_defaults_from_empty_json() {
        let cfg: DaemonConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.scan_interval_s, 8);
        assert_eq!(cfg.pull_interval_s, 30);
        assert!(cfg.weave.enabled);
        assert_eq!(cfg.maintenance.decay_days, 14);
        assert!(!cfg.maintenance.prune_enabled);
        assert_eq!(cfg.retry.max_attempts, 3);
    }
}
