//! # OmniMem Core
//!
//! Personal memory substrate for AI coding assistants:
//!
//! - **Triplicated storage**: markdown bodies + append-only JSONL event log +
//!   SQLite indexed view with FTS5, reconstructable from the log alone
//! - **Lifecycle governor**: instant/short/long/archive tiers with decay,
//!   consolidation, compression, distillation, rehearsal, and reflection
//! - **Hybrid retrieval**: BM25 seeds, graph expansion, cognitive-signal
//!   reranking, MMR diversification, profile/drift biasing
//! - **Link weaver**: derived edges from tag, session, temporal, and lexical
//!   co-occurrence powering multi-hop recall
//! - **Sync daemon**: git-backed pull/reindex/push with classified-error
//!   retry, interleaved with governance passes
//! - **Agent orchestrator**: drift-aware turns with budgeted context
//!   assembly and transient-error tool retry
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use omnimem_core::prelude::*;
//!
//! let paths = MemoryPaths::under("/home/me/.omnimem");
//! let store = MemoryStore::open(paths)?;
//!
//! // Remember something
//! let out = store.write_memory(WriteInput {
//!     layer: Layer::Long,
//!     kind: Kind::Decision,
//!     summary: "Use sqlite with fts5 for the index".into(),
//!     body: "Decided after comparing tantivy and plain LIKE scans.".into(),
//!     ..WriteInput::default()
//! })?;
//!
//! // Recall with graph-aware ranking
//! let hits = retrieve(&store, "index decision", "", "", &RetrieveOptions::default())?;
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlite` (default): ship libsqlite3 with FTS5 built in
//! - `watch` (default): session-transcript watcher built on `notify`

// ============================================================================
// MODULES
// ============================================================================

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod governor;
pub mod graph;
pub mod memory;
pub mod retrieval;
pub mod store;
pub mod sync;

#[cfg(feature = "watch")]
pub mod watch;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::{
    default_config_path, default_home, load_config, resolve_paths, save_config, MemoryPaths,
    OmniMemConfig, SCHEMA_VERSION,
};
pub use error::{ErrorKind, MemoryError, Result};
pub use memory::{
    Envelope, EventType, Integrity, Kind, Layer, Reference, Scope, Signals, Source,
    ENVELOPE_VERSION, SYSTEM_MEMORY_ID,
};
pub use store::{
    Brief, BriefItem, CoreBlock, CoreBlockInput, CoreBlockOutcome, Event, IngestInput,
    IngestReport, MemoryRecord, MemoryStore, PruneOptions, PruneReport, ReindexReport,
    VerifyReport, WriteInput, WriteOutcome,
};
pub use graph::{weave_links, Edge, EdgeKind, WeaveOptions, WeaveReport};
pub use retrieval::{
    analyze_profile_drift, build_user_profile, infer_query_route, retrieve, DriftReport,
    ProfileReport, QueryRoute, RankingMode, RetrieveExplain, RetrieveOptions, RetrieveOutcome,
    RetrievedItem,
};
pub use governor::{
    apply_decay, apply_memory_feedback, build_temporal_tree, compress_hot_sessions,
    compress_session_context, consolidate_memories, distill_session_memory,
    infer_adaptive_thresholds, rehearse_memory_traces, trigger_reflective_summaries,
    ConsolidateOptions, ConsolidateReport, DecayOptions, DecayReport, Feedback, FeedbackInput,
    FeedbackReport, GovernanceThresholds,
};
pub use context::{
    compose_context, estimate_tokens, resolve_context_plan, ComposeOutcome, ComposeRequest,
    ContextCandidate, ContextPlan, ContextPlanRequest, ContextProfile, QuotaMode,
};
pub use agent::{
    run_tool_with_retry, run_turn, AgentState, RetryPolicy, SubprocessToolRunner, ToolOutput,
    ToolRunner, TurnOptions, TurnOutcome,
};
pub use sync::{
    bootstrap_sync, run_sync, run_sync_with_retry, DaemonConfig, DaemonReport, GitSync,
    SyncDaemon, SyncErrorKind, SyncMode, SyncOutcome, SyncRetryPolicy, SyncRunner, SyncSettings,
};

#[cfg(feature = "watch")]
pub use watch::{SessionWatcher, WatchOptions};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        retrieve, Envelope, EventType, Kind, Layer, MemoryPaths, MemoryStore, Result,
        RetrieveOptions, Signals, WriteInput,
    };

    pub use crate::{
        apply_decay, compose_context, consolidate_memories, resolve_context_plan, run_turn,
        ComposeRequest, ContextPlanRequest, SyncDaemon, TurnOptions,
    };
}

// ============================================================================
// TEST SUPPORT
// ============================================================================

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::sync::Mutex;

    use crate::config::MemoryPaths;
    use crate::memory::{format_ts, Kind, Layer, Scope, Signals, Source};
    use crate::store::{MemoryStore, WriteInput};
    use crate::sync::{SyncMode, SyncOutcome, SyncRunner, SyncSettings};

    /// Fresh store in a temp home. Keep the TempDir alive for the test body.
    pub fn open_test_store() -> (MemoryStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MemoryStore::open(MemoryPaths::under(dir.path())).expect("open store");
        (store, dir)
    }

    pub fn write_simple(store: &MemoryStore, summary: &str, project: &str, session: &str) -> String {
        write_tagged(store, summary, project, session, &[], 0.5)
    }

    pub fn write_tagged(
        store: &MemoryStore,
        summary: &str,
        project: &str,
        session: &str,
        tags: &[&str],
        importance: f64,
    ) -> String {
        store
            .write_memory(WriteInput {
                layer: Layer::Short,
                kind: Kind::Note,
                summary: summary.to_string(),
                body: "test body".to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                source: Source {
                    session_id: session.to_string(),
                    ..Source::default()
                },
                scope: Scope {
                    project_id: project.to_string(),
                    workspace: String::new(),
                },
                signals: Signals {
                    importance_score: importance,
                    ..Signals::default()
                },
                ..WriteInput::default()
            })
            .expect("write memory")
            .envelope
            .id
    }

    /// Shift a row's timestamps into the past, bypassing the write path.
    pub fn backdate_memory(store: &MemoryStore, id: &str, days: i64) {
        let when = format_ts(chrono::Utc::now() - chrono::Duration::days(days));
        let conn = store.write().expect("writer");
        conn.execute(
            "UPDATE memories SET created_at = ?1, updated_at = ?1 WHERE id = ?2",
            rusqlite::params![when, id],
        )
        .expect("backdate");
    }

    /// Scripted tool runner for orchestrator tests.
    pub struct OkToolRunner {
        code: i32,
        stdout: String,
        stderr: String,
    }

    impl OkToolRunner {
        pub fn answering(answer: &str) -> Self {
            Self {
                code: 0,
                stdout: answer.to_string(),
                stderr: String::new(),
            }
        }

        pub fn failing(stderr: &str) -> Self {
            Self {
                code: 1,
                stdout: String::new(),
                stderr: stderr.to_string(),
            }
        }
    }

    impl crate::agent::ToolRunner for OkToolRunner {
        fn run(
            &self,
            _cmd: &[String],
            _cwd: Option<&Path>,
        ) -> crate::Result<crate::agent::ToolOutput> {
            Ok(crate::agent::ToolOutput {
                code: self.code,
                stdout: self.stdout.clone(),
                stderr: self.stderr.clone(),
            })
        }
    }

    /// Scripted sync runner for retry/daemon tests.
    pub struct MockSyncRunner {
        fail_first: Mutex<u32>,
        message: String,
        always_fail: bool,
        calls: Mutex<u32>,
    }

    impl MockSyncRunner {
        pub fn always_ok() -> Self {
            Self {
                fail_first: Mutex::new(0),
                message: String::new(),
                always_fail: false,
                calls: Mutex::new(0),
            }
        }

        pub fn always_failing(message: &str) -> Self {
            Self {
                fail_first: Mutex::new(0),
                message: message.to_string(),
                always_fail: true,
                calls: Mutex::new(0),
            }
        }

        pub fn failing_times(times: u32, message: &str) -> Self {
            Self {
                fail_first: Mutex::new(times),
                message: message.to_string(),
                always_fail: false,
                calls: Mutex::new(0),
            }
        }

        pub fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl SyncRunner for MockSyncRunner {
        fn run_mode(&self, mode: SyncMode, _settings: &SyncSettings) -> SyncOutcome {
            *self.calls.lock().unwrap() += 1;
            if self.always_fail {
                return SyncOutcome::failure(mode, &self.message, "");
            }
            let mut remaining = self.fail_first.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return SyncOutcome::failure(mode, &self.message, "");
            }
            SyncOutcome::success(mode, format!("{} ok", mode.as_str()), "")
        }
    }
}
