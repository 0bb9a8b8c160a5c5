//! Shared harness for the end-to-end scenario suite.

use std::path::Path;
use std::sync::Mutex;

use omnimem_core::{
    Kind, Layer, MemoryPaths, MemoryStore, Scope, Signals, Source, SyncMode, SyncOutcome,
    SyncRunner, SyncSettings, WriteInput,
};

/// One throwaway store rooted in a temp home. Keep the struct alive for the
/// duration of the test; dropping it removes the home directory.
pub struct TestHome {
    pub dir: tempfile::TempDir,
    pub store: MemoryStore,
}

impl TestHome {
    pub fn paths(&self) -> &MemoryPaths {
        self.store.paths()
    }
}

pub fn home() -> TestHome {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = MemoryStore::open(MemoryPaths::under(dir.path())).expect("open store");
    TestHome { dir, store }
}

pub fn write_note(
    store: &MemoryStore,
    project: &str,
    session: &str,
    summary: &str,
    body: &str,
) -> String {
    write_scored(store, project, session, summary, body, Signals::default())
}

pub fn write_scored(
    store: &MemoryStore,
    project: &str,
    session: &str,
    summary: &str,
    body: &str,
    signals: Signals,
) -> String {
    store
        .write_memory(WriteInput {
            layer: Layer::Short,
            kind: Kind::Note,
            summary: summary.to_string(),
            body: body.to_string(),
            signals,
            source: Source {
                tool: "e2e".to_string(),
                session_id: session.to_string(),
                ..Source::default()
            },
            scope: Scope {
                project_id: project.to_string(),
                workspace: String::new(),
            },
            ..WriteInput::default()
        })
        .expect("write memory")
        .envelope
        .id
}

pub fn signals(imp: f64, conf: f64, stab: f64, reuse: i64, vol: f64) -> Signals {
    Signals {
        importance_score: imp,
        confidence_score: conf,
        stability_score: stab,
        reuse_count: reuse,
        volatility_score: vol,
    }
}

/// Count event-log lines whose `event_type` matches.
pub fn count_log_events(paths: &MemoryPaths, event_type: &str) -> usize {
    let mut count = 0;
    for file in omnimem_core::store::list_event_files(&paths.jsonl_root).expect("list files") {
        let raw = std::fs::read_to_string(file).expect("read log");
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
                if value.get("event_type").and_then(|v| v.as_str()) == Some(event_type) {
                    count += 1;
                }
            }
        }
    }
    count
}

/// Scripted sync runner mirroring the mock-runner scenarios.
pub struct ScriptedSyncRunner {
    message: Option<String>,
    calls: Mutex<u32>,
}

impl ScriptedSyncRunner {
    pub fn ok() -> Self {
        Self {
            message: None,
            calls: Mutex::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            message: Some(message.to_string()),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl SyncRunner for ScriptedSyncRunner {
    fn run_mode(&self, mode: SyncMode, _settings: &SyncSettings) -> SyncOutcome {
        *self.calls.lock().unwrap() += 1;
        match &self.message {
            Some(message) => SyncOutcome::failure(mode, message.clone(), ""),
            None => SyncOutcome::success(mode, format!("{} ok", mode.as_str()), ""),
        }
    }
}

/// Scripted tool runner for orchestrator scenarios.
pub struct ScriptedToolRunner {
    pub answer: String,
}

impl omnimem_core::ToolRunner for ScriptedToolRunner {
    fn run(
        &self,
        _cmd: &[String],
        _cwd: Option<&Path>,
    ) -> omnimem_core::Result<omnimem_core::ToolOutput> {
        Ok(omnimem_core::ToolOutput {
            code: 0,
            stdout: self.answer.clone(),
            stderr: String::new(),
        })
    }
}
