//! Session watcher - best-effort write-side capture of agent transcripts.
//!
//! Tails JSONL session files under a tool's session directory and remembers
//! substantial assistant messages as `short` notes. Purely additive: it never
//! injects anything back into the tool, skips sensitive-looking content, and
//! swallows per-file errors so the host process is never disturbed.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use serde_json::Value;

use crate::error::Result;
use crate::memory::{policy, sha256_hex, Kind, Layer, Scope, Signals, Source};
use crate::store::{MemoryStore, WriteInput};

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub project_id: String,
    pub tool: String,
    pub workspace: String,
    /// Assistant messages below this length are progress chatter.
    pub min_chars: usize,
    /// Stored bodies are truncated here to protect the FTS index.
    pub max_body_chars: usize,
    /// Fallback poll cadence when no filesystem events arrive.
    pub poll_interval: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            tool: "codex".to_string(),
            workspace: String::new(),
            min_chars: 280,
            max_body_chars: 12_000,
            poll_interval: Duration::from_millis(500),
        }
    }
}

// ============================================================================
// TRANSCRIPT PARSING
// ============================================================================

/// Text of an assistant message from one transcript line, if it is one.
fn extract_assistant_text(line: &str) -> Option<String> {
    let value: Value = serde_json::from_str(line).ok()?;
    if value.get("role").and_then(Value::as_str) != Some("assistant") {
        return None;
    }
    let mut out = String::new();
    match value.get("content") {
        Some(Value::String(text)) => out.push_str(text),
        Some(Value::Array(blocks)) => {
            for block in blocks {
                let block_type = block.get("type").and_then(Value::as_str).unwrap_or("");
                if block_type == "text" || block_type == "output_text" {
                    out.push_str(block.get("text").and_then(Value::as_str).unwrap_or(""));
                }
            }
        }
        _ => return None,
    }
    let trimmed = out.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

// ============================================================================
// WATCHER
// ============================================================================

/// Tails session transcripts and writes note memories for new assistant
/// output until the stop flag is set.
pub struct SessionWatcher {
    store: Arc<MemoryStore>,
    sessions_root: PathBuf,
    opts: WatchOptions,
    /// Byte offset already consumed per transcript file.
    offsets: HashMap<PathBuf, u64>,
    /// Content hashes already stored, to dedup replayed transcripts.
    seen_hashes: HashSet<String>,
}

impl SessionWatcher {
    pub fn new(store: Arc<MemoryStore>, sessions_root: impl Into<PathBuf>, opts: WatchOptions) -> Self {
        Self {
            store,
            sessions_root: sessions_root.into(),
            opts,
            offsets: HashMap::new(),
            seen_hashes: HashSet::new(),
        }
    }

    /// Blocking watch loop; returns when `stop` flips. Missing session
    /// directories end the loop quietly.
    pub fn run(&mut self, stop: Arc<AtomicBool>) -> Result<()> {
        if !self.sessions_root.exists() {
            tracing::debug!(root = %self.sessions_root.display(), "session root missing, watcher idle");
            return Ok(());
        }
        let (tx, rx) = mpsc::channel::<notify::Result<notify::Event>>();
        let mut watcher = match notify::recommended_watcher(tx) {
            Ok(w) => w,
            Err(err) => {
                tracing::warn!(error = %err, "file watcher unavailable, falling back to polling");
                return self.poll_only(stop);
            }
        };
        if let Err(err) = watcher.watch(&self.sessions_root, RecursiveMode::Recursive) {
            tracing::warn!(error = %err, "watch registration failed, falling back to polling");
            return self.poll_only(stop);
        }

        while !stop.load(Ordering::Relaxed) {
            match rx.recv_timeout(self.opts.poll_interval) {
                Ok(Ok(event)) => {
                    for path in event.paths {
                        self.consume_file(&path);
                    }
                }
                Ok(Err(err)) => tracing::debug!(error = %err, "watch event error"),
                Err(mpsc::RecvTimeoutError::Timeout) => self.sweep(),
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(())
    }

    fn poll_only(&mut self, stop: Arc<AtomicBool>) -> Result<()> {
        while !stop.load(Ordering::Relaxed) {
            self.sweep();
            std::thread::sleep(self.opts.poll_interval);
        }
        Ok(())
    }

    /// Visit every transcript under the root once.
    pub fn sweep(&mut self) {
        let files: Vec<PathBuf> = walkdir::WalkDir::new(&self.sessions_root)
            .into_iter()
            .flatten()
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|x| x == "jsonl")
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        for path in files {
            self.consume_file(&path);
        }
    }

    /// Read lines beyond the stored offset; best-effort on every step.
    fn consume_file(&mut self, path: &Path) {
        if path.extension().map(|x| x != "jsonl").unwrap_or(true) {
            return;
        }
        let Ok(raw) = std::fs::read_to_string(path) else {
            return;
        };
        let offset = *self.offsets.get(path).unwrap_or(&0) as usize;
        if raw.len() <= offset {
            return;
        }
        let fresh = &raw[offset..];
        self.offsets.insert(path.to_path_buf(), raw.len() as u64);

        for line in fresh.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let Some(text) = extract_assistant_text(line) else {
                continue;
            };
            if text.chars().count() < self.opts.min_chars {
                continue;
            }
            if policy::scan_for_secrets(&text).is_some() {
                tracing::debug!("skipping sensitive-looking assistant message");
                continue;
            }
            let digest = sha256_hex(&text);
            if !self.seen_hashes.insert(digest) {
                continue;
            }
            let body: String = text.chars().take(self.opts.max_body_chars).collect();
            let summary: String = text
                .lines()
                .next()
                .unwrap_or("assistant message")
                .chars()
                .take(120)
                .collect();
            let outcome = self.store.write_memory(WriteInput {
                layer: Layer::Short,
                kind: Kind::Note,
                summary: format!("Session capture: {summary}"),
                body,
                tags: vec![
                    format!("project:{}", self.opts.project_id),
                    "auto:watch".to_string(),
                    format!("tool:{}", self.opts.tool),
                ],
                source: Source {
                    tool: format!("{}-watch", self.opts.tool),
                    session_id: path
                        .file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_default(),
                    ..Source::default()
                },
                scope: Scope {
                    project_id: self.opts.project_id.clone(),
                    workspace: self.opts.workspace.clone(),
                },
                signals: Signals {
                    importance_score: 0.4,
                    confidence_score: 0.6,
                    stability_score: 0.4,
                    reuse_count: 0,
                    volatility_score: 0.5,
                },
                ..WriteInput::default()
            });
            if let Err(err) = outcome {
                tracing::debug!(error = %err, "session capture write failed");
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_test_store;

    #[test]
    fn test_extract_assistant_text() {
        let plain = r#"{"role":"assistant","content":"hello there"}"#;
        assert_eq!(extract_assistant_text(plain).as_deref(), Some("hello there"));

        let blocks = r#"{"role":"assistant","content":[{"type":"text","text":"part one "},{"type":"output_text","text":"part two"}]}"#;
        assert_eq!(
            extract_assistant_text(blocks).as_deref(),
            Some("part one part two")
        );

        assert_eq!(
            extract_assistant_text(r#"{"role":"user","content":"me"}"#),
            None
        );
        assert_eq!(extract_assistant_text("not json"), None);
    }

    #[test]
    fn test_sweep_captures_long_assistant_messages() {
        let (store, dir) = open_test_store();
        let sessions = dir.path().join("sessions");
        std::fs::create_dir_all(&sessions).unwrap();
        let long_text = "substantial assistant analysis ".repeat(20);
        let short_text = "ok";
        let lines = format!(
            "{}\n{}\n",
            serde_json::json!({"role": "assistant", "content": long_text}),
            serde_json::json!({"role": "assistant", "content": short_text}),
        );
        std::fs::write(sessions.join("sess-1.jsonl"), &lines).unwrap();

        let store = Arc::new(store);
        let mut watcher = SessionWatcher::new(
            store.clone(),
            &sessions,
            WatchOptions {
                project_id: "OM".to_string(),
                min_chars: 100,
                ..WatchOptions::default()
            },
        );
        watcher.sweep();
        // Re-sweeping must not duplicate.
        watcher.sweep();

        let conn = store.read().unwrap();
        let captured: i64 = conn
            .query_row(
                "SELECT count(*) FROM memories WHERE summary LIKE 'Session capture:%'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(captured, 1);
    }

    #[test]
    fn test_sweep_skips_sensitive_messages() {
        let (store, dir) = open_test_store();
        let sessions = dir.path().join("sessions");
        std::fs::create_dir_all(&sessions).unwrap();
        let leaky = format!(
            "here is the config you asked for password: hunter2 {}",
            "padding words ".repeat(30)
        );
        std::fs::write(
            sessions.join("sess-2.jsonl"),
            format!("{}\n", serde_json::json!({"role": "assistant", "content": leaky})),
        )
        .unwrap();

        let store = Arc::new(store);
        let mut watcher = SessionWatcher::new(
            store.clone(),
            &sessions,
            WatchOptions {
                project_id: "OM".to_string(),
                min_chars: 100,
                ..WatchOptions::default()
            },
        );
        watcher.sweep();
        let conn = store.read().unwrap();
        let captured: i64 = conn
            .query_row(
                "SELECT count(*) FROM memories WHERE summary LIKE 'Session capture:%'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(captured, 0);
    }
}
