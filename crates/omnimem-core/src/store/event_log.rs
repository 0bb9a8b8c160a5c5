//! Append-only, monthly-partitioned JSONL event log.
//!
//! The log is the source of truth: every state change appends one line, and
//! replaying the files in filename-then-byte order reproduces the indexed
//! view. Appends open the file fresh each time and flush before returning, so
//! no shared handle outlives a write.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::memory::{make_id, utc_now_ts, EventType};

// ============================================================================
// EVENT
// ============================================================================

/// One event-log line. Memory-creating events carry the full envelope inside
/// `payload`; system events carry a free-form payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub event_type: EventType,
    pub event_time: String,
    pub memory_id: String,
    pub payload: Value,
}

impl Event {
    pub fn now(event_type: EventType, memory_id: impl Into<String>, payload: Value) -> Self {
        Self {
            event_id: make_id(),
            event_type,
            event_time: utc_now_ts(),
            memory_id: memory_id.into(),
            payload,
        }
    }
}

/// What a raw log line turned out to be.
#[derive(Debug)]
pub enum ParsedLine {
    Event(Event),
    /// Valid JSON with an event type outside the allowed set
    UnknownType(String),
    /// Not JSON at all
    Corrupt(String),
}

// ============================================================================
// FILE LAYOUT
// ============================================================================

/// `events-YYYY-MM.jsonl` for the month containing `when`.
pub fn event_file_path(jsonl_root: &Path, when: DateTime<Utc>) -> PathBuf {
    jsonl_root.join(format!("events-{:04}-{:02}.jsonl", when.year(), when.month()))
}

/// All monthly files in lexicographic (= chronological) order.
pub fn list_event_files(jsonl_root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !jsonl_root.exists() {
        return Ok(files);
    }
    for entry in std::fs::read_dir(jsonl_root)? {
        let path = entry?.path();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if name.starts_with("events-") && name.ends_with(".jsonl") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

// ============================================================================
// APPEND / READ
// ============================================================================

/// Append one event line to the month file for `now`, flushing before return.
pub fn append_event(jsonl_root: &Path, event: &Event) -> Result<()> {
    std::fs::create_dir_all(jsonl_root)?;
    let path = event_file_path(jsonl_root, Utc::now());
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    file.write_all(line.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Classify one raw log line.
pub fn parse_line(line: &str) -> ParsedLine {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return ParsedLine::Corrupt(line.chars().take(80).collect()),
    };
    let type_name = value
        .get("event_type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if type_name.parse::<EventType>().is_err() {
        return ParsedLine::UnknownType(type_name);
    }
    match serde_json::from_value::<Event>(value) {
        Ok(event) => ParsedLine::Event(event),
        Err(_) => ParsedLine::Corrupt(line.chars().take(80).collect()),
    }
}

/// Visit every non-empty line of every monthly file in log order.
pub fn for_each_line(
    jsonl_root: &Path,
    mut visit: impl FnMut(ParsedLine),
) -> Result<usize> {
    let mut files = 0usize;
    for path in list_event_files(jsonl_root)? {
        files += 1;
        let raw = std::fs::read_to_string(&path)?;
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            visit(parse_line(line));
        }
    }
    Ok(files)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_line_wire_shape() {
        let evt = Event {
            event_id: "e1".into(),
            event_type: EventType::Write,
            event_time: "2026-08-01T00:00:00Z".into(),
            memory_id: "m1".into(),
            payload: json!({"summary": "s"}),
        };
        let line = serde_json::to_string(&evt).unwrap();
        assert!(line.contains("\"event_type\":\"memory.write\""));
        let back: Event = serde_json::from_str(&line).unwrap();
        assert_eq!(back, evt);
    }

    #[test]
    fn test_append_and_replay_order() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            let evt = Event::now(EventType::Write, format!("m{i}"), json!({"i": i}));
            append_event(dir.path(), &evt).unwrap();
        }
        let mut seen = Vec::new();
        let files = for_each_line(dir.path(), |line| {
            if let ParsedLine::Event(e) = line {
                seen.push(e.memory_id);
            }
        })
        .unwrap();
        assert_eq!(files, 1);
        assert_eq!(seen, vec!["m0", "m1", "m2"]);
    }

    #[test]
    fn test_parse_line_classification() {
        assert!(matches!(parse_line("{ not json }"), ParsedLine::Corrupt(_)));
        let unknown =
            r#"{"event_id":"e","event_type":"memory.unknown","event_time":"t","memory_id":"m","payload":{}}"#;
        assert!(matches!(parse_line(unknown), ParsedLine::UnknownType(_)));
        let ok =
            r#"{"event_id":"e","event_type":"memory.sync","event_time":"t","memory_id":"m","payload":{}}"#;
        assert!(matches!(parse_line(ok), ParsedLine::Event(_)));
    }

    #[test]
    fn test_list_event_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("events-2026-02.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("events-2025-12.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "").unwrap();
        let files = list_event_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["events-2025-12.jsonl", "events-2026-02.jsonl"]);
    }
}
