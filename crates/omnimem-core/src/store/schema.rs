//! SQLite schema for the indexed relational view.
//!
//! The schema is idempotent (`IF NOT EXISTS` everywhere) and applied on every
//! open. The view is always reconstructable from the event log, so there is
//! no migration ladder: additive changes land here directly.

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS memories (
  id TEXT PRIMARY KEY,
  schema_version TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  layer TEXT NOT NULL,
  kind TEXT NOT NULL,
  summary TEXT NOT NULL,
  body_md_path TEXT NOT NULL,
  body_text TEXT NOT NULL DEFAULT '',
  tags_json TEXT NOT NULL DEFAULT '[]',
  importance_score REAL NOT NULL DEFAULT 0.5,
  confidence_score REAL NOT NULL DEFAULT 0.5,
  stability_score REAL NOT NULL DEFAULT 0.5,
  reuse_count INTEGER NOT NULL DEFAULT 0,
  volatility_score REAL NOT NULL DEFAULT 0.5,
  cred_refs_json TEXT NOT NULL DEFAULT '[]',
  source_json TEXT NOT NULL DEFAULT '{}',
  scope_json TEXT NOT NULL DEFAULT '{}',
  integrity_json TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_memories_layer ON memories(layer);
CREATE INDEX IF NOT EXISTS idx_memories_kind ON memories(kind);
CREATE INDEX IF NOT EXISTS idx_memories_updated_at ON memories(updated_at);

CREATE TABLE IF NOT EXISTS memory_refs (
  memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
  ref_type TEXT NOT NULL,
  target TEXT NOT NULL,
  note TEXT
);

CREATE INDEX IF NOT EXISTS idx_memory_refs_memory ON memory_refs(memory_id);

CREATE TABLE IF NOT EXISTS memory_events (
  event_id TEXT PRIMARY KEY,
  event_type TEXT NOT NULL,
  event_time TEXT NOT NULL,
  memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
  payload_json TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_memory_events_memory ON memory_events(memory_id);
CREATE INDEX IF NOT EXISTS idx_memory_events_time ON memory_events(event_time);

CREATE TABLE IF NOT EXISTS memory_links (
  src_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
  dst_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
  weight REAL NOT NULL,
  kind TEXT NOT NULL,
  created_at TEXT NOT NULL,
  PRIMARY KEY (src_id, dst_id, kind)
);

CREATE INDEX IF NOT EXISTS idx_memory_links_src ON memory_links(src_id);

CREATE TABLE IF NOT EXISTS core_blocks (
  project_id TEXT NOT NULL,
  session_id TEXT NOT NULL,
  name TEXT NOT NULL,
  content TEXT NOT NULL,
  priority INTEGER NOT NULL DEFAULT 0,
  topic TEXT,
  memory_id TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  PRIMARY KEY (project_id, session_id, name)
);

CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
  id UNINDEXED,
  summary,
  body_text
);

CREATE TRIGGER IF NOT EXISTS memories_fts_insert AFTER INSERT ON memories BEGIN
  INSERT INTO memories_fts(id, summary, body_text)
  VALUES (new.id, new.summary, new.body_text);
END;

CREATE TRIGGER IF NOT EXISTS memories_fts_delete AFTER DELETE ON memories BEGIN
  DELETE FROM memories_fts WHERE id = old.id;
END;

CREATE TRIGGER IF NOT EXISTS memories_fts_update AFTER UPDATE ON memories BEGIN
  DELETE FROM memories_fts WHERE id = old.id;
  INSERT INTO memories_fts(id, summary, body_text)
  VALUES (new.id, new.summary, new.body_text);
END;
";

/// Apply pragmas shared by reader and writer connections.
///
/// `recursive_triggers` must be on so `INSERT OR REPLACE` fires the FTS
/// delete trigger for the displaced row.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;
         PRAGMA foreign_keys = ON;
         PRAGMA recursive_triggers = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

/// Create all tables, indexes, triggers. Idempotent across restarts.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
