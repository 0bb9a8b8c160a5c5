//! Indexed relational view over the event log and markdown tree.
//!
//! `MemoryStore` is the single-writer surface of the triplicated record
//! store. Every write lands in three places in a fixed order: markdown body
//! first, event-log line second, relational row last. A crash between steps
//! leaves the log authoritative and `reindex` restores consistency.
//!
//! Separate reader/writer connections behind mutexes keep all methods on
//! `&self`, so callers can share `Arc<MemoryStore>` without an outer lock.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{json, Value};

use crate::config::{MemoryPaths, SCHEMA_VERSION};
use crate::error::{MemoryError, Result};
use crate::graph::{Edge, EdgeKind};
use crate::memory::{
    make_id, policy, render_markdown, sha256_hex, utc_now_ts, Envelope, EventType, Integrity,
    Kind, Layer, Reference, Scope, Signals, Source, ENVELOPE_VERSION, SYSTEM_MEMORY_ID,
};

use super::event_log::{self, Event, ParsedLine};
use super::markdown;
use super::schema;

// ============================================================================
// INPUT / OUTPUT TYPES
// ============================================================================

/// Input for creating a new memory.
#[derive(Debug, Clone)]
pub struct WriteInput {
    pub layer: Layer,
    pub kind: Kind,
    pub summary: String,
    pub body: String,
    pub tags: Vec<String>,
    pub refs: Vec<Reference>,
    pub cred_refs: Vec<String>,
    pub source: Source,
    pub scope: Scope,
    pub signals: Signals,
    pub event_type: EventType,
}

impl Default for WriteInput {
    fn default() -> Self {
        Self {
            layer: Layer::Instant,
            kind: Kind::Note,
            summary: String::new(),
            body: String::new(),
            tags: Vec::new(),
            refs: Vec::new(),
            cred_refs: Vec::new(),
            source: Source::default(),
            scope: Scope::default(),
            signals: Signals::default(),
            event_type: EventType::Write,
        }
    }
}

/// Result of a successful write: both durable projections of the record.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub envelope: Envelope,
    pub event: Event,
}

/// One indexed record: envelope plus the indexed body copy.
#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub envelope: Envelope,
    pub body_text: String,
}

/// Recent-activity brief for a project.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Brief {
    pub project_id: String,
    pub recent: Vec<BriefItem>,
    pub checkpoints: Vec<BriefItem>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BriefItem {
    pub id: String,
    pub layer: Layer,
    pub kind: Kind,
    pub summary: String,
    pub updated_at: String,
}

/// Structured verify report.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VerifyReport {
    pub ok: bool,
    pub sqlite_table_view_count: i64,
    pub memory_rows_checked: i64,
    pub jsonl_events_checked: i64,
    pub issues: Vec<String>,
}

/// Structured reindex report.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReindexReport {
    pub ok: bool,
    pub reset: bool,
    pub jsonl_files: usize,
    pub events_parsed: usize,
    pub memories_indexed: usize,
    pub events_skipped: usize,
    pub issues: Vec<String>,
}

/// Administrative prune options.
#[derive(Debug, Clone)]
pub struct PruneOptions {
    pub days: i64,
    pub limit: usize,
    pub layers: Vec<Layer>,
    pub keep_kinds: Vec<Kind>,
    pub project_id: String,
    pub session_id: String,
    pub dry_run: bool,
}

impl Default for PruneOptions {
    fn default() -> Self {
        Self {
            days: 45,
            limit: 300,
            layers: vec![Layer::Instant, Layer::Short],
            keep_kinds: vec![Kind::Decision, Kind::Checkpoint],
            project_id: String::new(),
            session_id: String::new(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PruneReport {
    pub ok: bool,
    pub candidates: usize,
    pub deleted: usize,
    pub ids: Vec<String>,
}

/// Columns of the canonical row projection, in mapper order.
pub(crate) const MEMORY_COLUMNS: &str = "id, schema_version, created_at, updated_at, layer, kind, \
     summary, body_md_path, body_text, tags_json, importance_score, confidence_score, \
     stability_score, reuse_count, volatility_score, cred_refs_json, source_json, scope_json, \
     integrity_json";

// ============================================================================
// MEMORY STORE
// ============================================================================

/// The triplicated, integrity-checked record store.
pub struct MemoryStore {
    paths: MemoryPaths,
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl MemoryStore {
    /// Open (and initialize, on first touch) the store under `paths`.
    pub fn open(paths: MemoryPaths) -> Result<Self> {
        for layer in Layer::ALL {
            std::fs::create_dir_all(paths.markdown_root.join(layer.as_str()))?;
        }
        std::fs::create_dir_all(&paths.jsonl_root)?;
        if let Some(parent) = paths.sqlite_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writer = Connection::open(&paths.sqlite_path)?;
        schema::configure_connection(&writer)?;
        schema::apply_schema(&writer)?;
        let reader = Connection::open(&paths.sqlite_path)?;
        schema::configure_connection(&reader)?;

        let store = Self {
            paths,
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        };
        store.ensure_system_memory()?;
        Ok(store)
    }

    pub fn paths(&self) -> &MemoryPaths {
        &self.paths
    }

    pub(crate) fn read(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| MemoryError::Storage("reader lock poisoned".to_string()))
    }

    pub(crate) fn write(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| MemoryError::Storage("writer lock poisoned".to_string()))
    }

    /// Seed the reserved system memory owning system-scoped events.
    fn ensure_system_memory(&self) -> Result<()> {
        let rel_path = "archive/system/system000.md";
        let body = match markdown::read_markdown(&self.paths.markdown_root, rel_path)? {
            Some(existing) => existing,
            None => {
                let body = "# system\n\nreserved memory for system audit events\n".to_string();
                markdown::write_markdown(&self.paths.markdown_root, rel_path, &body)?;
                body
            }
        };
        let now = utc_now_ts();
        let conn = self.write()?;
        conn.execute(
            "INSERT OR IGNORE INTO memories(
               id, schema_version, created_at, updated_at, layer, kind, summary, body_md_path,
               body_text, tags_json, importance_score, confidence_score, stability_score,
               reuse_count, volatility_score, cred_refs_json, source_json, scope_json,
               integrity_json
             ) VALUES (?1, ?2, ?3, ?4, 'archive', 'summary', 'system', ?5, ?6, '[]',
                       1.0, 1.0, 1.0, 0, 0.0, '[]', ?7, ?8, ?9)",
            params![
                SYSTEM_MEMORY_ID,
                SCHEMA_VERSION,
                now,
                now,
                rel_path,
                body,
                r#"{"tool":"system","account":"system","device":"local","session_id":"system"}"#,
                r#"{"project_id":"global","workspace":""}"#,
                serde_json::to_string(&Integrity {
                    content_sha256: sha256_hex(&body),
                    envelope_version: ENVELOPE_VERSION,
                })?,
            ],
        )?;
        Ok(())
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Create a memory: markdown body, event-log line, indexed row, in that
    /// order. Fails atomically from the caller's perspective: no event is
    /// appended for a rejected record.
    pub fn write_memory(&self, input: WriteInput) -> Result<WriteOutcome> {
        if !input.event_type.creates_memory() {
            return Err(MemoryError::InvalidArgument(format!(
                "event_type {} cannot create a memory",
                input.event_type
            )));
        }
        if input.kind == Kind::Retrieve && input.layer != Layer::Instant {
            return Err(MemoryError::InvalidArgument(
                "retrieve memories are always instant".to_string(),
            ));
        }
        if input.summary.trim().is_empty() {
            return Err(MemoryError::InvalidArgument("summary is empty".to_string()));
        }
        policy::reject_secrets("summary", &input.summary)?;
        policy::reject_secrets("body", &input.body)?;
        for cred in &input.cred_refs {
            policy::validate_cred_ref(cred)?;
        }
        for r in &input.refs {
            if r.ref_type.is_empty() || r.target.is_empty() {
                return Err(MemoryError::InvalidArgument(
                    "reference needs a type and a target".to_string(),
                ));
            }
        }

        let when = Utc::now();
        let when_iso = crate::memory::format_ts(when);
        let mem_id = make_id();
        let rel_path = markdown::md_rel_path(input.layer, &mem_id, when);
        let body_md = render_markdown(&input.summary, &input.body);
        markdown::write_markdown(&self.paths.markdown_root, &rel_path, &body_md)?;

        let mut tags = input.tags;
        dedup_in_order(&mut tags);

        let envelope = Envelope {
            id: mem_id.clone(),
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: when_iso.clone(),
            updated_at: when_iso.clone(),
            layer: input.layer,
            kind: input.kind,
            summary: input.summary,
            body_md_path: rel_path.clone(),
            tags,
            refs: input.refs,
            signals: input.signals.clamped(),
            cred_refs: input.cred_refs,
            source: input.source,
            scope: input.scope,
            integrity: Integrity {
                content_sha256: sha256_hex(&body_md),
                envelope_version: ENVELOPE_VERSION,
            },
        };

        let event = Event {
            event_id: make_id(),
            event_type: input.event_type,
            event_time: when_iso,
            memory_id: mem_id,
            payload: envelope_payload(&envelope, Value::Null)?,
        };
        event_log::append_event(&self.paths.jsonl_root, &event)?;

        let mut conn = self.write()?;
        let tx = conn.transaction()?;
        upsert_record(&tx, &envelope, &body_md)?;
        insert_event_row(&tx, &event)?;
        tx.commit()?;

        Ok(WriteOutcome { envelope, event })
    }

    /// Apply a governance mutation to one memory and re-emit its envelope so
    /// replaying the log reproduces the mutated view exactly.
    ///
    /// The closure receives the current markdown and may return a new body
    /// (plain text, without the heading); if it does, the markdown file is
    /// re-rendered and re-hashed in place.
    pub(crate) fn mutate_memory(
        &self,
        id: &str,
        event_type: EventType,
        extra: Value,
        apply: impl FnOnce(&mut Envelope, &str) -> Result<Option<String>>,
    ) -> Result<Envelope> {
        let record = self
            .get_memory(id)?
            .ok_or_else(|| MemoryError::NotFound(format!("memory {id}")))?;
        let mut envelope = record.envelope;
        let new_body = apply(&mut envelope, &record.body_text)?;
        envelope.signals = envelope.signals.clone().clamped();
        envelope.updated_at = utc_now_ts();

        let body_md = match new_body {
            Some(body) => {
                policy::reject_secrets("body", &body)?;
                let body_md = render_markdown(&envelope.summary, &body);
                markdown::write_markdown(&self.paths.markdown_root, &envelope.body_md_path, &body_md)?;
                envelope.integrity.content_sha256 = sha256_hex(&body_md);
                body_md
            }
            None => record.body_text,
        };

        let event = Event {
            event_id: make_id(),
            event_type,
            event_time: envelope.updated_at.clone(),
            memory_id: envelope.id.clone(),
            payload: envelope_payload(&envelope, extra)?,
        };
        event_log::append_event(&self.paths.jsonl_root, &event)?;

        let mut conn = self.write()?;
        let tx = conn.transaction()?;
        upsert_record(&tx, &envelope, &body_md)?;
        insert_event_row(&tx, &event)?;
        tx.commit()?;
        Ok(envelope)
    }

    /// Replace a memory's body text (feedback annotations and core blocks).
    pub fn update_memory_content(&self, id: &str, new_body: &str) -> Result<Envelope> {
        let body = new_body.to_string();
        self.mutate_memory(
            id,
            EventType::Update,
            json!({"action": "content_update"}),
            |_, _| Ok(Some(body)),
        )
    }

    /// Move a memory between layers; records a promote event with the
    /// before/after pair.
    pub fn set_layer(&self, id: &str, to: Layer, reason: &str) -> Result<Envelope> {
        let record = self
            .get_memory(id)?
            .ok_or_else(|| MemoryError::NotFound(format!("memory {id}")))?;
        let from = record.envelope.layer;
        self.mutate_memory(
            id,
            EventType::Promote,
            json!({
                "action": "layer_change",
                "from": from,
                "to": to,
                "reason": reason,
            }),
            |envelope, _| {
                envelope.layer = to;
                Ok(None)
            },
        )
    }

    /// Bump `reuse_count` on a set of memories (retrieval selections,
    /// rehearsal). Missing ids are skipped, not errors.
    pub fn bump_reuse_counts(&self, ids: &[String], delta: i64) -> Result<usize> {
        let mut bumped = 0usize;
        for id in ids {
            if id.is_empty() || id == SYSTEM_MEMORY_ID {
                continue;
            }
            let out = self.mutate_memory(
                id,
                EventType::Feedback,
                json!({"action": "reuse_bump", "delta": delta}),
                |envelope, _| {
                    envelope.signals.reuse_count =
                        (envelope.signals.reuse_count + delta).max(0);
                    Ok(None)
                },
            );
            match out {
                Ok(_) => bumped += 1,
                Err(MemoryError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(bumped)
    }

    /// Append a system-scoped event (verify/sync/reindex audit trail).
    pub fn record_system_event(&self, event_type: EventType, payload: Value) -> Result<Event> {
        let event = Event::now(event_type, SYSTEM_MEMORY_ID, payload);
        event_log::append_event(&self.paths.jsonl_root, &event)?;
        let conn = self.write()?;
        insert_event_row(&conn, &event)?;
        Ok(event)
    }

    // ========================================================================
    // READ PATH
    // ========================================================================

    /// Fetch one record with its references.
    pub fn get_memory(&self, id: &str) -> Result<Option<MemoryRecord>> {
        let conn = self.read()?;
        let sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1");
        let record = conn
            .query_row(&sql, params![id], record_from_row)
            .optional()?;
        let Some(mut record) = record else {
            return Ok(None);
        };
        record.envelope.refs = load_refs(&conn, id)?;
        Ok(Some(record))
    }

    /// Batch fetch preserving input order; unknown ids are dropped.
    pub fn get_records(&self, ids: &[String]) -> Result<Vec<MemoryRecord>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get_memory(id)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Basic lexical find: FTS BM25 ordering with a substring fallback when
    /// FTS yields fewer than `FIND_FALLBACK_FLOOR` rows. Empty query lists
    /// recent rows. `kind=retrieve` rows never surface.
    pub fn find_memories(
        &self,
        query: &str,
        layer: Option<Layer>,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        const FIND_FALLBACK_FLOOR: usize = 3;
        let limit = limit.max(1);
        if query.trim().is_empty() {
            return self.list_recent(layer, project_id, limit);
        }
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        for (record, _) in self.fts_candidates(query, layer, project_id, "", limit)? {
            seen.insert(record.envelope.id.clone());
            out.push(record);
        }
        if out.len() < FIND_FALLBACK_FLOOR.min(limit) {
            for record in self.substring_candidates(query, layer, project_id, limit)? {
                if seen.insert(record.envelope.id.clone()) {
                    out.push(record);
                }
            }
        }
        out.truncate(limit);
        Ok(out)
    }

    fn list_recent(
        &self,
        layer: Option<Layer>,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let conn = self.read()?;
        let layer_clause = match layer {
            Some(l) => format!("AND layer = '{}'", l.as_str()),
            None => String::new(),
        };
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE kind != 'retrieve' AND id != '{SYSTEM_MEMORY_ID}'
               AND (json_extract(scope_json, '$.project_id') = ?1 OR ?1 = '')
               {layer_clause}
             ORDER BY updated_at DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![project_id, limit as i64], record_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MemoryError::from)
    }

    /// FTS seed query used by both `find_memories` and the retrieval engine.
    /// Returns `(record, fts_score)` where larger scores are better.
    pub(crate) fn fts_candidates(
        &self,
        query: &str,
        layer: Option<Layer>,
        project_id: &str,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<(MemoryRecord, f64)>> {
        let Some(match_expr) = sanitize_match_query(query) else {
            return Ok(Vec::new());
        };
        let conn = self.read()?;
        let layer_clause = match layer {
            Some(l) => format!("AND m.layer = '{}'", l.as_str()),
            None => String::new(),
        };
        let sql = format!(
            "SELECT {cols}, -bm25(memories_fts) AS fts_score
             FROM memories_fts f
             JOIN memories m ON m.id = f.id
             WHERE f.memories_fts MATCH ?1
               AND m.kind != 'retrieve' AND m.id != '{SYSTEM_MEMORY_ID}'
               AND (json_extract(m.scope_json, '$.project_id') = ?2 OR ?2 = '')
               AND (json_extract(m.source_json, '$.session_id') = ?3 OR ?3 = '')
               {layer_clause}
             ORDER BY bm25(memories_fts), m.updated_at DESC
             LIMIT ?4",
            cols = qualified_columns("m"),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![match_expr, project_id, session_id, limit as i64],
            |row| {
                let record = record_from_row(row)?;
                let score: f64 = row.get("fts_score")?;
                Ok((record, score))
            },
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MemoryError::from)
    }

    /// Substring scan fallback for queries FTS cannot serve.
    pub(crate) fn substring_candidates(
        &self,
        query: &str,
        layer: Option<Layer>,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let tokens = crate::retrieval::tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.read()?;
        let layer_clause = match layer {
            Some(l) => format!("AND layer = '{}'", l.as_str()),
            None => String::new(),
        };
        let like_clauses: Vec<String> = (0..tokens.len())
            .map(|i| {
                let p = i + 3;
                format!("summary LIKE ?{p} OR body_text LIKE ?{p}")
            })
            .collect();
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE kind != 'retrieve' AND id != '{SYSTEM_MEMORY_ID}'
               AND (json_extract(scope_json, '$.project_id') = ?1 OR ?1 = '')
               {layer_clause}
               AND ({clauses})
             ORDER BY updated_at DESC LIMIT ?2",
            clauses = like_clauses.join(" OR "),
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut binds: Vec<Box<dyn rusqlite::ToSql>> = vec![
            Box::new(project_id.to_string()),
            Box::new(limit as i64),
        ];
        for token in &tokens {
            binds.push(Box::new(format!("%{token}%")));
        }
        let rows = stmt.query_map(
            rusqlite::params_from_iter(binds.iter().map(|b| b.as_ref())),
            record_from_row,
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MemoryError::from)
    }

    /// Recent activity + last checkpoints for a project.
    pub fn build_brief(&self, project_id: &str, limit: usize) -> Result<Brief> {
        let conn = self.read()?;
        let recent = brief_query(
            &conn,
            "SELECT id, layer, kind, summary, updated_at FROM memories
             WHERE (json_extract(scope_json, '$.project_id') = ?1 OR ?1 = '')
               AND kind != 'retrieve' AND id != 'system000'
             ORDER BY updated_at DESC LIMIT ?2",
            project_id,
            limit as i64,
        )?;
        let checkpoints = brief_query(
            &conn,
            "SELECT id, layer, kind, summary, updated_at FROM memories
             WHERE kind = 'checkpoint'
               AND (json_extract(scope_json, '$.project_id') = ?1 OR ?1 = '')
             ORDER BY updated_at DESC LIMIT ?2",
            project_id,
            3,
        )?;
        Ok(Brief {
            project_id: project_id.to_string(),
            recent,
            checkpoints,
        })
    }

    // ========================================================================
    // LINKS
    // ========================================================================

    /// Insert or refresh derived edges.
    pub fn add_links(&self, edges: &[Edge]) -> Result<usize> {
        let mut conn = self.write()?;
        let tx = conn.transaction()?;
        let mut added = 0usize;
        for edge in edges {
            let out = tx.execute(
                "INSERT OR REPLACE INTO memory_links(src_id, dst_id, weight, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    edge.src_id,
                    edge.dst_id,
                    edge.weight,
                    edge.kind.as_str(),
                    edge.created_at
                ],
            );
            match out {
                Ok(_) => added += 1,
                // Edges to rows that vanished under us (prune race) are noise.
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    tracing::debug!(src = %edge.src_id, dst = %edge.dst_id, "skipping dangling edge");
                }
                Err(err) => return Err(err.into()),
            }
        }
        tx.commit()?;
        Ok(added)
    }

    /// Outgoing edges above a weight floor, strongest first.
    pub fn links_from(&self, src_id: &str, min_weight: f64, limit: usize) -> Result<Vec<Edge>> {
        let conn = self.read()?;
        let mut stmt = conn.prepare(
            "SELECT src_id, dst_id, weight, kind, created_at FROM memory_links
             WHERE src_id = ?1 AND weight >= ?2
             ORDER BY weight DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![src_id, min_weight, limit as i64], |row| {
            let kind_raw: String = row.get(3)?;
            let kind = EdgeKind::from_str(&kind_raw).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            Ok(Edge {
                src_id: row.get(0)?,
                dst_id: row.get(1)?,
                weight: row.get(2)?,
                kind,
                created_at: row.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(MemoryError::from)
    }

    // ========================================================================
    // REINDEX / VERIFY / PRUNE
    // ========================================================================

    /// Rebuild the relational view from the event log. Idempotent; with
    /// `reset` the view is cleared first (system memory excepted).
    pub fn reindex(&self, reset: bool) -> Result<ReindexReport> {
        self.ensure_system_memory()?;
        let mut events_parsed = 0usize;
        let mut memories_indexed = 0usize;
        let mut events_skipped = 0usize;
        let mut issues: Vec<String> = Vec::new();

        let jsonl_files;
        {
            let mut conn = self.write()?;
            let tx = conn.transaction()?;
            if reset {
                tx.execute("DELETE FROM memory_events", [])?;
                tx.execute("DELETE FROM memory_refs", [])?;
                tx.execute("DELETE FROM memory_links", [])?;
                tx.execute(
                    "DELETE FROM memories WHERE id != ?1",
                    params![SYSTEM_MEMORY_ID],
                )?;
            }

            jsonl_files = event_log::for_each_line(&self.paths.jsonl_root, |line| {
                events_parsed += 1;
                let mut event = match line {
                    ParsedLine::Event(event) => event,
                    ParsedLine::UnknownType(name) => {
                        tracing::warn!(event_type = %name, "skipping unknown event type");
                        events_skipped += 1;
                        return;
                    }
                    ParsedLine::Corrupt(snippet) => {
                        tracing::warn!(line = %snippet, "skipping corrupt event line");
                        events_skipped += 1;
                        return;
                    }
                };

                if let Some(env_value) = event.payload.get("envelope") {
                    match serde_json::from_value::<Envelope>(env_value.clone()) {
                        Ok(envelope) => {
                            let body = match markdown::read_markdown(
                                &self.paths.markdown_root,
                                &envelope.body_md_path,
                            ) {
                                Ok(Some(body)) => body,
                                Ok(None) => {
                                    issues.push(format!(
                                        "missing_markdown:{}:{}",
                                        envelope.id, envelope.body_md_path
                                    ));
                                    String::new()
                                }
                                Err(_) => String::new(),
                            };
                            match upsert_record(&tx, &envelope, &body) {
                                Ok(()) => memories_indexed += 1,
                                Err(_) => {
                                    events_skipped += 1;
                                    return;
                                }
                            }
                        }
                        Err(_) => {
                            events_skipped += 1;
                            return;
                        }
                    }
                }

                if event.memory_id.is_empty() {
                    event.memory_id = SYSTEM_MEMORY_ID.to_string();
                }
                if insert_event_row(&tx, &event).is_err() {
                    events_skipped += 1;
                }
            })?;
            tx.commit()?;
        }

        let report = ReindexReport {
            ok: true,
            reset,
            jsonl_files,
            events_parsed,
            memories_indexed,
            events_skipped,
            issues,
        };
        self.record_system_event(
            EventType::Update,
            json!({
                "action": "reindex",
                "reset": report.reset,
                "jsonl_files": report.jsonl_files,
                "events_parsed": report.events_parsed,
                "memories_indexed": report.memories_indexed,
                "events_skipped": report.events_skipped,
            }),
        )?;
        Ok(report)
    }

    /// Check every stored invariant: body files exist and hash-match, event
    /// lines parse and carry allowed types. Issues are collected, not thrown.
    pub fn verify(&self) -> Result<VerifyReport> {
        self.ensure_system_memory()?;
        let mut issues: Vec<String> = Vec::new();
        let table_count;
        let mut checked = 0i64;
        {
            let conn = self.read()?;
            table_count = conn.query_row(
                "SELECT count(*) FROM sqlite_master WHERE type IN ('table','view')",
                [],
                |r| r.get(0),
            )?;
            let mut stmt = conn.prepare(
                "SELECT id, body_md_path, integrity_json FROM memories ORDER BY updated_at DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            for row in rows {
                let (id, rel_path, integrity_json) = row?;
                checked += 1;
                let Some(data) = markdown::read_markdown(&self.paths.markdown_root, &rel_path)?
                else {
                    issues.push(format!("missing_markdown:{id}:{rel_path}"));
                    continue;
                };
                let expected = serde_json::from_str::<Integrity>(&integrity_json)
                    .map(|i| i.content_sha256)
                    .unwrap_or_default();
                if expected != sha256_hex(&data) {
                    issues.push(format!("hash_mismatch:{id}"));
                }
            }
        }

        let mut jsonl_count = 0i64;
        let mut bad_jsonl = 0i64;
        event_log::for_each_line(&self.paths.jsonl_root, |line| {
            jsonl_count += 1;
            match line {
                ParsedLine::Event(_) => {}
                ParsedLine::UnknownType(_) | ParsedLine::Corrupt(_) => bad_jsonl += 1,
            }
        })?;
        if bad_jsonl > 0 {
            issues.push(format!("jsonl_invalid_lines:{bad_jsonl}"));
        }

        let report = VerifyReport {
            ok: issues.is_empty(),
            sqlite_table_view_count: table_count,
            memory_rows_checked: checked,
            jsonl_events_checked: jsonl_count,
            issues,
        };
        self.record_system_event(
            EventType::Verify,
            json!({
                "ok": report.ok,
                "issues": report.issues,
                "memory_rows_checked": report.memory_rows_checked,
                "jsonl_events_checked": report.jsonl_events_checked,
            }),
        )?;
        Ok(report)
    }

    /// Remove a bounded set of low-value rows. Keep-kinds and the system
    /// memory are never touched; bodies and log lines stay on disk.
    pub fn prune_memories(&self, opts: &PruneOptions) -> Result<PruneReport> {
        let cutoff = crate::memory::format_ts(Utc::now() - chrono::Duration::days(opts.days));
        let layer_list = sql_string_list(opts.layers.iter().map(Layer::as_str));
        let keep_list = sql_string_list(opts.keep_kinds.iter().map(Kind::as_str));
        let sql = format!(
            "SELECT id FROM memories
             WHERE id != '{SYSTEM_MEMORY_ID}'
               AND updated_at < ?1
               AND layer IN ({layer_list})
               AND kind NOT IN ({keep_list})
               AND (json_extract(scope_json, '$.project_id') = ?2 OR ?2 = '')
               AND (json_extract(source_json, '$.session_id') = ?3 OR ?3 = '')
             ORDER BY importance_score ASC, reuse_count ASC, updated_at ASC
             LIMIT ?4"
        );
        let ids: Vec<String> = {
            let conn = self.read()?;
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params![cutoff, opts.project_id, opts.session_id, opts.limit as i64],
                |row| row.get(0),
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        if opts.dry_run || ids.is_empty() {
            return Ok(PruneReport {
                ok: true,
                candidates: ids.len(),
                deleted: 0,
                ids,
            });
        }

        let deleted;
        {
            let mut conn = self.write()?;
            let tx = conn.transaction()?;
            let mut n = 0usize;
            for id in &ids {
                n += tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
            }
            tx.commit()?;
            deleted = n;
        }
        self.record_system_event(
            EventType::Update,
            json!({"action": "prune", "deleted": deleted, "ids": ids}),
        )?;
        Ok(PruneReport {
            ok: true,
            candidates: ids.len(),
            deleted,
            ids,
        })
    }
}

// ============================================================================
// ROW HELPERS
// ============================================================================

fn qualified_columns(alias: &str) -> String {
    MEMORY_COLUMNS
        .split(", ")
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn conversion_err(idx: usize, err: MemoryError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

/// Map one canonical row to a record. References are loaded separately.
pub(crate) fn record_from_row(row: &Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let layer_raw: String = row.get(4)?;
    let kind_raw: String = row.get(5)?;
    let tags_json: String = row.get(9)?;
    let cred_refs_json: String = row.get(15)?;
    let source_json: String = row.get(16)?;
    let scope_json: String = row.get(17)?;
    let integrity_json: String = row.get(18)?;

    let envelope = Envelope {
        id: row.get(0)?,
        schema_version: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
        layer: Layer::from_str(&layer_raw).map_err(|e| conversion_err(4, e))?,
        kind: Kind::from_str(&kind_raw).map_err(|e| conversion_err(5, e))?,
        summary: row.get(6)?,
        body_md_path: row.get(7)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        refs: Vec::new(),
        signals: Signals {
            importance_score: row.get(10)?,
            confidence_score: row.get(11)?,
            stability_score: row.get(12)?,
            reuse_count: row.get(13)?,
            volatility_score: row.get(14)?,
        },
        cred_refs: serde_json::from_str(&cred_refs_json).unwrap_or_default(),
        source: serde_json::from_str(&source_json).unwrap_or_default(),
        scope: serde_json::from_str(&scope_json).unwrap_or_default(),
        integrity: serde_json::from_str(&integrity_json).unwrap_or(Integrity {
            content_sha256: String::new(),
            envelope_version: ENVELOPE_VERSION,
        }),
    };
    Ok(MemoryRecord {
        envelope,
        body_text: row.get(8)?,
    })
}

fn load_refs(conn: &Connection, memory_id: &str) -> Result<Vec<Reference>> {
    let mut stmt = conn.prepare(
        "SELECT ref_type, target, note FROM memory_refs WHERE memory_id = ?1",
    )?;
    let rows = stmt.query_map(params![memory_id], |row| {
        Ok(Reference {
            ref_type: row.get(0)?,
            target: row.get(1)?,
            note: row.get(2)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(MemoryError::from)
}

/// Upsert the row projection of an envelope (plus its references).
pub(crate) fn upsert_record(conn: &Connection, envelope: &Envelope, body_text: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO memories(
           id, schema_version, created_at, updated_at, layer, kind, summary, body_md_path,
           body_text, tags_json, importance_score, confidence_score, stability_score,
           reuse_count, volatility_score, cred_refs_json, source_json, scope_json, integrity_json
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            envelope.id,
            envelope.schema_version,
            envelope.created_at,
            envelope.updated_at,
            envelope.layer.as_str(),
            envelope.kind.as_str(),
            envelope.summary,
            envelope.body_md_path,
            body_text,
            serde_json::to_string(&envelope.tags)?,
            envelope.signals.importance_score,
            envelope.signals.confidence_score,
            envelope.signals.stability_score,
            envelope.signals.reuse_count,
            envelope.signals.volatility_score,
            serde_json::to_string(&envelope.cred_refs)?,
            serde_json::to_string(&envelope.source)?,
            serde_json::to_string(&envelope.scope)?,
            serde_json::to_string(&envelope.integrity)?,
        ],
    )?;
    conn.execute(
        "DELETE FROM memory_refs WHERE memory_id = ?1",
        params![envelope.id],
    )?;
    for r in &envelope.refs {
        conn.execute(
            "INSERT INTO memory_refs(memory_id, ref_type, target, note) VALUES (?1, ?2, ?3, ?4)",
            params![envelope.id, r.ref_type, r.target, r.note],
        )?;
    }
    Ok(())
}

pub(crate) fn insert_event_row(conn: &Connection, event: &Event) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO memory_events(event_id, event_type, event_time, memory_id, payload_json)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.event_id,
            event.event_type.as_str(),
            event.event_time,
            event.memory_id,
            serde_json::to_string(&event.payload)?,
        ],
    )?;
    Ok(())
}

fn brief_query(
    conn: &Connection,
    sql: &str,
    project_id: &str,
    limit: i64,
) -> Result<Vec<BriefItem>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![project_id, limit], |row| {
        let layer_raw: String = row.get(1)?;
        let kind_raw: String = row.get(2)?;
        Ok(BriefItem {
            id: row.get(0)?,
            layer: Layer::from_str(&layer_raw).map_err(|e| conversion_err(1, e))?,
            kind: Kind::from_str(&kind_raw).map_err(|e| conversion_err(2, e))?,
            summary: row.get(3)?,
            updated_at: row.get(4)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(MemoryError::from)
}

/// Standard event payload carrying the full envelope, with optional extra
/// keys merged in (promotion before/after, feedback details).
fn envelope_payload(envelope: &Envelope, extra: Value) -> Result<Value> {
    let mut payload = json!({
        "summary": envelope.summary,
        "layer": envelope.layer,
        "kind": envelope.kind,
        "body_md_path": envelope.body_md_path,
        "envelope": envelope,
    });
    if let (Some(obj), Value::Object(extra_map)) = (payload.as_object_mut(), extra) {
        for (k, v) in extra_map {
            obj.insert(k, v);
        }
    }
    Ok(payload)
}

/// Quote FTS terms so user queries cannot smuggle MATCH syntax. Terms are
/// OR-joined: seeds are intentionally broad, the ranker narrows.
pub(crate) fn sanitize_match_query(query: &str) -> Option<String> {
    let tokens = crate::retrieval::tokenize(query);
    if tokens.is_empty() {
        return None;
    }
    Some(
        tokens
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn sql_string_list<'a>(values: impl Iterator<Item = &'a str>) -> String {
    let mut list: Vec<String> = values.map(|v| format!("'{v}'")).collect();
    if list.is_empty() {
        list.push("''".to_string());
    }
    list.join(", ")
}

fn dedup_in_order(values: &mut Vec<String>) {
    let mut seen = HashSet::new();
    values.retain(|v| seen.insert(v.clone()));
}

// ============================================================================
// TESTS
// ============================================================================
