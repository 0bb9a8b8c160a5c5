//! Session compression, distillation, and the temporal memory tree.
//!
//! All three create digest memories that reference their sources; sources
//! are never deleted here. Digest-to-source edges use the `distill` kind so
//! retrieval can walk from a digest back to the evidence.

use std::collections::BTreeMap;

use rusqlite::params;
use serde::Serialize;

use crate::error::Result;
use crate::graph::{Edge, EdgeKind};
use crate::memory::{format_ts, Kind, Layer, Reference, Scope, Signals, Source};
use crate::store::{MemoryStore, WriteInput};

const COMPRESS_TAG: &str = "auto:compress";
const DISTILL_TAG: &str = "auto:distill";
const TEMPORAL_TAG: &str = "auto:temporal";

// ============================================================================
// SESSION COMPRESSION
// ============================================================================

#[derive(Debug, Clone)]
pub struct CompressOptions {
    pub project_id: String,
    pub session_id: String,
    /// Sessions below this many items are left alone.
    pub min_items: usize,
    pub per_session_limit: usize,
    pub dry_run: bool,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            session_id: String::new(),
            min_items: 8,
            per_session_limit: 120,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompressReport {
    pub ok: bool,
    pub session_id: String,
    pub compressed: bool,
    pub count: usize,
    pub summary_preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
}

#[derive(Clone)]
struct SessionRow {
    id: String,
    layer: String,
    kind: String,
    summary: String,
    created_at: String,
}

fn session_rows(
    store: &MemoryStore,
    project_id: &str,
    session_id: &str,
    limit: usize,
) -> Result<Vec<SessionRow>> {
    let conn = store.read()?;
    let mut stmt = conn.prepare(
        "SELECT id, layer, kind, summary, created_at FROM memories
         WHERE kind != 'retrieve' AND id != 'system000'
           AND tags_json NOT LIKE '%auto:compress%'
           AND tags_json NOT LIKE '%auto:distill%'
           AND tags_json NOT LIKE '%auto:temporal%'
           AND json_extract(source_json, '$.session_id') = ?1
           AND (json_extract(scope_json, '$.project_id') = ?2 OR ?2 = '')
         ORDER BY created_at ASC
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![session_id, project_id, limit as i64], |row| {
        Ok(SessionRow {
            id: row.get(0)?,
            layer: row.get(1)?,
            kind: row.get(2)?,
            summary: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(crate::error::MemoryError::from)
}

fn digest_body(rows: &[SessionRow]) -> String {
    let mut lines = Vec::with_capacity(rows.len());
    for row in rows {
        lines.push(format!(
            "- [{}/{}] {} (id={})",
            row.layer,
            row.kind,
            row.summary,
            &row.id[..row.id.len().min(8)]
        ));
    }
    lines.join("\n")
}

fn write_digest(
    store: &MemoryStore,
    layer: Layer,
    summary: String,
    body: String,
    tags: Vec<String>,
    project_id: &str,
    session_id: &str,
    source_ids: &[String],
) -> Result<String> {
    let outcome = store.write_memory(WriteInput {
        layer,
        kind: Kind::Summary,
        summary,
        body,
        tags,
        refs: source_ids.iter().map(Reference::memory).collect(),
        source: Source {
            tool: "governor".to_string(),
            session_id: session_id.to_string(),
            ..Source::default()
        },
        scope: Scope {
            project_id: project_id.to_string(),
            workspace: String::new(),
        },
        signals: Signals {
            importance_score: 0.7,
            confidence_score: 0.75,
            stability_score: 0.7,
            reuse_count: 0,
            volatility_score: 0.2,
        },
        ..WriteInput::default()
    })?;
    let digest_id = outcome.envelope.id;
    let edges: Vec<Edge> = source_ids
        .iter()
        .map(|src| Edge::new(digest_id.clone(), src.clone(), 0.8, EdgeKind::Distill))
        .collect();
    store.add_links(&edges)?;
    Ok(digest_id)
}

/// Compress one session into a `Session digest:` summary memory.
pub fn compress_session_context(
    store: &MemoryStore,
    opts: &CompressOptions,
) -> Result<CompressReport> {
    let rows = session_rows(store, &opts.project_id, &opts.session_id, opts.per_session_limit)?;
    let count = rows.len();
    let summary = format!("Session digest: {} ({count} items)", opts.session_id);
    let body = digest_body(&rows);
    let preview: String = body.chars().take(400).collect();

    if count < opts.min_items || opts.dry_run {
        return Ok(CompressReport {
            ok: true,
            session_id: opts.session_id.clone(),
            compressed: false,
            count,
            summary_preview: preview,
            memory_id: None,
        });
    }

    let source_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let digest_id = write_digest(
        store,
        Layer::Short,
        summary,
        body,
        vec![
            COMPRESS_TAG.to_string(),
            format!("project:{}", opts.project_id),
        ],
        &opts.project_id,
        &opts.session_id,
        &source_ids,
    )?;

    Ok(CompressReport {
        ok: true,
        session_id: opts.session_id.clone(),
        compressed: true,
        count,
        summary_preview: preview,
        memory_id: Some(digest_id),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct HotSessionsReport {
    pub ok: bool,
    pub sessions: Vec<String>,
    pub items: Vec<CompressReport>,
}

/// Compress the busiest sessions first.
pub fn compress_hot_sessions(
    store: &MemoryStore,
    project_id: &str,
    max_sessions: usize,
    per_session_limit: usize,
    min_items: usize,
    dry_run: bool,
) -> Result<HotSessionsReport> {
    let sessions = hot_sessions(store, project_id, max_sessions)?;
    let mut items = Vec::with_capacity(sessions.len());
    for session_id in &sessions {
        items.push(compress_session_context(
            store,
            &CompressOptions {
                project_id: project_id.to_string(),
                session_id: session_id.clone(),
                min_items,
                per_session_limit,
                dry_run,
            },
        )?);
    }
    Ok(HotSessionsReport {
        ok: true,
        sessions,
        items,
    })
}

/// Busiest non-system sessions by non-retrieve memory count.
pub(crate) fn hot_sessions(
    store: &MemoryStore,
    project_id: &str,
    max_sessions: usize,
) -> Result<Vec<String>> {
    let conn = store.read()?;
    let mut stmt = conn.prepare(
        "SELECT COALESCE(json_extract(source_json, '$.session_id'), '') AS sid, COUNT(*) AS c
         FROM memories
         WHERE kind != 'retrieve'
           AND COALESCE(json_extract(source_json, '$.session_id'), '') != ''
           AND (json_extract(scope_json, '$.project_id') = ?1 OR ?1 = '')
         GROUP BY sid
         ORDER BY c DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![project_id, (max_sessions.max(1) * 3) as i64], |row| {
        row.get::<_, String>(0)
    })?;
    let mut out = Vec::new();
    for row in rows {
        let sid = row?;
        if sid == "system" || sid == "webui-session" || sid.trim().is_empty() {
            continue;
        }
        out.push(sid);
        if out.len() >= max_sessions.max(1) {
            break;
        }
    }
    Ok(out)
}

// ============================================================================
// DISTILLATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct DistillOptions {
    pub project_id: String,
    pub session_id: String,
    pub limit: usize,
    pub min_items: usize,
    pub semantic_layer: Layer,
    pub procedural_layer: Layer,
    pub dry_run: bool,
}

impl Default for DistillOptions {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            session_id: String::new(),
            limit: 140,
            min_items: 12,
            semantic_layer: Layer::Long,
            procedural_layer: Layer::Short,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DistillReport {
    pub ok: bool,
    pub session_id: String,
    pub distilled: bool,
    pub semantic_count: usize,
    pub procedural_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub procedural_id: Option<String>,
}

const PROCEDURAL_MARKERS: &[&str] = &[
    "how to", "steps", "command", "run ", "install", "configure", "script",
];

fn is_procedural(row: &SessionRow) -> bool {
    if row.kind == "task" || row.kind == "checkpoint" {
        return true;
    }
    let lowered = row.summary.to_lowercase();
    PROCEDURAL_MARKERS.iter().any(|m| lowered.contains(m))
}

/// Split a hot session into semantic and procedural digests.
pub fn distill_session_memory(
    store: &MemoryStore,
    opts: &DistillOptions,
) -> Result<DistillReport> {
    let rows = session_rows(store, &opts.project_id, &opts.session_id, opts.limit)?;
    if rows.len() < opts.min_items || opts.dry_run {
        return Ok(DistillReport {
            ok: true,
            session_id: opts.session_id.clone(),
            distilled: false,
            semantic_count: 0,
            procedural_count: 0,
            semantic_id: None,
            procedural_id: None,
        });
    }

    let (procedural, semantic): (Vec<&SessionRow>, Vec<&SessionRow>) =
        rows.iter().partition(|r| is_procedural(r));

    let mut semantic_id = None;
    let mut procedural_id = None;
    for (cluster, layer, label, slot) in [
        (&semantic, opts.semantic_layer, "Semantic", &mut semantic_id),
        (
            &procedural,
            opts.procedural_layer,
            "Procedural",
            &mut procedural_id,
        ),
    ] {
        if cluster.len() < 2 {
            continue;
        }
        let ids: Vec<String> = cluster.iter().map(|r| r.id.clone()).collect();
        let body = cluster
            .iter()
            .map(|r| format!("- {} (id={})", r.summary, &r.id[..r.id.len().min(8)]))
            .collect::<Vec<_>>()
            .join("\n");
        let digest = write_digest(
            store,
            layer,
            format!("{label} digest: {}", opts.session_id),
            body,
            vec![
                DISTILL_TAG.to_string(),
                format!("project:{}", opts.project_id),
            ],
            &opts.project_id,
            &opts.session_id,
            &ids,
        )?;
        *slot = Some(digest);
    }

    Ok(DistillReport {
        ok: true,
        session_id: opts.session_id.clone(),
        distilled: semantic_id.is_some() || procedural_id.is_some(),
        semantic_count: semantic.len(),
        procedural_count: procedural.len(),
        semantic_id,
        procedural_id,
    })
}

// ============================================================================
// TEMPORAL TREE
// ============================================================================

#[derive(Debug, Clone)]
pub struct TemporalTreeOptions {
    pub project_id: String,
    pub days: i64,
    pub max_sessions: usize,
    pub per_session_limit: usize,
    pub dry_run: bool,
}

impl Default for TemporalTreeOptions {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            days: 30,
            max_sessions: 8,
            per_session_limit: 120,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TemporalTreeReport {
    pub ok: bool,
    pub made: usize,
    pub temporal_links: usize,
    pub distill_links: usize,
}

fn digest_exists(store: &MemoryStore, summary: &str) -> Result<bool> {
    let conn = store.read()?;
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM memories WHERE summary = ?1",
        params![summary],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

/// Build session -> day -> leaf digests over the recent window, expressed as
/// `temporal` and `distill` edges.
pub fn build_temporal_tree(
    store: &MemoryStore,
    opts: &TemporalTreeOptions,
) -> Result<TemporalTreeReport> {
    let cutoff = format_ts(chrono::Utc::now() - chrono::Duration::days(opts.days));
    let mut made = 0usize;
    let mut temporal_links = 0usize;
    let mut distill_links = 0usize;

    for session_id in hot_sessions(store, &opts.project_id, opts.max_sessions)? {
        let rows = session_rows(store, &opts.project_id, &session_id, opts.per_session_limit)?;
        let recent: Vec<&SessionRow> = rows
            .iter()
            .filter(|r| r.created_at.as_str() >= cutoff.as_str())
            .collect();
        if recent.len() < 2 {
            continue;
        }
        let session_summary = format!("Session timeline: {session_id}");
        if opts.dry_run || digest_exists(store, &session_summary)? {
            continue;
        }

        // Day buckets keyed by the date prefix of created_at.
        let mut by_day: BTreeMap<String, Vec<&SessionRow>> = BTreeMap::new();
        for row in &recent {
            let day = row.created_at.chars().take(10).collect::<String>();
            by_day.entry(day).or_default().push(*row);
        }

        let leaf_ids: Vec<String> = recent.iter().map(|r| r.id.clone()).collect();
        let session_node = write_digest(
            store,
            Layer::Short,
            session_summary,
            format!("{} items across {} days", recent.len(), by_day.len()),
            vec![
                TEMPORAL_TAG.to_string(),
                format!("project:{}", opts.project_id),
            ],
            &opts.project_id,
            &session_id,
            &leaf_ids,
        )?;
        made += 1;
        distill_links += leaf_ids.len();

        let mut edges = Vec::new();
        for (day, day_rows) in &by_day {
            let day_ids: Vec<String> = day_rows.iter().map(|r| r.id.clone()).collect();
            let day_node = write_digest(
                store,
                Layer::Short,
                format!("Day digest: {session_id} {day}"),
                digest_body(&day_rows.iter().map(|r| (*r).clone()).collect::<Vec<_>>()),
                vec![
                    TEMPORAL_TAG.to_string(),
                    format!("project:{}", opts.project_id),
                ],
                &opts.project_id,
                &session_id,
                &day_ids,
            )?;
            made += 1;
            distill_links += day_ids.len();
            edges.push(Edge::new(
                session_node.clone(),
                day_node.clone(),
                0.9,
                EdgeKind::Temporal,
            ));
            temporal_links += 1;
            for leaf in &day_ids {
                edges.push(Edge::new(day_node.clone(), leaf.clone(), 0.7, EdgeKind::Temporal));
                temporal_links += 1;
            }
        }
        store.add_links(&edges)?;
    }

    Ok(TemporalTreeReport {
        ok: true,
        made,
        temporal_links,
        distill_links,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{open_test_store, write_simple};

    #[test]
    fn test_compress_below_threshold_is_noop() {
        let (store, _dir) = open_test_store();
        for i in 0..3 {
            write_simple(&store, &format!("item {i}"), "OM", "s-compress");
        }
        let out = compress_session_context(
            &store,
            &CompressOptions {
                project_id: "OM".to_string(),
                session_id: "s-compress".to_string(),
                ..CompressOptions::default()
            },
        )
        .unwrap();
        assert!(!out.compressed);
        assert_eq!(out.count, 3);
    }

    #[test]
    fn test_compress_preview_and_apply() {
        let (store, _dir) = open_test_store();
        for i in 0..10 {
            write_simple(&store, &format!("session item {i}"), "OM", "s-compress");
        }
        let preview = compress_session_context(
            &store,
            &CompressOptions {
                project_id: "OM".to_string(),
                session_id: "s-compress".to_string(),
                dry_run: true,
                ..CompressOptions::default()
            },
        )
        .unwrap();
        assert!(!preview.compressed);
        assert!(!preview.summary_preview.is_empty());

        let applied = compress_session_context(
            &store,
            &CompressOptions {
                project_id: "OM".to_string(),
                session_id: "s-compress".to_string(),
                ..CompressOptions::default()
            },
        )
        .unwrap();
        assert!(applied.compressed);
        let digest_id = applied.memory_id.unwrap();
        let digest = store.get_memory(&digest_id).unwrap().unwrap();
        assert!(digest.envelope.summary.starts_with("Session digest:"));
        assert_eq!(digest.envelope.refs.len(), 10);
        assert_eq!(store.links_from(&digest_id, 0.1, 50).unwrap().len(), 10);

        // Digests never feed a second compression round.
        let again = compress_session_context(
            &store,
            &CompressOptions {
                project_id: "OM".to_string(),
                session_id: "s-compress".to_string(),
                ..CompressOptions::default()
            },
        )
        .unwrap();
        assert_eq!(again.count, 10);
    }

    #[test]
    fn test_distill_splits_clusters() {
        let (store, _dir) = open_test_store();
        for i in 0..7 {
            write_simple(&store, &format!("fact about the schema {i}"), "OM", "s-d");
        }
        for i in 0..7 {
            write_simple(&store, &format!("how to run migration {i}"), "OM", "s-d");
        }
        let out = distill_session_memory(
            &store,
            &DistillOptions {
                project_id: "OM".to_string(),
                session_id: "s-d".to_string(),
                min_items: 12,
                ..DistillOptions::default()
            },
        )
        .unwrap();
        assert!(out.distilled);
        assert!(out.semantic_count >= 2 && out.procedural_count >= 2);
        let semantic = store
            .get_memory(out.semantic_id.as_ref().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(semantic.envelope.layer, Layer::Long);
        let procedural = store
            .get_memory(out.procedural_id.as_ref().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(procedural.envelope.layer, Layer::Short);
    }

    #[test]
    fn test_temporal_tree_builds_once() {
        let (store, _dir) = open_test_store();
        for i in 0..6 {
            write_simple(&store, &format!("timeline item {i}"), "OM", "s-t");
        }
        let first = build_temporal_tree(
            &store,
            &TemporalTreeOptions {
                project_id: "OM".to_string(),
                ..TemporalTreeOptions::default()
            },
        )
        .unwrap();
        assert!(first.made >= 2);
        assert!(first.temporal_links >= 1);
        assert!(first.distill_links >= 6);

        let second = build_temporal_tree(
            &store,
            &TemporalTreeOptions {
                project_id: "OM".to_string(),
                ..TemporalTreeOptions::default()
            },
        )
        .unwrap();
        assert_eq!(second.made, 0);
    }
}
