//! Link weaver - derives weighted edges from co-occurrence signals.
//!
//! Affinity between two memories is a weighted sum of tag overlap, session
//! identity, temporal proximity, and summary overlap. The pass is bounded in
//! rows and wall time; on overrun it commits what it has and leaves the rest
//! for the next cycle.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use rusqlite::params;
use serde::Serialize;

use crate::error::Result;
use crate::memory::parse_ts;
use crate::retrieval::{jaccard, token_set};
use crate::store::MemoryStore;

use super::{Edge, EdgeKind};

const W_TAG: f64 = 0.40;
const W_SESSION: f64 = 0.20;
const W_TEMPORAL: f64 = 0.15;
const W_LEXICAL: f64 = 0.25;

/// Temporal proximity halves roughly per day of separation.
const TEMPORAL_SCALE_HOURS: f64 = 24.0;

// ============================================================================
// OPTIONS / REPORT
// ============================================================================

#[derive(Debug, Clone)]
pub struct WeaveOptions {
    pub project_id: String,
    /// Candidate rows per pass.
    pub limit: usize,
    pub min_weight: f64,
    pub max_per_src: usize,
    pub include_archive: bool,
    /// Wall-time cap; exceeded means partial commit.
    pub max_wait: Duration,
}

impl Default for WeaveOptions {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            limit: 220,
            min_weight: 0.18,
            max_per_src: 6,
            include_archive: false,
            max_wait: Duration::from_secs(12),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WeaveReport {
    pub ok: bool,
    pub scanned: usize,
    pub edges_written: usize,
    /// True when the wall-time cap cut the pass short.
    pub truncated: bool,
}

// ============================================================================
// CANDIDATES
// ============================================================================

struct WeaveRow {
    id: String,
    session_id: String,
    created_at_hours: f64,
    tags: HashSet<String>,
    summary_tokens: HashSet<String>,
}

fn load_candidates(store: &MemoryStore, opts: &WeaveOptions) -> Result<Vec<WeaveRow>> {
    let conn = store.read()?;
    let archive_clause = if opts.include_archive {
        ""
    } else {
        "AND layer != 'archive'"
    };
    let sql = format!(
        "SELECT id, summary, created_at, tags_json,
                COALESCE(json_extract(source_json, '$.session_id'), '') AS sid
         FROM memories
         WHERE id != 'system000' AND kind != 'retrieve'
           AND (json_extract(scope_json, '$.project_id') = ?1 OR ?1 = '')
           {archive_clause}
         ORDER BY updated_at DESC
         LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![opts.project_id, opts.limit as i64], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (id, summary, created_at, tags_json, session_id) = row?;
        let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
        out.push(WeaveRow {
            id,
            session_id,
            created_at_hours: parse_ts(&created_at)
                .map(|t| t.timestamp() as f64 / 3600.0)
                .unwrap_or(0.0),
            tags: tags.into_iter().collect(),
            summary_tokens: token_set(&summary),
        });
    }
    Ok(out)
}

/// Component-wise affinity; the dominant component names the edge kind.
fn affinity(a: &WeaveRow, b: &WeaveRow) -> (f64, EdgeKind) {
    let tag = jaccard(&a.tags, &b.tags);
    let session = if !a.session_id.is_empty() && a.session_id == b.session_id {
        1.0
    } else {
        0.0
    };
    let delta_hours = (a.created_at_hours - b.created_at_hours).abs();
    let temporal = 1.0 / (1.0 + delta_hours / TEMPORAL_SCALE_HOURS);
    let lexical = jaccard(&a.summary_tokens, &b.summary_tokens);

    let weight = W_TAG * tag + W_SESSION * session + W_TEMPORAL * temporal + W_LEXICAL * lexical;

    let components = [
        (W_TAG * tag, EdgeKind::TagCooc),
        (W_SESSION * session, EdgeKind::Session),
        (W_TEMPORAL * temporal, EdgeKind::Temporal),
        (W_LEXICAL * lexical, EdgeKind::Lexical),
    ];
    let kind = components
        .iter()
        .max_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, k)| *k)
        .unwrap_or(EdgeKind::Lexical);
    (weight, kind)
}

// ============================================================================
// WEAVE PASS
// ============================================================================

/// Derive edges for the scoped candidate set.
pub fn weave_links(store: &MemoryStore, opts: &WeaveOptions) -> Result<WeaveReport> {
    let started = Instant::now();
    let rows = load_candidates(store, opts)?;
    let mut edges: Vec<Edge> = Vec::new();
    let mut truncated = false;

    for (i, src) in rows.iter().enumerate() {
        if started.elapsed() > opts.max_wait {
            truncated = true;
            break;
        }
        let mut outgoing: Vec<(f64, EdgeKind, &str)> = Vec::new();
        for (j, dst) in rows.iter().enumerate() {
            if i == j {
                continue;
            }
            let (weight, kind) = affinity(src, dst);
            if weight >= opts.min_weight {
                outgoing.push((weight, kind, dst.id.as_str()));
            }
        }
        outgoing.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        for (weight, kind, dst_id) in outgoing.into_iter().take(opts.max_per_src) {
            edges.push(Edge::new(src.id.clone(), dst_id, weight, kind));
        }
    }

    let edges_written = store.add_links(&edges)?;
    if truncated {
        tracing::info!(
            scanned = rows.len(),
            edges_written,
            "weave hit its wall-time cap, committing partial results"
        );
    }
    Ok(WeaveReport {
        ok: true,
        scanned: rows.len(),
        edges_written,
        truncated,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{open_test_store, write_tagged};

    #[test]
    fn test_weave_links_same_session_and_tags() {
        let (store, _dir) = open_test_store();
        let a = write_tagged(&store, "graph alpha shared", "OM", "s-w", &["t1", "t2"], 0.6);
        let b = write_tagged(&store, "graph beta shared", "OM", "s-w", &["t1", "t2"], 0.6);
        write_tagged(&store, "unrelated elsewhere", "OM", "s-other", &["zzz"], 0.6);

        let report = weave_links(
            &store,
            &WeaveOptions {
                project_id: "OM".to_string(),
                ..WeaveOptions::default()
            },
        )
        .unwrap();
        assert!(report.ok);
        assert_eq!(report.scanned, 3);
        assert!(report.edges_written >= 2);

        let out = store.links_from(&a, 0.18, 10).unwrap();
        assert!(out.iter().any(|e| e.dst_id == b));
        // Same session + shared tags + same moment: strong edge.
        assert!(out.iter().find(|e| e.dst_id == b).unwrap().weight > 0.5);
    }

    #[test]
    fn test_max_per_src_caps_outgoing() {
        let (store, _dir) = open_test_store();
        let hub = write_tagged(&store, "hub topic", "OM", "s-w", &["shared"], 0.6);
        for i in 0..10 {
            write_tagged(&store, &format!("spoke {i}"), "OM", "s-w", &["shared"], 0.6);
        }
        weave_links(
            &store,
            &WeaveOptions {
                project_id: "OM".to_string(),
                max_per_src: 3,
                ..WeaveOptions::default()
            },
        )
        .unwrap();
        assert!(store.links_from(&hub, 0.0, 100).unwrap().len() <= 3);
    }

    #[test]
    fn test_zero_wait_commits_partial() {
        let (store, _dir) = open_test_store();
        for i in 0..4 {
            write_tagged(&store, &format!("row {i}"), "OM", "s-w", &["t"], 0.6);
        }
        let report = weave_links(
            &store,
            &WeaveOptions {
                project_id: "OM".to_string(),
                max_wait: Duration::from_secs(0),
                ..WeaveOptions::default()
            },
        )
        .unwrap();
        assert!(report.truncated);
    }
}
