//! Rehearsal and reflection.
//!
//! Rehearsal counters decay for rows that matter but are rarely recalled.
//! Reflection notices topics that keep coming back across sessions without
//! being retrieved much and writes a durable summary of the pattern.

use std::collections::{HashMap, HashSet};

use rusqlite::params;
use serde::Serialize;
use serde_json::json;

use crate::error::Result;
use crate::graph::{Edge, EdgeKind};
use crate::memory::{format_ts, EventType, Kind, Layer, Reference, Scope, Signals, Source};
use crate::store::{MemoryStore, WriteInput};

const REFLECTION_TAG: &str = "auto:reflection";

// ============================================================================
// REHEARSAL
// ============================================================================

#[derive(Debug, Clone)]
pub struct RehearsalOptions {
    pub project_id: String,
    /// Only rows older than this get rehearsed.
    pub days: i64,
    pub limit: usize,
    /// Floor on importance for a row to be worth rehearsing.
    pub min_importance: f64,
    /// Ceiling on reuse for a row to count as under-recalled.
    pub max_reuse: i64,
    pub dry_run: bool,
}

impl Default for RehearsalOptions {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            days: 45,
            limit: 16,
            min_importance: 0.6,
            max_reuse: 1,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RehearsalReport {
    pub ok: bool,
    pub selected_count: usize,
    pub ids: Vec<String>,
}

/// Bump reuse on low-reuse, high-importance rows to counter decay.
pub fn rehearse_memory_traces(
    store: &MemoryStore,
    opts: &RehearsalOptions,
) -> Result<RehearsalReport> {
    let cutoff = format_ts(chrono::Utc::now() - chrono::Duration::days(opts.days));
    let ids: Vec<String> = {
        let conn = store.read()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM memories
             WHERE id != 'system000' AND kind != 'retrieve'
               AND updated_at < ?1
               AND importance_score >= ?2
               AND reuse_count <= ?3
               AND (json_extract(scope_json, '$.project_id') = ?4 OR ?4 = '')
             ORDER BY importance_score DESC, updated_at ASC
             LIMIT ?5",
        )?;
        let rows = stmt.query_map(
            params![
                cutoff,
                opts.min_importance,
                opts.max_reuse,
                opts.project_id,
                opts.limit as i64
            ],
            |row| row.get::<_, String>(0),
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    if !opts.dry_run {
        for id in &ids {
            store.mutate_memory(
                id,
                EventType::Update,
                json!({"action": "rehearsal"}),
                |envelope, _| {
                    envelope.signals.reuse_count += 1;
                    Ok(None)
                },
            )?;
        }
    }

    Ok(RehearsalReport {
        ok: true,
        selected_count: ids.len(),
        ids,
    })
}

// ============================================================================
// REFLECTION
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReflectionOptions {
    pub project_id: String,
    pub days: i64,
    /// Max reflections per pass.
    pub limit: usize,
    /// Topic must span at least this many sessions.
    pub min_repeats: usize,
    /// Topic rows must average at most this much reuse.
    pub max_avg_retrieved: f64,
    pub dry_run: bool,
}

impl Default for ReflectionOptions {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            days: 14,
            limit: 4,
            min_repeats: 2,
            max_avg_retrieved: 2.0,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReflectionReport {
    pub ok: bool,
    pub created_count: usize,
    pub topics: Vec<String>,
    pub created_ids: Vec<String>,
}

struct TopicStats {
    sessions: HashSet<String>,
    reuse_sum: i64,
    ids: Vec<String>,
}

/// Create summary memories for recurring, under-retrieved topics.
pub fn trigger_reflective_summaries(
    store: &MemoryStore,
    opts: &ReflectionOptions,
) -> Result<ReflectionReport> {
    let cutoff = format_ts(chrono::Utc::now() - chrono::Duration::days(opts.days));
    let mut topics: HashMap<String, TopicStats> = HashMap::new();
    {
        let conn = store.read()?;
        let mut stmt = conn.prepare(
            "SELECT id, tags_json, reuse_count,
                    COALESCE(json_extract(source_json, '$.session_id'), '') AS sid
             FROM memories
             WHERE id != 'system000' AND kind != 'retrieve'
               AND updated_at >= ?1
               AND tags_json NOT LIKE '%auto:reflection%'
               AND (json_extract(scope_json, '$.project_id') = ?2 OR ?2 = '')",
        )?;
        let rows = stmt.query_map(params![cutoff, opts.project_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        for row in rows {
            let (id, tags_json, reuse, session) = row?;
            let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
            for tag in tags {
                if tag.contains(':') {
                    // Structured tags (project:, auto:, feedback:) are not topics.
                    continue;
                }
                let stats = topics.entry(tag).or_insert_with(|| TopicStats {
                    sessions: HashSet::new(),
                    reuse_sum: 0,
                    ids: Vec::new(),
                });
                stats.sessions.insert(session.clone());
                stats.reuse_sum += reuse;
                stats.ids.push(id.clone());
            }
        }
    }

    let mut candidates: Vec<(String, TopicStats)> = topics
        .into_iter()
        .filter(|(_, stats)| {
            stats.sessions.len() >= opts.min_repeats
                && (stats.reuse_sum as f64 / stats.ids.len().max(1) as f64)
                    <= opts.max_avg_retrieved
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.1.sessions
            .len()
            .cmp(&a.1.sessions.len())
            .then_with(|| a.0.cmp(&b.0))
    });
    candidates.truncate(opts.limit);

    let mut created_ids = Vec::new();
    let mut created_topics = Vec::new();
    for (topic, stats) in &candidates {
        let summary = format!("Reflection: recurring topic '{topic}'");
        if reflection_exists(store, &summary)? {
            continue;
        }
        created_topics.push(topic.clone());
        if opts.dry_run {
            continue;
        }
        let sources: Vec<String> = stats.ids.iter().take(8).cloned().collect();
        let outcome = store.write_memory(WriteInput {
            layer: Layer::Long,
            kind: Kind::Summary,
            summary,
            body: format!(
                "Topic '{topic}' recurred across {} sessions in the last {} days but was \
                 rarely retrieved (avg reuse {:.2}). Candidate for promotion or curation.",
                stats.sessions.len(),
                opts.days,
                stats.reuse_sum as f64 / stats.ids.len().max(1) as f64,
            ),
            tags: vec![
                REFLECTION_TAG.to_string(),
                topic.clone(),
                format!("project:{}", opts.project_id),
            ],
            refs: sources.iter().map(Reference::memory).collect(),
            source: Source {
                tool: "governor".to_string(),
                session_id: "system".to_string(),
                ..Source::default()
            },
            scope: Scope {
                project_id: opts.project_id.clone(),
                workspace: String::new(),
            },
            signals: Signals {
                importance_score: 0.75,
                confidence_score: 0.7,
                stability_score: 0.7,
                reuse_count: 0,
                volatility_score: 0.15,
            },
            ..WriteInput::default()
        })?;
        let id = outcome.envelope.id;
        let edges: Vec<Edge> = sources
            .iter()
            .map(|src| Edge::new(id.clone(), src.clone(), 0.7, EdgeKind::Distill))
            .collect();
        store.add_links(&edges)?;
        created_ids.push(id);
    }

    Ok(ReflectionReport {
        ok: true,
        created_count: created_ids.len(),
        topics: created_topics,
        created_ids,
    })
}

fn reflection_exists(store: &MemoryStore, summary: &str) -> Result<bool> {
    let conn = store.read()?;
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM memories WHERE summary = ?1",
        params![summary],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

// ============================================================================
// TESTS
// ============================================================================
