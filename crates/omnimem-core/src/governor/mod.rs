//! Lifecycle governor - layered retention with signal-driven policy.
//!
//! All passes share the same shape: bounded row scans, per-row mutations that
//! re-emit the envelope through the event log, and structured reports with
//! counts. Failures on individual rows are collected, never fatal to a pass.

mod compress;
mod consolidate;
mod feedback;
mod rehearse;

pub use compress::{
    build_temporal_tree, compress_hot_sessions, compress_session_context, distill_session_memory,
    CompressOptions, CompressReport, DistillOptions, DistillReport, HotSessionsReport,
    TemporalTreeOptions, TemporalTreeReport,
};
pub use consolidate::{
    consolidate_memories, infer_adaptive_thresholds, AdaptiveOptions, AdaptiveQuantiles,
    ConsolidateOptions, ConsolidateReport, GovernanceThresholds, LayerChange, ThresholdDrift,
    ThresholdFeedback, ThresholdReport,
};
pub use feedback::{apply_memory_feedback, Feedback, FeedbackInput, FeedbackReport};
pub use rehearse::{
    rehearse_memory_traces, trigger_reflective_summaries, ReflectionOptions, ReflectionReport,
    RehearsalOptions, RehearsalReport,
};

pub(crate) use compress::hot_sessions;

use rusqlite::params;
use serde::Serialize;
use serde_json::json;

use crate::error::Result;
use crate::memory::{format_ts, parse_ts, EventType, Layer, SYSTEM_MEMORY_ID};
use crate::store::MemoryStore;

// ============================================================================
// DECAY
// ============================================================================

#[derive(Debug, Clone)]
pub struct DecayOptions {
    /// Only rows untouched for at least this many days decay.
    pub days: i64,
    /// Rows per pass.
    pub limit: usize,
    pub layers: Vec<Layer>,
    /// Signal half-life in days of idle age.
    pub half_life_days: f64,
    pub project_id: String,
    pub dry_run: bool,
}

impl Default for DecayOptions {
    fn default() -> Self {
        Self {
            days: 14,
            limit: 120,
            layers: vec![Layer::Instant, Layer::Short, Layer::Long],
            half_life_days: 30.0,
            project_id: String::new(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DecayReport {
    pub ok: bool,
    pub scanned: usize,
    pub decayed: usize,
    pub ids: Vec<String>,
}

/// Reduce all four scores of idle rows by an age-proportional half-life
/// factor. One pass can at most halve a signal.
pub fn apply_decay(store: &MemoryStore, opts: &DecayOptions) -> Result<DecayReport> {
    let now = chrono::Utc::now();
    let cutoff = format_ts(now - chrono::Duration::days(opts.days));
    let layer_list = opts
        .layers
        .iter()
        .map(|l| format!("'{}'", l.as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    let rows: Vec<(String, String)> = {
        let conn = store.read()?;
        let sql = format!(
            "SELECT id, updated_at FROM memories
             WHERE id != '{SYSTEM_MEMORY_ID}'
               AND updated_at < ?1
               AND layer IN ({layer_list})
               AND (json_extract(scope_json, '$.project_id') = ?2 OR ?2 = '')
             ORDER BY updated_at ASC
             LIMIT ?3"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mapped = stmt.query_map(
            params![cutoff, opts.project_id, opts.limit as i64],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;
        mapped.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let scanned = rows.len();
    if opts.dry_run {
        return Ok(DecayReport {
            ok: true,
            scanned,
            decayed: 0,
            ids: rows.into_iter().map(|(id, _)| id).collect(),
        });
    }

    let mut decayed = 0usize;
    let mut ids = Vec::new();
    for (id, updated_at) in rows {
        let age_days = parse_ts(&updated_at)
            .map(|t| (now - t).num_seconds().max(0) as f64 / 86_400.0)
            .unwrap_or(opts.days as f64);
        let factor = 0.5f64
            .powf(age_days / opts.half_life_days.max(1.0))
            .clamp(0.5, 1.0);
        store.mutate_memory(
            &id,
            EventType::Decay,
            json!({"action": "decay", "factor": factor}),
            |envelope, _| {
                let s = &mut envelope.signals;
                s.importance_score *= factor;
                s.confidence_score *= factor;
                s.stability_score *= factor;
                s.volatility_score *= factor;
                Ok(None)
            },
        )?;
        decayed += 1;
        ids.push(id);
    }

    tracing::debug!(scanned, decayed, "decay pass finished");
    Ok(DecayReport {
        ok: true,
        scanned,
        decayed,
        ids,
    })
}

// ============================================================================
// TESTS
// ============================================================================
