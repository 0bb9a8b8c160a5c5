//! Consolidation - signal-driven promotion and demotion between layers.
//!
//! Thresholds are either fixed or inferred from the recent signal
//! distribution (adaptive mode), with feedback and drift biases nudging the
//! inferred values. Every applied change is a `memory.promote` event carrying
//! the before/after layers.

use rusqlite::params;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::memory::{format_ts, Layer, Signals, SYSTEM_MEMORY_ID};
use crate::retrieval::analyze_profile_drift;
use crate::store::MemoryStore;

// ============================================================================
// THRESHOLDS
// ============================================================================

/// Promotion (`p_*`) and demotion (`d_*`) gates.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GovernanceThresholds {
    pub p_imp: f64,
    pub p_conf: f64,
    pub p_stab: f64,
    pub p_vol: f64,
    pub p_reuse: i64,
    pub d_vol: f64,
    pub d_stab: f64,
    pub d_reuse: i64,
}

impl Default for GovernanceThresholds {
    fn default() -> Self {
        Self {
            p_imp: 0.75,
            p_conf: 0.70,
            p_stab: 0.65,
            p_vol: 0.35,
            p_reuse: 2,
            d_vol: 0.70,
            d_stab: 0.30,
            d_reuse: 1,
        }
    }
}

impl GovernanceThresholds {
    pub fn should_promote(&self, signals: &Signals) -> bool {
        signals.importance_score >= self.p_imp
            && signals.confidence_score >= self.p_conf
            && signals.stability_score >= self.p_stab
            && signals.volatility_score <= self.p_vol
            && signals.reuse_count >= self.p_reuse
    }

    pub fn should_demote(&self, signals: &Signals) -> bool {
        signals.volatility_score >= self.d_vol
            && signals.stability_score <= self.d_stab
            && signals.reuse_count <= self.d_reuse
    }
}

/// Quantile positions used when inferring thresholds from the distribution.
#[derive(Debug, Clone, Copy, Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AdaptiveQuantiles {
    pub promote_imp: f64,
    pub promote_conf: f64,
    pub promote_stab: f64,
    pub promote_vol: f64,
    pub demote_vol: f64,
    pub demote_stab: f64,
    pub demote_reuse: f64,
}

impl Default for AdaptiveQuantiles {
    fn default() -> Self {
        Self {
            promote_imp: 0.68,
            promote_conf: 0.60,
            promote_stab: 0.62,
            promote_vol: 0.42,
            demote_vol: 0.78,
            demote_stab: 0.28,
            demote_reuse: 0.30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdaptiveOptions {
    /// Signal window in days.
    pub days: i64,
    pub quantiles: AdaptiveQuantiles,
    /// Negative/forget feedback raises `p_conf` and lowers `d_vol`.
    pub feedback_bias: bool,
    /// High drift raises `p_imp` and lowers `d_vol`.
    pub drift_aware: bool,
    pub drift_weight: f64,
}

impl Default for AdaptiveOptions {
    fn default() -> Self {
        Self {
            days: 14,
            quantiles: AdaptiveQuantiles::default(),
            feedback_bias: true,
            drift_aware: false,
            drift_weight: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ThresholdFeedback {
    pub negative: i64,
    pub forget: i64,
    pub bias: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ThresholdDrift {
    pub enabled: bool,
    pub applied: bool,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdReport {
    pub ok: bool,
    pub sample_size: usize,
    pub thresholds: GovernanceThresholds,
    pub feedback: ThresholdFeedback,
    pub drift: ThresholdDrift,
}

/// Linear-interpolated quantile of an unsorted sample.
fn quantile(values: &mut Vec<f64>, q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let q = q.clamp(0.0, 1.0);
    let pos = q * (values.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        return Some(values[lo]);
    }
    let frac = pos - lo as f64;
    Some(values[lo] * (1.0 - frac) + values[hi] * frac)
}

/// Infer governance thresholds from the recent signal distribution.
pub fn infer_adaptive_thresholds(
    store: &MemoryStore,
    project_id: &str,
    session_id: &str,
    opts: &AdaptiveOptions,
) -> Result<ThresholdReport> {
    let cutoff = format_ts(chrono::Utc::now() - chrono::Duration::days(opts.days));
    let mut imp = Vec::new();
    let mut conf = Vec::new();
    let mut stab = Vec::new();
    let mut vol = Vec::new();
    let mut reuse = Vec::new();
    {
        let conn = store.read()?;
        let mut stmt = conn.prepare(
            "SELECT importance_score, confidence_score, stability_score, volatility_score, reuse_count
             FROM memories
             WHERE id != 'system000' AND kind != 'retrieve'
               AND updated_at >= ?1
               AND (json_extract(scope_json, '$.project_id') = ?2 OR ?2 = '')
               AND (json_extract(source_json, '$.session_id') = ?3 OR ?3 = '')",
        )?;
        let rows = stmt.query_map(params![cutoff, project_id, session_id], |row| {
            Ok((
                row.get::<_, f64>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;
        for row in rows {
            let (i, c, s, v, r) = row?;
            imp.push(i);
            conf.push(c);
            stab.push(s);
            vol.push(v);
            reuse.push(r as f64);
        }
    }

    let defaults = GovernanceThresholds::default();
    let sample_size = imp.len();
    let q = &opts.quantiles;
    let mut thresholds = GovernanceThresholds {
        p_imp: quantile(&mut imp, q.promote_imp).unwrap_or(defaults.p_imp),
        p_conf: quantile(&mut conf, q.promote_conf).unwrap_or(defaults.p_conf),
        p_stab: quantile(&mut stab, q.promote_stab).unwrap_or(defaults.p_stab),
        p_vol: quantile(&mut vol.clone(), q.promote_vol).unwrap_or(defaults.p_vol),
        p_reuse: quantile(&mut reuse.clone(), 0.60)
            .map(|v| v.round() as i64)
            .unwrap_or(defaults.p_reuse)
            .max(1),
        d_vol: quantile(&mut vol, q.demote_vol).unwrap_or(defaults.d_vol),
        d_stab: quantile(&mut stab.clone(), q.demote_stab).unwrap_or(defaults.d_stab),
        d_reuse: quantile(&mut reuse, q.demote_reuse)
            .map(|v| v.round() as i64)
            .unwrap_or(defaults.d_reuse),
    };

    // Feedback bias: complaints tighten promotion confidence and make the
    // volatile tail easier to demote.
    let mut feedback = ThresholdFeedback::default();
    if opts.feedback_bias {
        let conn = store.read()?;
        let mut stmt = conn.prepare(
            "SELECT payload_json FROM memory_events
             WHERE event_type = 'memory.feedback' AND event_time >= ?1",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;
        for row in rows {
            let payload: Value = serde_json::from_str(&row?).unwrap_or(Value::Null);
            match payload.get("feedback").and_then(Value::as_str) {
                Some("negative") => feedback.negative += 1,
                Some("forget") => feedback.forget += 1,
                _ => {}
            }
        }
        feedback.bias =
            (0.03 * feedback.negative as f64 + 0.05 * feedback.forget as f64).min(0.25);
        thresholds.p_conf = (thresholds.p_conf + feedback.bias).min(0.95);
        thresholds.d_vol = (thresholds.d_vol - feedback.bias).max(0.20);
    }

    // Drift bias: a shifting topic mix raises the promotion bar and demotes
    // the volatile tail more aggressively.
    let mut drift = ThresholdDrift {
        enabled: opts.drift_aware,
        ..ThresholdDrift::default()
    };
    if opts.drift_aware {
        let report = analyze_profile_drift(store, project_id, "", 14, 90, 400)?;
        drift.score = report.drift.score;
        if report.drift.score >= 0.6 {
            drift.applied = true;
            let shift = 0.12 * report.drift.score * opts.drift_weight;
            thresholds.p_imp = (thresholds.p_imp + shift).min(0.95);
            thresholds.d_vol = (thresholds.d_vol - shift).max(0.20);
        }
    }

    Ok(ThresholdReport {
        ok: true,
        sample_size,
        thresholds,
        feedback,
        drift,
    })
}

// ============================================================================
// CONSOLIDATION PASS
// ============================================================================

#[derive(Debug, Clone)]
pub struct ConsolidateOptions {
    pub project_id: String,
    pub session_id: String,
    pub limit: usize,
    pub dry_run: bool,
    /// Fixed thresholds; `adaptive` wins when both are set.
    pub thresholds: Option<GovernanceThresholds>,
    pub adaptive: Option<AdaptiveOptions>,
}

impl Default for ConsolidateOptions {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            session_id: String::new(),
            limit: 80,
            dry_run: false,
            thresholds: None,
            adaptive: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerChange {
    pub id: String,
    pub summary: String,
    pub from: Layer,
    pub to: Layer,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidateReport {
    pub ok: bool,
    pub applied: bool,
    pub thresholds: GovernanceThresholds,
    pub promote: Vec<LayerChange>,
    pub demote: Vec<LayerChange>,
    pub errors: Vec<String>,
}

/// One promote/demote pass over the scoped candidate set.
pub fn consolidate_memories(
    store: &MemoryStore,
    opts: &ConsolidateOptions,
) -> Result<ConsolidateReport> {
    let thresholds = match (&opts.adaptive, &opts.thresholds) {
        (Some(adaptive), _) => {
            infer_adaptive_thresholds(store, &opts.project_id, &opts.session_id, adaptive)?
                .thresholds
        }
        (None, Some(fixed)) => *fixed,
        (None, None) => GovernanceThresholds::default(),
    };

    let candidates: Vec<(String, String, Layer, Signals)> = {
        let conn = store.read()?;
        let mut stmt = conn.prepare(
            "SELECT id, summary, layer, importance_score, confidence_score, stability_score,
                    reuse_count, volatility_score
             FROM memories
             WHERE id != ?1 AND kind != 'retrieve' AND layer != 'archive'
               AND (json_extract(scope_json, '$.project_id') = ?2 OR ?2 = '')
               AND (json_extract(source_json, '$.session_id') = ?3 OR ?3 = '')
             ORDER BY updated_at DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![SYSTEM_MEMORY_ID, opts.project_id, opts.session_id, opts.limit as i64],
            |row| {
                let layer_raw: String = row.get(2)?;
                let layer = layer_raw.parse::<Layer>().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        2,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    layer,
                    Signals {
                        importance_score: row.get(3)?,
                        confidence_score: row.get(4)?,
                        stability_score: row.get(5)?,
                        reuse_count: row.get(6)?,
                        volatility_score: row.get(7)?,
                    },
                ))
            },
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let mut promote = Vec::new();
    let mut demote = Vec::new();
    for (id, summary, layer, signals) in &candidates {
        if thresholds.should_promote(signals) {
            if let Some(to) = layer.promoted() {
                promote.push(LayerChange {
                    id: id.clone(),
                    summary: summary.clone(),
                    from: *layer,
                    to,
                });
                continue;
            }
        }
        if thresholds.should_demote(signals) {
            if let Some(to) = layer.demoted() {
                demote.push(LayerChange {
                    id: id.clone(),
                    summary: summary.clone(),
                    from: *layer,
                    to,
                });
            }
        }
    }

    let mut errors = Vec::new();
    if !opts.dry_run {
        for change in promote.iter().chain(demote.iter()) {
            if let Err(err) = store.set_layer(&change.id, change.to, "consolidation") {
                errors.push(format!("{}: {err}", change.id));
            }
        }
    }

    Ok(ConsolidateReport {
        ok: true,
        applied: !opts.dry_run,
        thresholds,
        promote,
        demote,
        errors,
    })
}

// ============================================================================
// TESTS
// ============================================================================
