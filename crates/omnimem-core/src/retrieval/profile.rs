//! User profile and topic-drift analysis.
//!
//! The profile is a lexical sketch of what the user has been writing about:
//! top tags plus preference sentences. Drift compares the recent tag/term
//! distribution against a longer baseline; high drift biases retrieval
//! broader and governance more aggressive.

use std::collections::HashMap;

use rusqlite::params;
use serde::Serialize;

use crate::error::{MemoryError, Result};
use crate::memory::format_ts;
use crate::store::MemoryStore;

// ============================================================================
// USER PROFILE
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserProfile {
    /// Most frequent tags, highest first
    pub top_tags: Vec<String>,
    /// Sentences that read like durable preferences
    pub preferences: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileReport {
    pub ok: bool,
    pub analyzed: usize,
    pub profile: UserProfile,
}

const PREFERENCE_MARKERS: &[&str] = &["prefer", "always", "never", "avoid", "like to"];
const TOP_TAG_LIMIT: usize = 8;
const PREFERENCE_LIMIT: usize = 12;

/// Build a lexical profile from recent memories in scope.
pub fn build_user_profile(
    store: &MemoryStore,
    project_id: &str,
    session_id: &str,
    limit: usize,
) -> Result<ProfileReport> {
    let rows = scoped_rows(store, project_id, session_id, "", limit)?;
    let mut tag_counts: HashMap<String, i64> = HashMap::new();
    let mut preferences: Vec<String> = Vec::new();

    for row in &rows {
        for tag in &row.tags {
            *tag_counts.entry(tag.clone()).or_default() += 1;
        }
        for line in row.summary.lines().chain(row.body_text.lines()) {
            let lowered = line.to_lowercase();
            if PREFERENCE_MARKERS.iter().any(|m| lowered.contains(m)) {
                let trimmed = line.trim();
                if !trimmed.is_empty() && preferences.len() < PREFERENCE_LIMIT {
                    preferences.push(trimmed.to_string());
                }
            }
        }
    }

    let mut ranked: Vec<(String, i64)> = tag_counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let top_tags = ranked
        .into_iter()
        .take(TOP_TAG_LIMIT)
        .map(|(tag, _)| tag)
        .collect();

    Ok(ProfileReport {
        ok: true,
        analyzed: rows.len(),
        profile: UserProfile {
            top_tags,
            preferences,
        },
    })
}

// ============================================================================
// DRIFT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftStatus {
    Low,
    Moderate,
    High,
}

impl DriftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftStatus::Low => "low",
            DriftStatus::Moderate => "moderate",
            DriftStatus::High => "high",
        }
    }

    fn from_score(score: f64) -> Self {
        if score < 0.35 {
            DriftStatus::Low
        } else if score < 0.6 {
            DriftStatus::Moderate
        } else {
            DriftStatus::High
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftCounts {
    pub recent: usize,
    pub baseline: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftInfo {
    /// `1 - cosine(recent, baseline)` over tag/term frequencies
    pub score: f64,
    pub status: DriftStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub ok: bool,
    pub counts: DriftCounts,
    pub drift: DriftInfo,
}

/// Compare the recent tag/term distribution against the preceding baseline
/// window. Too little data in either window reads as zero drift.
pub fn analyze_profile_drift(
    store: &MemoryStore,
    project_id: &str,
    session_id: &str,
    recent_days: i64,
    baseline_days: i64,
    limit: usize,
) -> Result<DriftReport> {
    if baseline_days <= recent_days {
        return Err(MemoryError::InvalidArgument(
            "baseline window must exceed the recent window".to_string(),
        ));
    }
    let now = chrono::Utc::now();
    let recent_cutoff = format_ts(now - chrono::Duration::days(recent_days));
    let baseline_cutoff = format_ts(now - chrono::Duration::days(baseline_days));

    let rows = scoped_rows(store, project_id, session_id, &baseline_cutoff, limit)?;
    let mut recent_vec: HashMap<String, f64> = HashMap::new();
    let mut baseline_vec: HashMap<String, f64> = HashMap::new();
    let mut recent_count = 0usize;
    let mut baseline_count = 0usize;

    for row in &rows {
        let bucket = if row.updated_at.as_str() >= recent_cutoff.as_str() {
            recent_count += 1;
            &mut recent_vec
        } else {
            baseline_count += 1;
            &mut baseline_vec
        };
        // Tags carry double weight; summary terms smooth sparse tagging.
        for tag in &row.tags {
            *bucket.entry(tag.clone()).or_default() += 2.0;
        }
        for term in super::tokenize(&row.summary) {
            *bucket.entry(term).or_default() += 1.0;
        }
    }

    let score = if recent_count < 2 || baseline_count < 2 {
        0.0
    } else {
        (1.0 - cosine(&recent_vec, &baseline_vec)).clamp(0.0, 1.0)
    };

    Ok(DriftReport {
        ok: true,
        counts: DriftCounts {
            recent: recent_count,
            baseline: baseline_count,
        },
        drift: DriftInfo {
            score,
            status: DriftStatus::from_score(score),
        },
    })
}

fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .filter_map(|(k, va)| b.get(k).map(|vb| va * vb))
        .sum();
    let na: f64 = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let nb: f64 = b.values().map(|v| v * v).sum::<f64>().sqrt();
    if na <= 0.0 || nb <= 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

// ============================================================================
// SCOPED ROW SCAN
// ============================================================================

struct ProfileRow {
    updated_at: String,
    summary: String,
    body_text: String,
    tags: Vec<String>,
}

fn scoped_rows(
    store: &MemoryStore,
    project_id: &str,
    session_id: &str,
    since: &str,
    limit: usize,
) -> Result<Vec<ProfileRow>> {
    let conn = store.read()?;
    let since = if since.is_empty() {
        // Everything; lexicographically below any ISO timestamp.
        "0".to_string()
    } else {
        since.to_string()
    };
    let mut stmt = conn.prepare(
        "SELECT updated_at, summary, body_text, tags_json FROM memories
         WHERE kind != 'retrieve' AND id != 'system000'
           AND updated_at >= ?1
           AND (json_extract(scope_json, '$.project_id') = ?2 OR ?2 = '')
           AND (json_extract(source_json, '$.session_id') = ?3 OR ?3 = '')
         ORDER BY updated_at DESC
         LIMIT ?4",
    )?;
    let rows = stmt.query_map(
        params![since, project_id, session_id, limit as i64],
        |row| {
            let tags_json: String = row.get(3)?;
            Ok(ProfileRow {
                updated_at: row.get(0)?,
                summary: row.get(1)?,
                body_text: row.get(2)?,
                tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            })
        },
    )?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(MemoryError::from)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Kind, Layer, Scope, Source};
    use crate::store::WriteInput;
    use crate::test_support::open_test_store;

    fn write(store: &MemoryStore, summary: &str, body: &str, tags: &[&str]) {
        store
            .write_memory(WriteInput {
                layer: Layer::Short,
                kind: Kind::Note,
                summary: summary.to_string(),
                body: body.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                source: Source {
                    session_id: "s-profile".to_string(),
                    ..Source::default()
                },
                scope: Scope {
                    project_id: "OM".to_string(),
                    workspace: String::new(),
                },
                ..WriteInput::default()
            })
            .unwrap();
    }

    #[test]
    fn test_build_user_profile() {
        let (store, _dir) = open_test_store();
        write(
            &store,
            "Python retrieval tuning",
            "I prefer deterministic retrieval and I usually use sqlite for local experiments.",
            &["python", "retrieval"],
        );
        write(
            &store,
            "Improve memory quality scoring",
            "next: add a more robust profile endpoint",
            &["roadmap", "retrieval"],
        );
        let out = build_user_profile(&store, "OM", "s-profile", 120).unwrap();
        assert!(out.ok);
        assert!(out.analyzed >= 2);
        assert_eq!(out.profile.top_tags.first().map(String::as_str), Some("retrieval"));
        assert!(out
            .profile
            .preferences
            .iter()
            .any(|p| p.to_lowercase().contains("prefer")));
    }

    #[test]
    fn test_drift_zero_without_enough_data() {
        let (store, _dir) = open_test_store();
        write(&store, "only one recent row", "body", &["solo"]);
        let out = analyze_profile_drift(&store, "OM", "", 14, 90, 500).unwrap();
        assert_eq!(out.drift.score, 0.0);
        assert_eq!(out.drift.status, DriftStatus::Low);
    }

    #[test]
    fn test_drift_rejects_inverted_windows() {
        let (store, _dir) = open_test_store();
        assert!(analyze_profile_drift(&store, "OM", "", 90, 14, 100).is_err());
    }

    #[test]
    fn test_cosine_basics() {
        let mut a = HashMap::new();
        a.insert("x".to_string(), 1.0);
        let mut b = HashMap::new();
        b.insert("x".to_string(), 2.0);
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-9);
        let mut c = HashMap::new();
        c.insert("y".to_string(), 1.0);
        assert_eq!(cosine(&a, &c), 0.0);
    }
}
