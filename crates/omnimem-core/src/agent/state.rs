//! Per-`(tool, project)` agent session state.
//!
//! The topic vector is an exponential moving average over prompt token
//! frequencies; cosine distance against it is the drift signal that triggers
//! checkpoints. State lives in one JSON file per tool/project pair under the
//! runtime scratch directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::make_id;

/// EMA weight for new prompt tokens.
pub const TOPIC_ALPHA: f64 = 0.25;

/// Topic entries below this weight are pruned.
const TOPIC_FLOOR: f64 = 0.001;

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub session_id: String,
    pub project_id: String,
    pub tool: String,
    #[serde(default)]
    pub topic_vector: HashMap<String, f64>,
    #[serde(default)]
    pub turns: u32,
    #[serde(default)]
    pub last_checkpoint_turn: u32,
}

impl AgentState {
    pub fn fresh(tool: &str, project_id: &str) -> Self {
        Self {
            session_id: make_id(),
            project_id: project_id.to_string(),
            tool: tool.to_string(),
            topic_vector: HashMap::new(),
            turns: 0,
            last_checkpoint_turn: 0,
        }
    }
}

fn state_path(runtime_root: &Path, tool: &str, project_id: &str) -> PathBuf {
    runtime_root.join("agent").join(format!("{tool}-{project_id}.json"))
}

pub fn load_state(runtime_root: &Path, tool: &str, project_id: &str) -> AgentState {
    let path = state_path(runtime_root, tool, project_id);
    let Ok(raw) = std::fs::read_to_string(path) else {
        return AgentState::fresh(tool, project_id);
    };
    serde_json::from_str(&raw).unwrap_or_else(|_| AgentState::fresh(tool, project_id))
}

pub fn save_state(runtime_root: &Path, state: &AgentState) -> Result<()> {
    let path = state_path(runtime_root, &state.tool, &state.project_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut body = serde_json::to_string_pretty(state)?;
    body.push('\n');
    std::fs::write(path, body)?;
    Ok(())
}

// ============================================================================
// TOPIC VECTOR MATH
// ============================================================================

/// Lowercased token frequencies; tokens shorter than two chars are noise.
pub fn tokenize_counts(text: &str) -> HashMap<String, f64> {
    static WORD: OnceLock<Regex> = OnceLock::new();
    let re = WORD.get_or_init(|| Regex::new(r"[A-Za-z0-9_]{2,}").expect("static"));
    let mut counts = HashMap::new();
    for m in re.find_iter(text) {
        *counts.entry(m.as_str().to_lowercase()).or_insert(0.0) += 1.0;
    }
    counts
}

pub fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
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

/// EMA update keeping the session topic stable but adaptive.
pub fn merge_topic(
    old: &HashMap<String, f64>,
    new: &HashMap<String, f64>,
    alpha: f64,
) -> HashMap<String, f64> {
    let mut out: HashMap<String, f64> = old
        .iter()
        .map(|(k, v)| (k.clone(), v * (1.0 - alpha)))
        .filter(|(_, v)| *v >= TOPIC_FLOOR)
        .collect();
    for (k, v) in new {
        *out.entry(k.clone()).or_insert(0.0) += alpha * v;
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
