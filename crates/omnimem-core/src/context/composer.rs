//! Budgeted memory-context composer with per-session delta dedup.
//!
//! The assembled block never exceeds its token budget for the header,
//! protocol, checkpoints, and memory lines; only the trailing user-request
//! block may be truncated to fit. Delta state remembers what each caller has
//! already seen so repeat candidates yield their slot to new material.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::{utc_now_ts, Kind, Layer};
use crate::retrieval::{infer_query_route, QueryRoute, RetrievedItem};
use crate::store::{BriefItem, MemoryRecord};

/// Seen-map entries kept per state key, most recent last.
const DELTA_STATE_CAP: usize = 1200;

// ============================================================================
// TOKEN ESTIMATE
// ============================================================================

/// Cheap token estimate: alphanumeric runs plus CJK characters, minimum one.
pub fn estimate_tokens(text: &str) -> usize {
    static TOK: OnceLock<Regex> = OnceLock::new();
    let re = TOK.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9_]+|[\u{4e00}-\u{9fff}]").expect("static")
    });
    re.find_iter(text).count().max(1)
}

// ============================================================================
// REQUEST / OUTCOME
// ============================================================================

/// One candidate line for the memory block.
#[derive(Debug, Clone)]
pub struct ContextCandidate {
    pub id: String,
    pub layer: Layer,
    pub kind: Kind,
    pub summary: String,
    pub updated_at: String,
}

impl From<&RetrievedItem> for ContextCandidate {
    fn from(item: &RetrievedItem) -> Self {
        Self {
            id: item.id.clone(),
            layer: item.layer,
            kind: item.kind,
            summary: item.summary.clone(),
            updated_at: item.updated_at.clone(),
        }
    }
}

impl From<&MemoryRecord> for ContextCandidate {
    fn from(record: &MemoryRecord) -> Self {
        Self {
            id: record.envelope.id.clone(),
            layer: record.envelope.layer,
            kind: record.envelope.kind,
            summary: record.envelope.summary.clone(),
            updated_at: record.envelope.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComposeRequest {
    /// Delta-state identity, one file per caller.
    pub state_key: String,
    pub project_id: String,
    pub workspace_name: String,
    pub user_prompt: String,
    pub checkpoints: Vec<BriefItem>,
    pub candidates: Vec<ContextCandidate>,
    pub budget_tokens: usize,
    pub include_protocol: bool,
    pub include_user_request: bool,
    pub delta_enabled: bool,
    pub max_checkpoints: usize,
    pub max_memories: usize,
}

impl Default for ComposeRequest {
    fn default() -> Self {
        Self {
            state_key: "default".to_string(),
            project_id: String::new(),
            workspace_name: "workspace".to_string(),
            user_prompt: String::new(),
            checkpoints: Vec::new(),
            candidates: Vec::new(),
            budget_tokens: 420,
            include_protocol: true,
            include_user_request: false,
            delta_enabled: true,
            max_checkpoints: 3,
            max_memories: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposeOutcome {
    pub ok: bool,
    pub text: String,
    pub route: QueryRoute,
    pub budget_tokens: usize,
    pub estimated_tokens: usize,
    pub selected_ids: Vec<String>,
    pub selected_count: usize,
    pub candidate_count: usize,
    pub delta_new_count: usize,
    pub delta_seen_count: usize,
}

// ============================================================================
// DELTA STATE
// ============================================================================

/// `(id, updated_at)` pairs in recency order, oldest first.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DeltaState {
    #[serde(default)]
    saved_at: String,
    #[serde(default)]
    seen: Vec<(String, String)>,
}

fn delta_state_path(runtime_root: &Path, key: &str) -> PathBuf {
    runtime_root.join("context_delta").join(format!("{key}.json"))
}

fn load_delta_state(runtime_root: &Path, key: &str) -> DeltaState {
    let path = delta_state_path(runtime_root, key);
    let Ok(raw) = std::fs::read_to_string(path) else {
        return DeltaState::default();
    };
    serde_json::from_str(&raw).unwrap_or_default()
}

fn save_delta_state(runtime_root: &Path, key: &str, state: &DeltaState) -> Result<()> {
    let path = delta_state_path(runtime_root, key);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut body = serde_json::to_string_pretty(state)?;
    body.push('\n');
    std::fs::write(path, body)?;
    Ok(())
}

impl DeltaState {
    fn lookup(&self, id: &str) -> Option<&str> {
        self.seen
            .iter()
            .rev()
            .find(|(k, _)| k == id)
            .map(|(_, v)| v.as_str())
    }

    fn record(&mut self, id: &str, updated_at: &str) {
        self.seen.retain(|(k, _)| k != id);
        self.seen.push((id.to_string(), updated_at.to_string()));
        if self.seen.len() > DELTA_STATE_CAP {
            let overflow = self.seen.len() - DELTA_STATE_CAP;
            self.seen.drain(0..overflow);
        }
    }
}

// ============================================================================
// COMPOSER
// ============================================================================

fn memory_line(candidate: &ContextCandidate, route: QueryRoute, delta_new: bool) -> String {
    let mark = if delta_new { "new" } else { "seen" };
    format!(
        "- [{}/{}/{}/{}] {} (id={})",
        candidate.layer,
        candidate.kind,
        route,
        mark,
        candidate.summary.trim(),
        &candidate.id[..candidate.id.len().min(8)]
    )
}

/// Assemble the context block for one turn.
pub fn compose_context(runtime_root: &Path, req: &ComposeRequest) -> Result<ComposeOutcome> {
    let budget = req.budget_tokens.max(120);
    let route = infer_query_route(&req.user_prompt);
    let mut state = if req.delta_enabled {
        load_delta_state(runtime_root, &req.state_key)
    } else {
        DeltaState::default()
    };

    let mut lines: Vec<String> = Vec::new();
    lines.push(format!(
        "OmniMem: {} ({}) {}",
        req.project_id,
        req.workspace_name,
        utc_now_ts()
    ));
    lines.push(String::new());
    if req.include_protocol {
        lines.push("Memory protocol (auto):".to_string());
        lines.push("- stable decisions/facts -> write a memory".to_string());
        lines.push("- topic drift/phase switch -> write a checkpoint".to_string());
        lines.push("- do not store raw secrets; use credential refs".to_string());
    }
    let checkpoints = &req.checkpoints[..req.checkpoints.len().min(req.max_checkpoints)];
    if !checkpoints.is_empty() {
        lines.push("Recent checkpoints:".to_string());
        for ck in checkpoints {
            lines.push(format!("- {}: {}", ck.updated_at, ck.summary));
        }
    }

    // Delta partition: unseen (or re-updated) candidates first.
    let pool = &req.candidates[..req.candidates.len().min(req.max_memories.max(1) * 4)];
    let mut delta_new: Vec<&ContextCandidate> = Vec::new();
    let mut delta_seen: Vec<&ContextCandidate> = Vec::new();
    for candidate in pool {
        if candidate.id.is_empty() {
            continue;
        }
        if state.lookup(&candidate.id) == Some(candidate.updated_at.as_str()) {
            delta_seen.push(candidate);
        } else {
            delta_new.push(candidate);
        }
    }
    let delta_new_count = delta_new.len();
    let delta_seen_count = delta_seen.len();
    let ordered: Vec<&ContextCandidate> = if req.delta_enabled {
        delta_new.iter().chain(delta_seen.iter()).copied().collect()
    } else {
        pool.iter().collect()
    };

    lines.push(format!("Memory recalls (route={route}, budget={budget}):"));

    let mut current = estimate_tokens(&lines.join("\n"));
    let mut selected: Vec<&ContextCandidate> = Vec::new();
    for candidate in ordered {
        if selected.len() >= req.max_memories.max(1) {
            break;
        }
        let is_new = state.lookup(&candidate.id) != Some(candidate.updated_at.as_str());
        let line = memory_line(candidate, route, is_new);
        let needed = estimate_tokens(&line) + 2;
        if current + needed > budget {
            // Keep trying smaller candidates further down the list.
            continue;
        }
        lines.push(line);
        current += needed;
        selected.push(candidate);
    }

    if req.include_user_request && !req.user_prompt.trim().is_empty() {
        let prompt = req.user_prompt.trim();
        let tail = format!("\nUser request:\n{prompt}");
        lines.push(String::new());
        lines.push("User request:".to_string());
        if current + estimate_tokens(&tail) <= budget {
            lines.push(prompt.to_string());
        } else {
            // Prompt-injection callers still need at least a truncated request.
            let keep = ((budget.saturating_sub(current)) * 4).clamp(60, 400);
            lines.push(prompt.chars().take(keep).collect());
        }
    }

    let text = lines.join("\n").trim().to_string();
    let estimated = estimate_tokens(&text);

    if req.delta_enabled {
        for candidate in &selected {
            state.record(&candidate.id, &candidate.updated_at);
        }
        state.saved_at = utc_now_ts();
        save_delta_state(runtime_root, &req.state_key, &state)?;
    }

    Ok(ComposeOutcome {
        ok: true,
        text,
        route,
        budget_tokens: budget,
        estimated_tokens: estimated,
        selected_ids: selected.iter().map(|c| c.id.clone()).collect(),
        selected_count: selected.len(),
        candidate_count: pool.len(),
        delta_new_count,
        delta_seen_count,
    })
}

// ============================================================================
// TESTS
// ============================================================================
