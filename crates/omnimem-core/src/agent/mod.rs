//! Agent orchestrator - one memory-augmented turn of an external tool.
//!
//! Per turn: measure topic drift, retrieve context, leave a retrieval trace,
//! compose a budgeted prompt, invoke the tool with transient-error retry,
//! checkpoint and rotate the session on drift, then remember the exchange at
//! a layer chosen from its language.

mod retry;
mod state;

pub use retry::{
    extract_retry_after_seconds, is_transient_tool_error, run_tool_with_retry, RetryPolicy,
    SubprocessToolRunner, ToolOutput, ToolRunReport, ToolRunner,
};
pub use state::{
    cosine, load_state, merge_topic, save_state, tokenize_counts, AgentState, TOPIC_ALPHA,
};

use std::path::PathBuf;

use serde::Serialize;

use crate::context::{compose_context, ComposeRequest, ContextCandidate};
use crate::error::{MemoryError, Result};
use crate::memory::{make_id, EventType, Kind, Layer, Scope, Signals, Source};
use crate::retrieval::{retrieve, RetrieveOptions};
use crate::store::{MemoryStore, WriteInput};

const AGENT_TOOL_NAME: &str = "omnimem-agent";

// ============================================================================
// OPTIONS / OUTCOME
// ============================================================================

#[derive(Debug, Clone)]
pub struct TurnOptions {
    pub tool: String,
    pub project_id: String,
    pub drift_threshold: f64,
    pub cwd: Option<PathBuf>,
    pub limit: usize,
    pub context_budget_tokens: usize,
    pub delta_enabled: bool,
    pub retry: RetryPolicy,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            tool: "codex".to_string(),
            project_id: String::new(),
            drift_threshold: 0.62,
            cwd: None,
            limit: 8,
            context_budget_tokens: 420,
            delta_enabled: true,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub ok: bool,
    pub tool: String,
    pub project_id: String,
    pub session_id: String,
    pub drift: f64,
    pub switched: bool,
    pub answer: String,
    pub retrieved_count: usize,
    pub transient_failures: u32,
}

// ============================================================================
// TOOL COMMAND
// ============================================================================

/// Command line for a tool. Default contract is `{tool} exec <prompt>`;
/// `claude` uses its prompt flag, and `OMNIMEM_AGENT_<TOOL>_CMD` overrides
/// everything (whitespace-split, prompt appended).
pub fn tool_command(tool: &str, prompt: &str) -> Vec<String> {
    let env_key = format!("OMNIMEM_AGENT_{}_CMD", tool.to_uppercase());
    if let Ok(override_cmd) = std::env::var(&env_key) {
        let trimmed = override_cmd.trim();
        if !trimmed.is_empty() {
            let mut cmd: Vec<String> = trimmed.split_whitespace().map(str::to_string).collect();
            cmd.push(prompt.to_string());
            return cmd;
        }
    }
    match tool {
        "claude" => vec!["claude".to_string(), "-p".to_string(), prompt.to_string()],
        other => vec![other.to_string(), "exec".to_string(), prompt.to_string()],
    }
}

/// Classify the answer into a target layer from its language, capped by
/// drift: decision/rule wording earns `long`, a drifting session stays
/// `short` with reduced stability.
fn choose_layer(prompt: &str, response: &str, drift: f64) -> (Layer, Signals) {
    let text = format!("{prompt}\n{response}").to_lowercase();
    let mut layer = Layer::Short;
    let mut signals = Signals {
        importance_score: 0.55,
        confidence_score: 0.60,
        stability_score: 0.55,
        reuse_count: 0,
        volatility_score: drift.clamp(0.15, 0.8),
    };
    if ["decision", "final", "must", "rule", "constraint"]
        .iter()
        .any(|k| text.contains(k))
    {
        layer = Layer::Long;
        signals.importance_score = 0.80;
        signals.confidence_score = 0.75;
        signals.stability_score = 0.70;
    }
    if drift > 0.62 {
        layer = Layer::Short;
        signals.stability_score = signals.stability_score.min(0.5);
    }
    (layer, signals)
}

// ============================================================================
// TURN
// ============================================================================

/// Run one full turn against an external tool.
pub fn run_turn(
    store: &MemoryStore,
    runner: &dyn ToolRunner,
    user_prompt: &str,
    opts: &TurnOptions,
) -> Result<TurnOutcome> {
    let runtime_root = store.paths().runtime_dir();
    let mut st = load_state(&runtime_root, &opts.tool, &opts.project_id);
    st.turns += 1;

    let prompt_vec = tokenize_counts(user_prompt);
    let sim = if st.topic_vector.is_empty() {
        1.0
    } else {
        cosine(&st.topic_vector, &prompt_vec)
    };
    let drift = 1.0 - sim;

    let brief = store.build_brief(&opts.project_id, 6)?;

    // Graph-aware retrieval with a plain-find fallback.
    let retrieval = retrieve(
        store,
        user_prompt,
        &opts.project_id,
        "",
        &RetrieveOptions {
            seed_limit: opts.limit.clamp(4, 12),
            max_items: opts.limit.max(1),
            ..RetrieveOptions::default()
        },
    )?;
    let mut candidates: Vec<ContextCandidate> =
        retrieval.items.iter().map(ContextCandidate::from).collect();
    if candidates.is_empty() {
        let found = store.find_memories(user_prompt, None, &opts.project_id, opts.limit)?;
        candidates = found.iter().map(ContextCandidate::from).collect();
    }
    let retrieved_count = candidates.len();

    let retrieved_ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
    store.bump_reuse_counts(&retrieved_ids, 1)?;

    let agent_source = Source {
        tool: AGENT_TOOL_NAME.to_string(),
        account: "default".to_string(),
        device: "local".to_string(),
        session_id: st.session_id.clone(),
    };
    let workspace = opts
        .cwd
        .as_ref()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    let scope = Scope {
        project_id: opts.project_id.clone(),
        workspace: workspace.clone(),
    };

    // Retrieval trace: instant, never itself retrievable.
    let mut trace_body = format!(
        "Automatic retrieval trace created by the agent.\n\n- project_id: {}\n- session_id: {}\n- query: {}\n- retrieved_count: {}\n",
        opts.project_id, st.session_id, user_prompt, retrieved_count
    );
    for id in retrieved_ids.iter().take(20) {
        trace_body.push_str(&format!("- memory_id: {id}\n"));
    }
    store.write_memory(WriteInput {
        layer: Layer::Instant,
        kind: Kind::Retrieve,
        summary: format!("Retrieved {retrieved_count} memories for context"),
        body: trace_body,
        tags: vec![
            format!("project:{}", opts.project_id),
            "auto:retrieve".to_string(),
            format!("tool:{}", opts.tool),
        ],
        source: agent_source.clone(),
        scope: scope.clone(),
        signals: Signals {
            importance_score: 0.25,
            confidence_score: 0.9,
            stability_score: 0.2,
            reuse_count: 0,
            volatility_score: 0.8,
        },
        event_type: EventType::Retrieve,
        ..WriteInput::default()
    })?;

    let workspace_name = opts
        .cwd
        .as_ref()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "workspace".to_string());
    let context = compose_context(
        &runtime_root,
        &ComposeRequest {
            state_key: format!("agent-{}-{}", opts.tool, opts.project_id),
            project_id: opts.project_id.clone(),
            workspace_name,
            user_prompt: user_prompt.to_string(),
            checkpoints: brief.checkpoints.clone(),
            candidates,
            budget_tokens: opts.context_budget_tokens,
            include_protocol: true,
            include_user_request: true,
            delta_enabled: opts.delta_enabled,
            max_checkpoints: 3,
            max_memories: opts.limit.clamp(3, 10),
        },
    )?;

    let cmd = tool_command(&opts.tool, &context.text);
    let report = run_tool_with_retry(
        runner,
        &cmd,
        opts.cwd.as_deref(),
        &opts.retry,
        |d| std::thread::sleep(d),
    )?;
    if !report.output.success() {
        let message = {
            let combined = report.output.combined();
            let trimmed = combined.trim().to_string();
            if trimmed.is_empty() {
                format!("{} failed with code {}", opts.tool, report.output.code)
            } else {
                trimmed
            }
        };
        return Err(if is_transient_tool_error(&message) {
            MemoryError::TransientExternal(message)
        } else {
            MemoryError::PermanentExternal(message)
        });
    }
    let answer = report.output.stdout.trim().to_string();

    // Drift checkpoint: record the switch, rotate the session, reset topic.
    let mut switched = false;
    if drift >= opts.drift_threshold && st.turns - st.last_checkpoint_turn >= 2 {
        store.write_memory(WriteInput {
            layer: Layer::Short,
            kind: Kind::Checkpoint,
            summary: format!("Auto checkpoint before topic switch (drift={drift:.2})"),
            body: format!(
                "Automatic checkpoint created by the agent.\n\n- project_id: {}\n- old_session_id: {}\n- topic_drift: {drift:.3}\n- trigger_prompt: {user_prompt}\n",
                opts.project_id, st.session_id
            ),
            tags: vec![
                format!("project:{}", opts.project_id),
                "auto:checkpoint".to_string(),
                format!("tool:{}", opts.tool),
            ],
            source: agent_source.clone(),
            scope: scope.clone(),
            signals: Signals {
                importance_score: 0.75,
                confidence_score: 0.70,
                stability_score: 0.55,
                reuse_count: 0,
                volatility_score: 0.45,
            },
            event_type: EventType::Checkpoint,
            ..WriteInput::default()
        })?;
        st.session_id = make_id();
        st.last_checkpoint_turn = st.turns;
        st.topic_vector.clear();
        switched = true;
    }

    // Remember the exchange.
    let (layer, signals) = choose_layer(user_prompt, &answer, drift);
    let first_line: String = user_prompt
        .trim()
        .lines()
        .next()
        .unwrap_or("conversation turn")
        .chars()
        .take(120)
        .collect();
    store.write_memory(WriteInput {
        layer,
        kind: Kind::Summary,
        summary: format!("Auto turn: {first_line}"),
        body: format!(
            "Automatic memory from agent turn.\n\n## User\n{user_prompt}\n\n## Assistant\n{answer}\n\n## Metrics\n- drift={drift:.3}\n- similarity={sim:.3}\n"
        ),
        tags: vec![
            format!("project:{}", opts.project_id),
            "auto:turn".to_string(),
            format!("tool:{}", opts.tool),
        ],
        source: Source {
            session_id: st.session_id.clone(),
            ..agent_source
        },
        scope,
        signals,
        event_type: EventType::Write,
        ..WriteInput::default()
    })?;

    // A rotated session starts with a clean topic; otherwise fold the prompt in.
    if !switched {
        st.topic_vector = merge_topic(&st.topic_vector, &prompt_vec, TOPIC_ALPHA);
    }
    save_state(&runtime_root, &st)?;

    Ok(TurnOutcome {
        ok: true,
        tool: opts.tool.clone(),
        project_id: opts.project_id.clone(),
        session_id: st.session_id,
        drift,
        switched,
        answer,
        retrieved_count,
        transient_failures: report.transient_failures,
    })
}

// ============================================================================
// TESTS
// ============================================================================
