//! Retrieval engine - hybrid lexical + graph + signal ranking.
//!
//! Pipeline: FTS seed (substring fallback) -> bounded BFS over the link graph
//! -> component ranking under the active mode -> relevance gate -> optional
//! profile/drift biasing -> MMR diversification -> core-block injection ->
//! self-check. Every stage leaves a trace in the explanation so callers can
//! see why an item was recalled.

mod mmr;
mod profile;
mod rank;
mod route;

pub use mmr::{mmr_select, MmrSelection};
pub use profile::{
    analyze_profile_drift, build_user_profile, DriftInfo, DriftReport, DriftStatus, ProfileReport,
    UserProfile,
};
pub use rank::{
    cognitive_score, hop_affinity, jaccard, lexical_overlap, personalized_pagerank,
    CognitiveWeights, ModeWeights, RankComponents, RankingMode, RELEVANCE_FLOOR,
};
pub use route::{infer_query_route, QueryRoute};

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error::Result;
use crate::memory::{Kind, Layer, SYSTEM_MEMORY_ID};
use crate::store::{MemoryRecord, MemoryStore};

// ============================================================================
// TOKENIZATION
// ============================================================================

/// Lowercased word tokens, first occurrence order, deduplicated.
pub fn tokenize(text: &str) -> Vec<String> {
    static WORD: OnceLock<Regex> = OnceLock::new();
    let re = WORD.get_or_init(|| Regex::new(r"[A-Za-z0-9_]+").expect("static"));
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in re.find_iter(text) {
        let token = m.as_str().to_lowercase();
        if seen.insert(token.clone()) {
            out.push(token);
        }
    }
    out
}

/// Token set for overlap math.
pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

// ============================================================================
// OPTIONS
// ============================================================================

/// Knobs for one retrieval call. Defaults match the daemon's steady state.
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub seed_limit: usize,
    /// Below this many FTS seeds, a substring scan supplements them.
    pub seed_floor: usize,
    pub depth: usize,
    pub per_hop: usize,
    pub min_weight: f64,
    pub ranking_mode: RankingMode,
    pub cognitive_weights: CognitiveWeights,
    pub recency_half_life_days: f64,
    pub mmr_lambda: f64,
    pub max_items: usize,
    pub layer: Option<Layer>,
    pub include_core_blocks: bool,
    pub core_block_limit: usize,
    pub profile_bias: bool,
    pub profile_weight: f64,
    pub drift_bias: bool,
    pub drift_threshold: f64,
    pub self_check: bool,
    /// Bump `reuse_count` on selected items by `feedback_reuse_step`.
    pub adaptive_feedback: bool,
    pub feedback_reuse_step: i64,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            seed_limit: 12,
            seed_floor: 3,
            depth: 2,
            per_hop: 6,
            min_weight: 0.18,
            ranking_mode: RankingMode::Hybrid,
            cognitive_weights: CognitiveWeights::default(),
            recency_half_life_days: 30.0,
            mmr_lambda: 0.7,
            max_items: 8,
            layer: None,
            include_core_blocks: false,
            core_block_limit: 2,
            profile_bias: false,
            profile_weight: 0.2,
            drift_bias: false,
            drift_threshold: 0.6,
            self_check: true,
            adaptive_feedback: false,
            feedback_reuse_step: 1,
        }
    }
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ExpansionPath {
    /// Candidate we expanded from
    pub from: String,
    pub hops: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedItem {
    pub id: String,
    pub layer: Layer,
    pub kind: Kind,
    pub summary: String,
    pub updated_at: String,
    pub body_md_path: String,
    pub score: f64,
    pub components: RankComponents,
    pub why_recalled: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion: Option<ExpansionPath>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftAdjustment {
    pub score: f64,
    pub status: DriftStatus,
    pub applied: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileBiasInfo {
    pub enabled: bool,
    pub top_tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoreBlockInjection {
    pub enabled: bool,
    pub injected: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelfCheck {
    /// Fraction of query tokens covered by the result set
    pub coverage: f64,
    pub missing_tokens: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MmrExplain {
    pub lambda: f64,
    pub selection_scores: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrieveExplain {
    pub ranking_mode: RankingMode,
    pub route: QueryRoute,
    pub seed_count: usize,
    pub expanded_count: usize,
    pub candidate_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift: Option<DriftAdjustment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ProfileBiasInfo>,
    pub core_blocks: CoreBlockInjection,
    pub mmr: MmrExplain,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_check: Option<SelfCheck>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrieveOutcome {
    pub ok: bool,
    pub items: Vec<RetrievedItem>,
    pub explain: RetrieveExplain,
}

// ============================================================================
// ENGINE
// ============================================================================

struct Candidate {
    record: MemoryRecord,
    fts_raw: f64,
    hops: usize,
    via: Option<String>,
    doc_tokens: HashSet<String>,
}

/// Run the full retrieval pipeline for one query in one scope.
pub fn retrieve(
    store: &MemoryStore,
    query: &str,
    project_id: &str,
    session_id: &str,
    opts: &RetrieveOptions,
) -> Result<RetrieveOutcome> {
    let route = infer_query_route(query);
    let query_tokens = token_set(query);
    let now = chrono::Utc::now();

    // Drift bias: a topic shift widens the net and leans on recency.
    let mut depth = opts.depth;
    let mut mmr_lambda = opts.mmr_lambda;
    let mut recency_boost = 1.0;
    let mut drift_adjustment = None;
    if opts.drift_bias {
        let report = analyze_profile_drift(store, project_id, "", 14, 90, 400)?;
        let applied = report.drift.score >= opts.drift_threshold;
        if applied {
            depth = depth.saturating_sub(1).max(1);
            mmr_lambda = (mmr_lambda - 0.15).max(0.3);
            recency_boost = 1.5;
        }
        drift_adjustment = Some(DriftAdjustment {
            score: report.drift.score,
            status: report.drift.status,
            applied,
        });
    }

    // Seed: FTS with a substring fallback below the floor.
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();
    for (record, fts_raw) in
        store.fts_candidates(query, opts.layer, project_id, session_id, opts.seed_limit)?
    {
        push_candidate(&mut candidates, &mut by_id, record, fts_raw, 0, None);
    }
    if candidates.len() < opts.seed_floor {
        for record in
            store.substring_candidates(query, opts.layer, project_id, opts.seed_limit)?
        {
            push_candidate(&mut candidates, &mut by_id, record, 0.0, 0, None);
        }
    }
    let seed_count = candidates.len();

    // Graph expansion: bounded BFS with a visited set.
    let mut frontier: Vec<String> = candidates.iter().map(|c| c.record.envelope.id.clone()).collect();
    for hop in 1..=depth {
        let mut next_frontier = Vec::new();
        for src in &frontier {
            for edge in store.links_from(src, opts.min_weight, opts.per_hop)? {
                if by_id.contains_key(&edge.dst_id) || edge.dst_id == SYSTEM_MEMORY_ID {
                    continue;
                }
                let Some(record) = store.get_memory(&edge.dst_id)? else {
                    continue;
                };
                if record.envelope.kind == Kind::Retrieve {
                    continue;
                }
                if !project_id.is_empty() && record.envelope.scope.project_id != project_id {
                    continue;
                }
                next_frontier.push(edge.dst_id.clone());
                push_candidate(
                    &mut candidates,
                    &mut by_id,
                    record,
                    0.0,
                    hop,
                    Some(src.clone()),
                );
            }
        }
        frontier = next_frontier;
        if frontier.is_empty() {
            break;
        }
    }
    let expanded_count = candidates.len() - seed_count;

    // Optional profile bias.
    let mut profile_info = None;
    let mut profile_tags: HashSet<String> = HashSet::new();
    if opts.profile_bias {
        let report = build_user_profile(store, project_id, "", 200)?;
        profile_tags = report.profile.top_tags.iter().cloned().collect();
        profile_info = Some(ProfileBiasInfo {
            enabled: true,
            top_tags: report.profile.top_tags.clone(),
        });
    }

    // PPR over the candidate subgraph when the mode asks for it.
    let ppr_scores = if opts.ranking_mode == RankingMode::Ppr {
        let ids: Vec<String> = candidates.iter().map(|c| c.record.envelope.id.clone()).collect();
        let index_of: HashMap<&str, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let mut edges = Vec::new();
        for (i, id) in ids.iter().enumerate() {
            for edge in store.links_from(id, opts.min_weight, opts.per_hop * 2)? {
                if let Some(&j) = index_of.get(edge.dst_id.as_str()) {
                    edges.push((i, j, edge.weight));
                }
            }
        }
        let seeds: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.hops == 0)
            .map(|(i, _)| i)
            .collect();
        Some(personalized_pagerank(ids.len(), &edges, &seeds, 0.85, 24))
    } else {
        None
    };

    // Component ranking.
    let weights = ModeWeights::for_mode(opts.ranking_mode);
    let cog_weights = opts.cognitive_weights.normalized();
    let max_fts = candidates
        .iter()
        .map(|c| c.fts_raw)
        .fold(0.0f64, f64::max)
        .max(f64::EPSILON);
    let mut scored: Vec<(RetrievedItem, HashSet<String>)> = Vec::with_capacity(candidates.len());
    for (i, cand) in candidates.iter().enumerate() {
        let env = &cand.record.envelope;
        let graph_affinity = match &ppr_scores {
            Some(scores) => scores.get(i).copied().unwrap_or(0.0),
            None => hop_affinity(cand.hops),
        };
        let mut components = RankComponents {
            lexical_overlap: lexical_overlap(&query_tokens, &cand.doc_tokens),
            fts_score: (cand.fts_raw / max_fts).clamp(0.0, 1.0),
            cognitive: cognitive_score(&env.signals, &cog_weights),
            recency: (rank::recency_score(&env.updated_at, now, opts.recency_half_life_days)
                * recency_boost)
                .min(1.0),
            graph_affinity,
            profile_bias: 0.0,
            gated: false,
        };
        if opts.profile_bias && !profile_tags.is_empty() {
            let tag_set: HashSet<String> = env.tags.iter().cloned().collect();
            components.profile_bias = opts.profile_weight * jaccard(&tag_set, &profile_tags);
        }
        let has_graph_path = cand.via.is_some();
        components.gated = components.lexical_overlap <= 0.0 && !has_graph_path;
        let score = components.combined(&weights, has_graph_path);

        let mut why = Vec::new();
        if cand.hops == 0 {
            why.push(if cand.fts_raw > 0.0 {
                "fts-seed".to_string()
            } else {
                "substring-seed".to_string()
            });
        }
        let expansion = cand.via.as_ref().map(|from| {
            why.push(format!("graph:{}-hop via {}", cand.hops, &from[..from.len().min(8)]));
            ExpansionPath {
                from: from.clone(),
                hops: cand.hops,
            }
        });

        // Selection-similarity tokens: summary plus tags.
        let mut sim_tokens = token_set(&env.summary);
        sim_tokens.extend(env.tags.iter().map(|t| t.to_lowercase()));

        scored.push((
            RetrievedItem {
                id: env.id.clone(),
                layer: env.layer,
                kind: env.kind,
                summary: env.summary.clone(),
                updated_at: env.updated_at.clone(),
                body_md_path: env.body_md_path.clone(),
                score,
                components,
                why_recalled: why,
                expansion,
            },
            sim_tokens,
        ));
    }
    scored.sort_by(|a, b| {
        b.0.score
            .partial_cmp(&a.0.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // MMR diversification over the ranked list.
    let relevance: Vec<f64> = scored.iter().map(|(item, _)| item.score).collect();
    let token_sets: Vec<HashSet<String>> = scored.iter().map(|(_, s)| s.clone()).collect();
    let selection = mmr_select(&relevance, &token_sets, mmr_lambda, opts.max_items);
    let mut items: Vec<RetrievedItem> = selection
        .indices
        .iter()
        .map(|&i| scored[i].0.clone())
        .collect();

    // Core blocks go first, priority order.
    let mut injected = 0usize;
    if opts.include_core_blocks {
        let blocks = store.list_core_blocks(project_id, session_id, opts.core_block_limit)?;
        let mut front = Vec::with_capacity(blocks.len());
        for block in blocks {
            injected += 1;
            front.push(RetrievedItem {
                id: block.memory_id.clone(),
                layer: Layer::Long,
                kind: Kind::Note,
                summary: block.content.lines().next().unwrap_or(&block.name).to_string(),
                updated_at: block.updated_at.clone(),
                body_md_path: String::new(),
                score: 1.0,
                components: RankComponents::default(),
                why_recalled: vec![format!("core-block:{}", block.name)],
                expansion: None,
            });
        }
        front.append(&mut items);
        items = front;
    }

    // Self-check: how much of the query the final set actually covers.
    let self_check = if opts.self_check {
        let mut covered: HashSet<String> = HashSet::new();
        for item in &items {
            covered.extend(token_set(&item.summary));
            if let Some(i) = by_id.get(&item.id) {
                covered.extend(candidates[*i].doc_tokens.iter().cloned());
            }
        }
        let missing: Vec<String> = query_tokens
            .iter()
            .filter(|t| !covered.contains(*t))
            .cloned()
            .collect();
        let coverage = if query_tokens.is_empty() {
            0.0
        } else {
            1.0 - missing.len() as f64 / query_tokens.len() as f64
        };
        Some(SelfCheck {
            coverage,
            missing_tokens: missing,
        })
    } else {
        None
    };

    if opts.adaptive_feedback {
        let ids: Vec<String> = items
            .iter()
            .filter(|i| !i.why_recalled.iter().any(|w| w.starts_with("core-block:")))
            .map(|i| i.id.clone())
            .collect();
        store.bump_reuse_counts(&ids, opts.feedback_reuse_step)?;
    }

    Ok(RetrieveOutcome {
        ok: true,
        items,
        explain: RetrieveExplain {
            ranking_mode: opts.ranking_mode,
            route,
            seed_count,
            expanded_count,
            candidate_count: candidates.len(),
            drift: drift_adjustment,
            profile: profile_info,
            core_blocks: CoreBlockInjection {
                enabled: opts.include_core_blocks,
                injected,
            },
            mmr: MmrExplain {
                lambda: mmr_lambda,
                selection_scores: selection.scores,
            },
            self_check,
        },
    })
}

fn push_candidate(
    candidates: &mut Vec<Candidate>,
    by_id: &mut HashMap<String, usize>,
    record: MemoryRecord,
    fts_raw: f64,
    hops: usize,
    via: Option<String>,
) {
    let id = record.envelope.id.clone();
    if by_id.contains_key(&id) {
        return;
    }
    let mut doc_tokens = token_set(&record.envelope.summary);
    doc_tokens.extend(token_set(&record.body_text));
    by_id.insert(id, candidates.len());
    candidates.push(Candidate {
        record,
        fts_raw,
        hops,
        via,
        doc_tokens,
    });
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, EdgeKind};
    use crate::memory::{Scope, Signals, Source};
    use crate::store::WriteInput;
    use crate::test_support::open_test_store;

    fn write(
        store: &MemoryStore,
        summary: &str,
        signals: Signals,
        session: &str,
    ) -> String {
        store
            .write_memory(WriteInput {
                layer: Layer::Short,
                kind: Kind::Note,
                summary: summary.to_string(),
                body: "retrieval ranking test body".to_string(),
                signals,
                source: Source {
                    session_id: session.to_string(),
                    ..Source::default()
                },
                scope: Scope {
                    project_id: "OM".to_string(),
                    workspace: String::new(),
                },
                ..WriteInput::default()
            })
            .unwrap()
            .envelope
            .id
    }

    fn signals(imp: f64, conf: f64, stab: f64, reuse: i64, vol: f64) -> Signals {
        Signals {
            importance_score: imp,
            confidence_score: conf,
            stability_score: stab,
            reuse_count: reuse,
            volatility_score: vol,
        }
    }

    #[test]
    fn test_tokenize_dedups_in_order() {
        assert_eq!(
            tokenize("Alpha beta ALPHA gamma-beta"),
            vec!["alpha", "beta", "gamma"]
        );
    }

    #[test]
    fn test_cognitive_signals_break_lexical_ties() {
        let (store, _dir) = open_test_store();
        write(
            &store,
            "alpha retrieval shared token high-priority",
            signals(1.0, 1.0, 1.0, 6, 0.0),
            "s1",
        );
        write(
            &store,
            "alpha retrieval shared token low-priority",
            signals(0.0, 0.0, 0.0, 0, 0.0),
            "s1",
        );
        let out = retrieve(
            &store,
            "alpha retrieval shared",
            "OM",
            "",
            &RetrieveOptions::default(),
        )
        .unwrap();
        assert!(out.ok);
        assert!(out.items.len() >= 2);
        assert!(out.items[0].summary.contains("high-priority"));
        assert!(out.items[0].score > out.items[1].score);
    }

    #[test]
    fn test_relevance_gate_keeps_exact_match_on_top() {
        let (store, _dir) = open_test_store();
        write(
            &store,
            "alpha beta gamma exact match candidate",
            signals(0.55, 0.5, 0.5, 0, 0.0),
            "s1",
        );
        write(
            &store,
            "alpha beta gamma old reused generic note with many unrelated filler terms delta epsilon zeta theta kappa lambda",
            signals(0.6, 0.6, 0.6, 25, 0.0),
            "s1",
        );
        let out = retrieve(&store, "alpha beta gamma", "OM", "", &RetrieveOptions::default())
            .unwrap();
        assert!(out.items.len() >= 2);
        assert!(out.items[0].summary.contains("exact match candidate"));
        assert!(
            out.items[0].components.lexical_overlap > out.items[1].components.lexical_overlap
        );
        assert!(out.items[0].score > out.items[1].score);
    }

    #[test]
    fn test_graph_expansion_pulls_linked_memories() {
        let (store, _dir) = open_test_store();
        let seed = write(&store, "daemon scheduling notes", signals(0.6, 0.6, 0.6, 1, 0.2), "s1");
        let linked = write(
            &store,
            "backoff policy discussion",
            signals(0.6, 0.6, 0.6, 1, 0.2),
            "s1",
        );
        store
            .add_links(&[Edge::new(seed.clone(), linked.clone(), 0.6, EdgeKind::Session)])
            .unwrap();
        let out = retrieve(&store, "daemon scheduling", "OM", "", &RetrieveOptions::default())
            .unwrap();
        let expanded = out.items.iter().find(|i| i.id == linked).unwrap();
        let path = expanded.expansion.as_ref().unwrap();
        assert_eq!(path.from, seed);
        assert_eq!(path.hops, 1);
        assert!(out.explain.expanded_count >= 1);
    }

    #[test]
    fn test_ppr_mode_reports_itself() {
        let (store, _dir) = open_test_store();
        let a = write(&store, "graph alpha shared", signals(0.8, 0.8, 0.8, 1, 0.2), "s-r");
        let b = write(&store, "graph beta shared", signals(0.7, 0.7, 0.7, 1, 0.2), "s-r");
        store
            .add_links(&[Edge::new(a, b, 0.5, EdgeKind::TagCooc)])
            .unwrap();
        let out = retrieve(
            &store,
            "graph shared",
            "OM",
            "",
            &RetrieveOptions {
                ranking_mode: RankingMode::Ppr,
                ..RetrieveOptions::default()
            },
        )
        .unwrap();
        assert_eq!(out.explain.ranking_mode, RankingMode::Ppr);
        assert!(!out.items.is_empty());
    }

    #[test]
    fn test_core_block_injection() {
        let (store, _dir) = open_test_store();
        store
            .upsert_core_block(crate::store::CoreBlockInput {
                name: "constraints".to_string(),
                content: "Always include security and rollback notes.".to_string(),
                project_id: "OM".to_string(),
                session_id: "s1".to_string(),
                ..crate::store::CoreBlockInput::default()
            })
            .unwrap();
        let out = retrieve(
            &store,
            "unrelated query",
            "OM",
            "s1",
            &RetrieveOptions {
                include_core_blocks: true,
                core_block_limit: 2,
                max_items: 4,
                ..RetrieveOptions::default()
            },
        )
        .unwrap();
        assert!(out.explain.core_blocks.enabled);
        assert!(out.explain.core_blocks.injected >= 1);
        assert!(out
            .items
            .iter()
            .any(|i| i.why_recalled.iter().any(|w| w.starts_with("core-block:"))));
    }

    #[test]
    fn test_self_check_reports_missing_tokens() {
        let (store, _dir) = open_test_store();
        write(&store, "alpha only", signals(0.6, 0.6, 0.6, 0, 0.2), "s1");
        let out = retrieve(&store, "alpha zeta", "OM", "", &RetrieveOptions::default()).unwrap();
        let check = out.explain.self_check.unwrap();
        assert!(check.coverage < 1.0);
        assert!(check.missing_tokens.contains(&"zeta".to_string()));
    }

    #[test]
    fn test_adaptive_feedback_bumps_reuse() {
        let (store, _dir) = open_test_store();
        let id = write(&store, "bump target alpha", signals(0.6, 0.6, 0.6, 0, 0.2), "s1");
        retrieve(
            &store,
            "bump target",
            "OM",
            "",
            &RetrieveOptions {
                adaptive_feedback: true,
                feedback_reuse_step: 2,
                ..RetrieveOptions::default()
            },
        )
        .unwrap();
        let record = store.get_memory(&id).unwrap().unwrap();
        assert_eq!(record.envelope.signals.reuse_count, 2);
    }
}
