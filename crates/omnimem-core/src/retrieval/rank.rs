//! Ranking components and modes.
//!
//! Every candidate gets the same component vector; the ranking mode only
//! changes how components are mixed. The relevance gate keeps heavily reused
//! but lexically unrelated rows from outranking actual matches.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::memory::{parse_ts, Signals};

/// Multiplier applied to candidates with no lexical overlap and no graph
/// path. Keeps them strictly below any lexically matching candidate.
pub const RELEVANCE_FLOOR: f64 = 0.1;

/// Reuse counts saturate here for scoring purposes.
const REUSE_SATURATION: f64 = 50.0;

// ============================================================================
// MODES
// ============================================================================

/// How components are mixed into a final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingMode {
    /// Token overlap and BM25 only
    Lexical,
    /// Signals dominate
    Cognitive,
    /// Balanced mix (default)
    #[default]
    Hybrid,
    /// Personalized-PageRank graph affinity dominates
    Ppr,
}

impl RankingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankingMode::Lexical => "lexical",
            RankingMode::Cognitive => "cognitive",
            RankingMode::Hybrid => "hybrid",
            RankingMode::Ppr => "ppr",
        }
    }
}

/// Per-mode component weights.
#[derive(Debug, Clone, Copy)]
pub struct ModeWeights {
    pub lexical: f64,
    pub fts: f64,
    pub cognitive: f64,
    pub recency: f64,
    pub graph: f64,
}

impl ModeWeights {
    pub fn for_mode(mode: RankingMode) -> Self {
        match mode {
            RankingMode::Lexical => Self {
                lexical: 0.55,
                fts: 0.35,
                cognitive: 0.0,
                recency: 0.10,
                graph: 0.0,
            },
            RankingMode::Cognitive => Self {
                lexical: 0.25,
                fts: 0.15,
                cognitive: 0.45,
                recency: 0.15,
                graph: 0.0,
            },
            RankingMode::Hybrid => Self {
                lexical: 0.35,
                fts: 0.20,
                cognitive: 0.20,
                recency: 0.10,
                graph: 0.15,
            },
            RankingMode::Ppr => Self {
                lexical: 0.25,
                fts: 0.15,
                cognitive: 0.15,
                recency: 0.05,
                graph: 0.40,
            },
        }
    }
}

// ============================================================================
// COGNITIVE SCORE
// ============================================================================

/// Weights over the governance signals, normalized so they sum to one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CognitiveWeights {
    pub importance: f64,
    pub confidence: f64,
    pub stability: f64,
    pub reuse: f64,
    pub volatility: f64,
}

impl Default for CognitiveWeights {
    fn default() -> Self {
        Self {
            importance: 0.30,
            confidence: 0.20,
            stability: 0.20,
            reuse: 0.20,
            volatility: 0.10,
        }
    }
}

impl CognitiveWeights {
    pub fn normalized(self) -> Self {
        let total =
            self.importance + self.confidence + self.stability + self.reuse + self.volatility;
        if total <= f64::EPSILON {
            return Self::default();
        }
        Self {
            importance: self.importance / total,
            confidence: self.confidence / total,
            stability: self.stability / total,
            reuse: self.reuse / total,
            volatility: self.volatility / total,
        }
    }
}

/// `w_i*importance + w_c*confidence + w_s*stability + w_r*log1p(reuse) - w_v*volatility`
pub fn cognitive_score(signals: &Signals, weights: &CognitiveWeights) -> f64 {
    let reuse_norm = ((signals.reuse_count as f64).ln_1p()
        / (REUSE_SATURATION.ln_1p()))
    .min(1.0);
    (weights.importance * signals.importance_score
        + weights.confidence * signals.confidence_score
        + weights.stability * signals.stability_score
        + weights.reuse * reuse_norm
        - weights.volatility * signals.volatility_score)
        .clamp(0.0, 1.0)
}

// ============================================================================
// OTHER COMPONENTS
// ============================================================================

/// Exponential recency: halves every `half_life_days` of age.
pub fn recency_score(updated_at: &str, now: chrono::DateTime<chrono::Utc>, half_life_days: f64) -> f64 {
    let Some(updated) = parse_ts(updated_at) else {
        return 0.0;
    };
    let age_days = (now - updated).num_seconds().max(0) as f64 / 86_400.0;
    0.5f64.powf(age_days / half_life_days.max(0.1)).clamp(0.0, 1.0)
}

/// Token-set overlap between the query and a document.
pub fn lexical_overlap(query: &HashSet<String>, doc: &HashSet<String>) -> f64 {
    jaccard(query, doc)
}

pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count() as f64;
    let union = (a.len() + b.len()) as f64 - inter;
    if union <= 0.0 {
        return 0.0;
    }
    inter / union
}

/// Hop-inverse graph affinity for non-PPR modes. Seeds sit at hop zero.
pub fn hop_affinity(hops: usize) -> f64 {
    1.0 / (1.0 + hops as f64)
}

// ============================================================================
// PERSONALIZED PAGERANK
// ============================================================================

/// Power-iteration PPR over the candidate subgraph, restart mass on seeds.
/// Returns scores normalized so the best node is 1.0.
pub fn personalized_pagerank(
    node_count: usize,
    edges: &[(usize, usize, f64)],
    seeds: &[usize],
    damping: f64,
    iterations: usize,
) -> Vec<f64> {
    if node_count == 0 {
        return Vec::new();
    }
    let mut restart = vec![0.0; node_count];
    if seeds.is_empty() {
        for r in restart.iter_mut() {
            *r = 1.0 / node_count as f64;
        }
    } else {
        for &s in seeds {
            if s < node_count {
                restart[s] = 1.0 / seeds.len() as f64;
            }
        }
    }

    let mut out_weight = vec![0.0; node_count];
    for &(src, _, w) in edges {
        out_weight[src] += w;
    }

    let mut rank = restart.clone();
    for _ in 0..iterations {
        let mut next = restart.iter().map(|r| (1.0 - damping) * r).collect::<Vec<_>>();
        for &(src, dst, w) in edges {
            if out_weight[src] > 0.0 {
                next[dst] += damping * rank[src] * (w / out_weight[src]);
            }
        }
        // Dangling mass restarts.
        let dangling: f64 = (0..node_count)
            .filter(|&n| out_weight[n] <= 0.0)
            .map(|n| rank[n])
            .sum();
        if dangling > 0.0 {
            for (n, r) in restart.iter().enumerate() {
                next[n] += damping * dangling * r;
            }
        }
        rank = next;
    }

    let max = rank.iter().cloned().fold(0.0f64, f64::max);
    if max > 0.0 {
        for r in rank.iter_mut() {
            *r /= max;
        }
    }
    rank
}

// ============================================================================
// COMPONENT VECTOR
// ============================================================================

/// Per-candidate component breakdown, surfaced in explanations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RankComponents {
    pub lexical_overlap: f64,
    pub fts_score: f64,
    pub cognitive: f64,
    pub recency: f64,
    pub graph_affinity: f64,
    pub profile_bias: f64,
    /// True when the relevance floor was applied
    pub gated: bool,
}

impl RankComponents {
    /// Mix into the final score under the mode weights, applying the
    /// relevance gate for candidates with no lexical or graph grounding.
    pub fn combined(&self, weights: &ModeWeights, has_graph_path: bool) -> f64 {
        let base = weights.lexical * self.lexical_overlap
            + weights.fts * self.fts_score
            + weights.cognitive * self.cognitive
            + weights.recency * self.recency
            + weights.graph * self.graph_affinity
            + self.profile_bias;
        if self.lexical_overlap <= 0.0 && !has_graph_path {
            base * RELEVANCE_FLOOR
        } else {
            base
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
