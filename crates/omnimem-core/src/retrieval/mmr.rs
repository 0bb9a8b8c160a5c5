//! Maximal Marginal Relevance diversification.

use std::collections::HashSet;

use super::rank::jaccard;

/// Result of an MMR pass: chosen candidate indices in selection order, plus
/// the combined score each selection won with. The score sequence is
/// non-increasing for a fixed lambda.
#[derive(Debug, Clone)]
pub struct MmrSelection {
    pub indices: Vec<usize>,
    pub scores: Vec<f64>,
}

/// Select up to `k` candidates trading relevance against similarity to the
/// already-selected set: `lambda * relevance - (1 - lambda) * max_sim`.
pub fn mmr_select(
    relevance: &[f64],
    token_sets: &[HashSet<String>],
    lambda: f64,
    k: usize,
) -> MmrSelection {
    debug_assert_eq!(relevance.len(), token_sets.len());
    let lambda = lambda.clamp(0.0, 1.0);
    let n = relevance.len();
    let mut remaining: Vec<usize> = (0..n).collect();
    let mut indices = Vec::new();
    let mut scores = Vec::new();

    while indices.len() < k && !remaining.is_empty() {
        let mut best_pos = 0usize;
        let mut best_score = f64::NEG_INFINITY;
        for (pos, &cand) in remaining.iter().enumerate() {
            let max_sim = indices
                .iter()
                .map(|&sel: &usize| jaccard(&token_sets[cand], &token_sets[sel]))
                .fold(0.0f64, f64::max);
            let score = lambda * relevance[cand] - (1.0 - lambda) * max_sim;
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }
        indices.push(remaining.remove(best_pos));
        scores.push(best_score);
    }

    MmrSelection { indices, scores }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn set(words: &[&str]) -> HashSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_first_pick_is_most_relevant() {
        let relevance = vec![0.2, 0.9, 0.5];
        let sets = vec![set(&["a"]), set(&["b"]), set(&["c"])];
        let sel = mmr_select(&relevance, &sets, 0.7, 3);
        assert_eq!(sel.indices[0], 1);
    }

    #[test]
    fn test_near_duplicates_are_deferred() {
        // Two near-identical high-relevance items, one distinct medium one.
        let relevance = vec![0.9, 0.88, 0.6];
        let sets = vec![
            set(&["retrieval", "sqlite", "tuning"]),
            set(&["retrieval", "sqlite", "tuning", "extra"]),
            set(&["daemon", "scheduler"]),
        ];
        let sel = mmr_select(&relevance, &sets, 0.5, 2);
        assert_eq!(sel.indices, vec![0, 2]);
    }

    #[test]
    fn test_selection_scores_non_increasing() {
        let relevance = vec![0.9, 0.8, 0.7, 0.65, 0.3];
        let sets = vec![
            set(&["a", "b"]),
            set(&["a", "c"]),
            set(&["d", "e"]),
            set(&["a", "b", "c"]),
            set(&["f"]),
        ];
        for lambda in [0.3, 0.5, 0.7, 0.9] {
            let sel = mmr_select(&relevance, &sets, lambda, 5);
            for w in sel.scores.windows(2) {
                assert!(
                    w[0] >= w[1] - 1e-12,
                    "scores must not increase: {:?} (lambda {lambda})",
                    sel.scores
                );
            }
        }
    }

    #[test]
    fn test_k_bounds_selection() {
        let relevance = vec![0.9, 0.8];
        let sets = vec![set(&["a"]), set(&["b"])];
        let sel = mmr_select(&relevance, &sets, 0.7, 10);
        assert_eq!(sel.indices.len(), 2);
        assert_eq!(mmr_select(&relevance, &sets, 0.7, 1).indices.len(), 1);
    }
}
