//! Query-route classification.
//!
//! A cheap intent tag steering context assembly and retrieval bias. Keyword
//! lists cover English and the CJK phrasings the original corpus carried.

use serde::{Deserialize, Serialize};

/// Query-intent tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryRoute {
    /// How-to / steps / commands
    Procedural,
    /// When / timeline / session-bound
    Episodic,
    /// What-is / definitions / concepts
    Semantic,
    #[default]
    General,
}

impl QueryRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryRoute::Procedural => "procedural",
            QueryRoute::Episodic => "episodic",
            QueryRoute::Semantic => "semantic",
            QueryRoute::General => "general",
        }
    }
}

impl std::fmt::Display for QueryRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const PROCEDURAL_HITS: &[&str] = &[
    "how to", "steps", "command", "cli", "script", "怎么", "步骤", "命令", "脚本", "如何",
];
const EPISODIC_HITS: &[&str] = &[
    "when", "yesterday", "last time", "session", "timeline", "之前", "上次", "什么时候", "昨天",
];
const SEMANTIC_HITS: &[&str] = &[
    "what is", "define", "concept", "meaning", "是什么", "定义", "概念", "原理",
];

/// Classify a query. Procedural wins ties, matching the write-side bias
/// toward actionable knowledge.
pub fn infer_query_route(query: &str) -> QueryRoute {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return QueryRoute::General;
    }
    if PROCEDURAL_HITS.iter().any(|h| q.contains(h)) {
        return QueryRoute::Procedural;
    }
    if EPISODIC_HITS.iter().any(|h| q.contains(h)) {
        return QueryRoute::Episodic;
    }
    if SEMANTIC_HITS.iter().any(|h| q.contains(h)) {
        return QueryRoute::Semantic;
    }
    QueryRoute::General
}

// ============================================================================
// TESTS
// ============================================================================
