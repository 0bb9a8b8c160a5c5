//! Memory graph - derived, weighted edges between memories.
//!
//! Edges are never asserted by writers; the link weaver and the lifecycle
//! governor derive them. The graph is stored as an edge table keyed by
//! `(src_id, dst_id, kind)` and traversed with BFS plus a visited set, so no
//! graph references are held across transactions.

mod weaver;

pub use weaver::{weave_links, WeaveOptions, WeaveReport};

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

// ============================================================================
// EDGE KINDS
// ============================================================================

/// Why two memories are linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Shared tags
    #[serde(rename = "tag_cooc")]
    TagCooc,
    /// Same session
    #[serde(rename = "session")]
    Session,
    /// Close in time
    #[serde(rename = "temporal")]
    Temporal,
    /// Overlapping summaries
    #[serde(rename = "lexical")]
    Lexical,
    /// Digest-to-source link from compression/distillation
    #[serde(rename = "distill")]
    Distill,
    /// Core-block attachment
    #[serde(rename = "core-block")]
    CoreBlock,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::TagCooc => "tag_cooc",
            EdgeKind::Session => "session",
            EdgeKind::Temporal => "temporal",
            EdgeKind::Lexical => "lexical",
            EdgeKind::Distill => "distill",
            EdgeKind::CoreBlock => "core-block",
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EdgeKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tag_cooc" => Ok(EdgeKind::TagCooc),
            "session" => Ok(EdgeKind::Session),
            "temporal" => Ok(EdgeKind::Temporal),
            "lexical" => Ok(EdgeKind::Lexical),
            "distill" => Ok(EdgeKind::Distill),
            "core-block" => Ok(EdgeKind::CoreBlock),
            other => Err(MemoryError::InvalidArgument(format!(
                "invalid edge kind: {other}"
            ))),
        }
    }
}

// ============================================================================
// EDGE
// ============================================================================

/// One directed, weighted edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub src_id: String,
    pub dst_id: String,
    /// Affinity in `[0, 1]`
    pub weight: f64,
    pub kind: EdgeKind,
    pub created_at: String,
}

impl Edge {
    pub fn new(
        src_id: impl Into<String>,
        dst_id: impl Into<String>,
        weight: f64,
        kind: EdgeKind,
    ) -> Self {
        Self {
            src_id: src_id.into(),
            dst_id: dst_id.into(),
            weight: weight.clamp(0.0, 1.0),
            kind,
            created_at: crate::memory::utc_now_ts(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_edge_kind_roundtrip() {
        for kind in [
            EdgeKind::TagCooc,
            EdgeKind::Session,
            EdgeKind::Temporal,
            EdgeKind::Lexical,
            EdgeKind::Distill,
            EdgeKind::CoreBlock,
        ] {
            assert_eq!(EdgeKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert!(EdgeKind::from_str("causal").is_err());
    }

    #[test]
    fn test_edge_weight_clamped() {
        let e = Edge::new("a", "b", 1.7, EdgeKind::Lexical);
        assert_eq!(e.weight, 1.0);
        let e = Edge::new("a", "b", -0.2, EdgeKind::Session);
        assert_eq!(e.weight, 0.0);
    }
}
