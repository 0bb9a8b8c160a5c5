//! Envelope - the structured metadata record accompanying a memory body.
//!
//! Wire shapes here are stable: the event log stores envelopes verbatim, and
//! reindexing replays them, so field names never change silently.

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Envelope format version inside the integrity block
pub const ENVELOPE_VERSION: u32 = 1;

/// Reserved archive record owning system-scoped events
pub const SYSTEM_MEMORY_ID: &str = "system000";

// ============================================================================
// LAYERS
// ============================================================================

/// Retention tier driving lifecycle policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// Transient traces
    #[default]
    Instant,
    /// Session-local working memory
    Short,
    /// Stable decisions and facts
    Long,
    /// Cold reference plus the reserved system record
    Archive,
}

impl Layer {
    pub const ALL: [Layer; 4] = [Layer::Instant, Layer::Short, Layer::Long, Layer::Archive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Instant => "instant",
            Layer::Short => "short",
            Layer::Long => "long",
            Layer::Archive => "archive",
        }
    }

    /// One tier up in the promotion path; archive is terminal.
    pub fn promoted(&self) -> Option<Layer> {
        match self {
            Layer::Instant => Some(Layer::Short),
            Layer::Short => Some(Layer::Long),
            Layer::Long | Layer::Archive => None,
        }
    }

    /// One tier down in the demotion path; instant is terminal.
    pub fn demoted(&self) -> Option<Layer> {
        match self {
            Layer::Long => Some(Layer::Short),
            Layer::Short => Some(Layer::Instant),
            Layer::Instant | Layer::Archive => None,
        }
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Layer {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "instant" => Ok(Layer::Instant),
            "short" => Ok(Layer::Short),
            "long" => Ok(Layer::Long),
            "archive" => Ok(Layer::Archive),
            other => Err(MemoryError::InvalidArgument(format!(
                "invalid layer: {other}"
            ))),
        }
    }
}

// ============================================================================
// KINDS
// ============================================================================

/// Semantic role of a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    #[default]
    Note,
    Decision,
    Task,
    Checkpoint,
    Summary,
    Evidence,
    /// Automatic retrieval trace; always instant, never itself retrievable
    Retrieve,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Note => "note",
            Kind::Decision => "decision",
            Kind::Task => "task",
            Kind::Checkpoint => "checkpoint",
            Kind::Summary => "summary",
            Kind::Evidence => "evidence",
            Kind::Retrieve => "retrieve",
        }
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Kind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "note" => Ok(Kind::Note),
            "decision" => Ok(Kind::Decision),
            "task" => Ok(Kind::Task),
            "checkpoint" => Ok(Kind::Checkpoint),
            "summary" => Ok(Kind::Summary),
            "evidence" => Ok(Kind::Evidence),
            "retrieve" => Ok(Kind::Retrieve),
            other => Err(MemoryError::InvalidArgument(format!(
                "invalid kind: {other}"
            ))),
        }
    }
}

// ============================================================================
// EVENT TYPES
// ============================================================================

/// State-changing event kinds; the event log is the ordering authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "memory.write")]
    Write,
    #[serde(rename = "memory.update")]
    Update,
    #[serde(rename = "memory.checkpoint")]
    Checkpoint,
    #[serde(rename = "memory.promote")]
    Promote,
    #[serde(rename = "memory.verify")]
    Verify,
    #[serde(rename = "memory.sync")]
    Sync,
    #[serde(rename = "memory.decay")]
    Decay,
    #[serde(rename = "memory.consolidate")]
    Consolidate,
    #[serde(rename = "memory.retrieve")]
    Retrieve,
    #[serde(rename = "memory.feedback")]
    Feedback,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Write => "memory.write",
            EventType::Update => "memory.update",
            EventType::Checkpoint => "memory.checkpoint",
            EventType::Promote => "memory.promote",
            EventType::Verify => "memory.verify",
            EventType::Sync => "memory.sync",
            EventType::Decay => "memory.decay",
            EventType::Consolidate => "memory.consolidate",
            EventType::Retrieve => "memory.retrieve",
            EventType::Feedback => "memory.feedback",
        }
    }

    /// Event types allowed on the memory-creating write path.
    pub fn creates_memory(&self) -> bool {
        matches!(
            self,
            EventType::Write
                | EventType::Update
                | EventType::Checkpoint
                | EventType::Promote
                | EventType::Retrieve
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory.write" => Ok(EventType::Write),
            "memory.update" => Ok(EventType::Update),
            "memory.checkpoint" => Ok(EventType::Checkpoint),
            "memory.promote" => Ok(EventType::Promote),
            "memory.verify" => Ok(EventType::Verify),
            "memory.sync" => Ok(EventType::Sync),
            "memory.decay" => Ok(EventType::Decay),
            "memory.consolidate" => Ok(EventType::Consolidate),
            "memory.retrieve" => Ok(EventType::Retrieve),
            "memory.feedback" => Ok(EventType::Feedback),
            other => Err(MemoryError::InvalidArgument(format!(
                "invalid event_type: {other}"
            ))),
        }
    }
}

// ============================================================================
// SUB-RECORDS
// ============================================================================

/// Governance signals; all scores live in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signals {
    pub importance_score: f64,
    pub confidence_score: f64,
    pub stability_score: f64,
    pub reuse_count: i64,
    pub volatility_score: f64,
}

impl Default for Signals {
    fn default() -> Self {
        Self {
            importance_score: 0.5,
            confidence_score: 0.5,
            stability_score: 0.5,
            reuse_count: 0,
            volatility_score: 0.5,
        }
    }
}

impl Signals {
    /// Clamp all scores into `[0, 1]` and the reuse count to non-negative.
    pub fn clamped(mut self) -> Self {
        self.importance_score = self.importance_score.clamp(0.0, 1.0);
        self.confidence_score = self.confidence_score.clamp(0.0, 1.0);
        self.stability_score = self.stability_score.clamp(0.0, 1.0);
        self.volatility_score = self.volatility_score.clamp(0.0, 1.0);
        self.reuse_count = self.reuse_count.max(0);
        self
    }
}

/// Pointer from a memory to another memory, URL, file, or other entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "type")]
    pub ref_type: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Reference {
    pub fn memory(target: impl Into<String>) -> Self {
        Self {
            ref_type: "memory".to_string(),
            target: target.into(),
            note: None,
        }
    }

    /// Parse the `type:target[:note]` shorthand.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.splitn(3, ':');
        let ref_type = parts.next().unwrap_or_default();
        let target = parts.next().ok_or_else(|| {
            MemoryError::InvalidArgument(format!("invalid ref format: {raw}"))
        })?;
        if ref_type.is_empty() || target.is_empty() {
            return Err(MemoryError::InvalidArgument(format!(
                "invalid ref format: {raw}"
            )));
        }
        let note = parts.next().filter(|n| !n.is_empty()).map(str::to_string);
        Ok(Self {
            ref_type: ref_type.to_string(),
            target: target.to_string(),
            note,
        })
    }
}

/// Where a memory came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub tool: String,
    pub account: String,
    pub device: String,
    pub session_id: String,
}

impl Default for Source {
    fn default() -> Self {
        Self {
            tool: "unknown".to_string(),
            account: "default".to_string(),
            device: "local".to_string(),
            session_id: String::new(),
        }
    }
}

/// What a memory is about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub project_id: String,
    pub workspace: String,
}

/// Integrity block; the envelope owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integrity {
    pub content_sha256: String,
    pub envelope_version: u32,
}

// ============================================================================
// ENVELOPE
// ============================================================================

/// The full metadata record for one memory. Two projections exist on disk
/// (markdown body, indexed row); neither owns the other - the event log does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub schema_version: String,
    pub created_at: String,
    pub updated_at: String,
    pub layer: Layer,
    pub kind: Kind,
    pub summary: String,
    pub body_md_path: String,
    pub tags: Vec<String>,
    pub refs: Vec<Reference>,
    pub signals: Signals,
    pub cred_refs: Vec<String>,
    pub source: Source,
    pub scope: Scope,
    pub integrity: Integrity,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_layer_roundtrip_and_paths() {
        for layer in Layer::ALL {
            assert_eq!(Layer::from_str(layer.as_str()).unwrap(), layer);
        }
        assert!(Layer::from_str("warm").is_err());
        assert_eq!(Layer::Instant.promoted(), Some(Layer::Short));
        assert_eq!(Layer::Short.promoted(), Some(Layer::Long));
        assert_eq!(Layer::Long.promoted(), None);
        assert_eq!(Layer::Long.demoted(), Some(Layer::Short));
        assert_eq!(Layer::Archive.demoted(), None);
    }

    #[test]
    fn test_event_type_wire_names() {
        let s = serde_json::to_string(&EventType::Write).unwrap();
        assert_eq!(s, "\"memory.write\"");
        assert_eq!(
            EventType::from_str("memory.feedback").unwrap(),
            EventType::Feedback
        );
        assert!(EventType::from_str("memory.unknown").is_err());
        assert!(EventType::Checkpoint.creates_memory());
        assert!(!EventType::Verify.creates_memory());
    }

    #[test]
    fn test_reference_parse() {
        let r = Reference::parse("memory:abc123").unwrap();
        assert_eq!(r.ref_type, "memory");
        assert_eq!(r.target, "abc123");
        assert_eq!(r.note, None);

        let r = Reference::parse("url:https://example.com:release notes").unwrap();
        assert_eq!(r.target, "https");
        assert_eq!(r.note.as_deref(), Some("//example.com:release notes"));

        assert!(Reference::parse("nocolon").is_err());
        assert!(Reference::parse(":empty").is_err());
    }

    #[test]
    fn test_reference_wire_shape() {
        let r = Reference {
            ref_type: "file".into(),
            target: "src/lib.rs".into(),
            note: None,
        };
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#"{"type":"file","target":"src/lib.rs"}"#);
    }

    #[test]
    fn test_signals_clamp() {
        let s = Signals {
            importance_score: 1.5,
            confidence_score: -0.2,
            stability_score: 0.5,
            reuse_count: -3,
            volatility_score: 2.0,
        }
        .clamped();
        assert_eq!(s.importance_score, 1.0);
        assert_eq!(s.confidence_score, 0.0);
        assert_eq!(s.reuse_count, 0);
        assert_eq!(s.volatility_score, 1.0);
    }

    #[test]
    fn test_envelope_serde_field_names() {
        let env = Envelope {
            id: "m1".into(),
            schema_version: "0.1.0".into(),
            created_at: "2026-08-01T00:00:00Z".into(),
            updated_at: "2026-08-01T00:00:00Z".into(),
            layer: Layer::Short,
            kind: Kind::Note,
            summary: "s".into(),
            body_md_path: "short/2026/08/m1.md".into(),
            tags: vec!["t".into()],
            refs: vec![],
            signals: Signals::default(),
            cred_refs: vec!["env://KEY".into()],
            source: Source::default(),
            scope: Scope::default(),
            integrity: Integrity {
                content_sha256: "x".into(),
                envelope_version: ENVELOPE_VERSION,
            },
        };
        let v: serde_json::Value = serde_json::to_value(&env).unwrap();
        assert_eq!(v["layer"], "short");
        assert_eq!(v["kind"], "note");
        assert_eq!(v["signals"]["importance_score"], 0.5);
        assert_eq!(v["integrity"]["envelope_version"], 1);
        assert_eq!(v["source"]["device"], "local");
        let back: Envelope = serde_json::from_value(v).unwrap();
        assert_eq!(back, env);
    }
}
