//! Explicit memory feedback.
//!
//! Agents and users annotate memories after use: positive/correct strengthen,
//! negative/forget weaken. Corrections also append a body note so the record
//! carries its own errata. Every feedback lands as a `memory.feedback` event,
//! which the adaptive-threshold inference reads back.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{MemoryError, Result};
use crate::memory::{utc_now_ts, EventType, Signals};
use crate::store::MemoryStore;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Positive,
    Negative,
    /// Factual correction with replacement text
    Correct,
    /// The memory should fade
    Forget,
}

impl Feedback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feedback::Positive => "positive",
            Feedback::Negative => "negative",
            Feedback::Correct => "correct",
            Feedback::Forget => "forget",
        }
    }
}

impl std::str::FromStr for Feedback {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "positive" => Ok(Feedback::Positive),
            "negative" => Ok(Feedback::Negative),
            "correct" => Ok(Feedback::Correct),
            "forget" => Ok(Feedback::Forget),
            other => Err(MemoryError::InvalidArgument(format!(
                "invalid feedback: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedbackInput {
    pub memory_id: String,
    pub feedback: Feedback,
    pub delta: i64,
    pub note: Option<String>,
    pub correction: Option<String>,
    pub session_id: String,
}

impl Default for FeedbackInput {
    fn default() -> Self {
        Self {
            memory_id: String::new(),
            feedback: Feedback::Positive,
            delta: 1,
            note: None,
            correction: None,
            session_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackReport {
    pub ok: bool,
    pub memory_id: String,
    pub feedback: Feedback,
    pub signals: Signals,
}

// ============================================================================
// APPLICATION
// ============================================================================

/// Apply one feedback annotation to one memory.
pub fn apply_memory_feedback(store: &MemoryStore, input: FeedbackInput) -> Result<FeedbackReport> {
    let delta = input.delta.max(0);
    let feedback = input.feedback;
    let tag = format!("feedback:{}", feedback.as_str());
    let correction = input.correction.clone();

    let envelope = store.mutate_memory(
        &input.memory_id,
        EventType::Feedback,
        json!({
            "action": "feedback",
            "feedback": feedback.as_str(),
            "delta": delta,
            "note": input.note,
            "session_id": input.session_id,
        }),
        move |envelope, body_md| {
            match feedback {
                Feedback::Positive | Feedback::Correct => {
                    envelope.signals.reuse_count += delta;
                }
                Feedback::Negative | Feedback::Forget => {
                    envelope.signals.reuse_count =
                        (envelope.signals.reuse_count - delta).max(0);
                }
            }
            if !envelope.tags.iter().any(|t| t == &tag) {
                envelope.tags.push(tag.clone());
            }
            if feedback == Feedback::Correct {
                if let Some(correction) = correction.filter(|c| !c.trim().is_empty()) {
                    let plain = strip_heading(&envelope.summary, body_md);
                    return Ok(Some(format!(
                        "{plain}\n\n## Feedback Correction ({})\n\n{}",
                        utc_now_ts(),
                        correction.trim()
                    )));
                }
            }
            Ok(None)
        },
    )?;

    Ok(FeedbackReport {
        ok: true,
        memory_id: envelope.id,
        feedback: input.feedback,
        signals: envelope.signals,
    })
}

/// The stored markdown minus the `# summary` heading the writer renders.
fn strip_heading(summary: &str, body_md: &str) -> String {
    let prefix = format!("# {summary}\n\n");
    body_md
        .strip_prefix(&prefix)
        .unwrap_or(body_md)
        .trim_end()
        .to_string()
}

// ============================================================================
// TESTS
// ============================================================================
