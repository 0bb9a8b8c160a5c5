//! Memory model - the fundamental unit of the store.
//!
//! A memory is an immutable-after-write record: a markdown body on disk, an
//! envelope of structured metadata, and governance signals. Layers and kinds
//! are closed sum types validated at every boundary.

mod envelope;
pub(crate) mod policy;

pub use envelope::{
    Envelope, EventType, Integrity, Kind, Layer, Reference, Scope, Signals, Source, ENVELOPE_VERSION,
    SYSTEM_MEMORY_ID,
};
pub use policy::{scan_for_secrets, validate_cred_ref};

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

// ============================================================================
// SHARED HELPERS
// ============================================================================

/// Current UTC time at second granularity, ISO-8601 (`2026-08-01T12:34:56Z`).
pub fn utc_now_ts() -> String {
    format_ts(Utc::now())
}

/// Format any UTC instant the way the store does.
pub fn format_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse a stored timestamp. Accepts `Z` and numeric-offset forms.
pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Opaque globally unique token (UUID v4, simple form).
pub fn make_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Hex SHA-256 over a UTF-8 string.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// The exact markdown payload written to disk. `content_sha256` is computed
/// over this string and nothing else.
pub fn render_markdown(summary: &str, body: &str) -> String {
    format!("# {}\n\n{}\n", summary, body.trim())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ts_roundtrip() {
        let now = utc_now_ts();
        assert!(now.ends_with('Z'));
        assert!(parse_ts(&now).is_some());
        // Numeric offsets parse too (older writers emitted +00:00).
        assert!(parse_ts("2026-08-01T12:34:56+00:00").is_some());
        assert!(parse_ts("not a time").is_none());
    }

    #[test]
    fn test_make_id_shape() {
        let id = make_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(make_id(), id);
    }

    #[test]
    fn test_render_markdown_exact_shape() {
        assert_eq!(render_markdown("alpha", "  body  \n"), "# alpha\n\nbody\n");
        assert_eq!(render_markdown("t", ""), "# t\n\n\n");
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
