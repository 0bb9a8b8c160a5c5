//! Layer-partitioned markdown tree for human-readable bodies.
//!
//! Tree shape: `<root>/<layer>/<YYYY>/<MM>/<id>.md`. Files are created once;
//! the only sanctioned in-place rewrite is the feedback-annotation path, which
//! re-hashes atomically with the row update.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};

use crate::error::Result;
use crate::memory::Layer;

/// Relative path for a memory body inside the markdown tree.
pub fn md_rel_path(layer: Layer, mem_id: &str, when: DateTime<Utc>) -> String {
    format!(
        "{}/{:04}/{:02}/{}.md",
        layer.as_str(),
        when.year(),
        when.month(),
        mem_id
    )
}

/// Write a body file, creating parent directories.
pub fn write_markdown(markdown_root: &Path, rel_path: &str, content: &str) -> Result<PathBuf> {
    let full = markdown_root.join(rel_path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&full, content)?;
    Ok(full)
}

/// Read a body file by its stored relative path. `None` when missing.
pub fn read_markdown(markdown_root: &Path, rel_path: &str) -> Result<Option<String>> {
    let full = markdown_root.join(rel_path);
    if !full.exists() {
        return Ok(None);
    }
    Ok(Some(std::fs::read_to_string(full)?))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rel_path_shape() {
        let when = Utc.with_ymd_and_hms(2026, 8, 1, 9, 30, 0).unwrap();
        assert_eq!(
            md_rel_path(Layer::Short, "abc123", when),
            "short/2026/08/abc123.md"
        );
    }

    #[test]
    fn test_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let rel = "long/2026/08/m1.md";
        write_markdown(dir.path(), rel, "# t\n\nbody\n").unwrap();
        assert_eq!(
            read_markdown(dir.path(), rel).unwrap().as_deref(),
            Some("# t\n\nbody\n")
        );
        assert_eq!(read_markdown(dir.path(), "long/2026/08/nope.md").unwrap(), None);
    }
}
