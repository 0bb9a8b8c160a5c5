//! Source ingestion - turning external text, files, and URLs into memories.
//!
//! Large inputs are chunked (fixed-size or heading-based) into separate
//! memories so retrieval granularity stays useful. URLs are never fetched
//! here (network adapters live outside the core); only the sanitized address
//! is remembered.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{MemoryError, Result};
use crate::memory::{Kind, Layer, Scope, Signals, Source};

use super::index::{MemoryStore, WriteInput};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Text,
    File,
    Url,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Text => "text",
            SourceType::File => "file",
            SourceType::Url => "url",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkMode {
    /// Single memory regardless of size
    #[default]
    None,
    /// Split every `chunk_chars` characters
    Fixed,
    /// Split on top-level markdown headings
    Heading,
}

#[derive(Debug, Clone)]
pub struct IngestInput {
    pub source: String,
    pub source_type: SourceType,
    pub text_body: Option<String>,
    pub chunk_mode: ChunkMode,
    pub chunk_chars: usize,
    pub max_chunks: usize,
    pub project_id: String,
    pub session_id: String,
    pub tool: String,
}

impl Default for IngestInput {
    fn default() -> Self {
        Self {
            source: String::new(),
            source_type: SourceType::Text,
            text_body: None,
            chunk_mode: ChunkMode::None,
            chunk_chars: 900,
            max_chunks: 8,
            project_id: String::new(),
            session_id: String::new(),
            tool: "ingest".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub ok: bool,
    pub source_type: SourceType,
    pub memory_id: String,
    pub memory_ids: Vec<String>,
    pub chunks_written: usize,
    pub tags: Vec<String>,
    pub meta: Value,
}

// ============================================================================
// STORE EXTENSION
// ============================================================================

impl MemoryStore {
    /// Ingest one source into one or more `note` memories.
    pub fn ingest_source(&self, input: IngestInput) -> Result<IngestReport> {
        let tags = vec![
            format!("ingest:{}", input.source_type.as_str()),
            format!("project:{}", input.project_id),
        ];
        let (title, text, meta) = match input.source_type {
            SourceType::Text => {
                let text = input.text_body.clone().unwrap_or_default();
                if text.trim().is_empty() {
                    return Err(MemoryError::InvalidArgument(
                        "text ingest needs a non-empty body".to_string(),
                    ));
                }
                ("Ingested text".to_string(), text, json!({}))
            }
            SourceType::File => {
                let raw = std::fs::read_to_string(&input.source).map_err(|_| {
                    MemoryError::NotFound(format!("ingest file {}", input.source))
                })?;
                let name = std::path::Path::new(&input.source)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("file")
                    .to_string();
                (
                    format!("Ingested file: {name}"),
                    raw,
                    json!({"path": input.source}),
                )
            }
            SourceType::Url => {
                let sanitized = sanitize_url(&input.source);
                (
                    format!("Ingested URL: {sanitized}"),
                    format!("Remembered external source.\n\n- url: {sanitized}\n"),
                    json!({"sanitized_url": sanitized}),
                )
            }
        };

        let chunks = split_chunks(&text, input.chunk_mode, input.chunk_chars, input.max_chunks);
        let mut memory_ids = Vec::with_capacity(chunks.len());
        let total = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let summary = if total > 1 {
                format!("{title} [{}/{total}]", i + 1)
            } else {
                title.clone()
            };
            let outcome = self.write_memory(WriteInput {
                layer: Layer::Short,
                kind: Kind::Note,
                summary,
                body: chunk,
                tags: tags.clone(),
                source: Source {
                    tool: input.tool.clone(),
                    session_id: input.session_id.clone(),
                    ..Source::default()
                },
                scope: Scope {
                    project_id: input.project_id.clone(),
                    workspace: String::new(),
                },
                signals: Signals {
                    importance_score: 0.45,
                    confidence_score: 0.7,
                    stability_score: 0.5,
                    reuse_count: 0,
                    volatility_score: 0.4,
                },
                ..WriteInput::default()
            })?;
            memory_ids.push(outcome.envelope.id);
        }

        Ok(IngestReport {
            ok: true,
            source_type: input.source_type,
            memory_id: memory_ids.first().cloned().unwrap_or_default(),
            chunks_written: memory_ids.len(),
            memory_ids,
            tags,
            meta,
        })
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Blank out query-string values so tokens in URLs never reach storage.
pub(crate) fn sanitize_url(raw: &str) -> String {
    static QUERY_VALUE: OnceLock<Regex> = OnceLock::new();
    let re = QUERY_VALUE.get_or_init(|| Regex::new(r"([?&][^=&#]+)=[^&#]*").expect("static"));
    re.replace_all(raw, "$1=***").to_string()
}

fn split_chunks(text: &str, mode: ChunkMode, chunk_chars: usize, max_chunks: usize) -> Vec<String> {
    let max_chunks = max_chunks.max(1);
    let chunks: Vec<String> = match mode {
        ChunkMode::None => vec![text.to_string()],
        ChunkMode::Fixed => {
            let size = chunk_chars.max(120);
            let chars: Vec<char> = text.chars().collect();
            chars
                .chunks(size)
                .map(|c| c.iter().collect::<String>())
                .collect()
        }
        ChunkMode::Heading => {
            let mut out: Vec<String> = Vec::new();
            let mut current = String::new();
            for line in text.lines() {
                if line.starts_with("# ") && !current.trim().is_empty() {
                    out.push(std::mem::take(&mut current));
                }
                current.push_str(line);
                current.push('\n');
            }
            if !current.trim().is_empty() {
                out.push(current);
            }
            if out.is_empty() {
                out.push(text.to_string());
            }
            out
        }
    };
    chunks
        .into_iter()
        .filter(|c| !c.trim().is_empty())
        .take(max_chunks)
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
