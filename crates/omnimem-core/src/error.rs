//! Error taxonomy shared by every subsystem.
//!
//! Failures carry one of a closed set of kinds so callers (and structured
//! results) can react without string matching.

use serde::{Deserialize, Serialize};

// ============================================================================
// ERROR KINDS
// ============================================================================

/// Coarse classification of a failure, stable across the crate's API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown enum value, malformed reference, out-of-range argument
    InvalidArgument,
    /// Missing memory id or missing body file during verify
    NotFound,
    /// Hash mismatch between body file and stored hash
    IntegrityMismatch,
    /// Unparseable event-log line
    LogCorruption,
    /// Rate-limited / overloaded / network / 5xx from an external process
    TransientExternal,
    /// Auth failure, conflict, non-retryable external failure
    PermanentExternal,
    /// Secret pattern detected or writable-dir check failed
    PolicyDenied,
    /// Everything else (database, io, serialization)
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::IntegrityMismatch => "integrity_mismatch",
            ErrorKind::LogCorruption => "log_corruption",
            ErrorKind::TransientExternal => "transient_external",
            ErrorKind::PermanentExternal => "permanent_external",
            ErrorKind::PolicyDenied => "policy_denied",
            ErrorKind::Internal => "internal",
        }
    }
}

// ============================================================================
// ERROR TYPE
// ============================================================================

/// Crate-wide error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Unknown enum value, malformed reference, bad option
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Missing memory or body file
    #[error("not found: {0}")]
    NotFound(String),
    /// Body bytes no longer match the stored content hash
    #[error("integrity mismatch for {id}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        id: String,
        expected: String,
        actual: String,
    },
    /// Unparseable event-log line
    #[error("event log corruption: {0}")]
    LogCorruption(String),
    /// Retryable external failure
    #[error("transient external failure: {0}")]
    TransientExternal(String),
    /// Non-retryable external failure
    #[error("permanent external failure: {0}")]
    PermanentExternal(String),
    /// Secret pattern detected or storage policy violated
    #[error("policy denied: {0}")]
    PolicyDenied(String),
    /// Storage-internal failure (poisoned lock, schema bootstrap)
    #[error("storage error: {0}")]
    Storage(String),
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization error
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MemoryError {
    /// The taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MemoryError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            MemoryError::NotFound(_) => ErrorKind::NotFound,
            MemoryError::IntegrityMismatch { .. } => ErrorKind::IntegrityMismatch,
            MemoryError::LogCorruption(_) => ErrorKind::LogCorruption,
            MemoryError::TransientExternal(_) => ErrorKind::TransientExternal,
            MemoryError::PermanentExternal(_) => ErrorKind::PermanentExternal,
            MemoryError::PolicyDenied(_) => ErrorKind::PolicyDenied,
            MemoryError::Storage(_)
            | MemoryError::Database(_)
            | MemoryError::Io(_)
            | MemoryError::Serde(_) => ErrorKind::Internal,
        }
    }
}

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, MemoryError>;

// ============================================================================
// TESTS
// ============================================================================
