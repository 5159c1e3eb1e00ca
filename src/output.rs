//! JSON Output Envelope Types
//!
//! The CLI prints exactly one envelope per invocation on stdout.
//!
//! # Output Contract
//! - Success: `{"ok": true, "backend": "...", "command": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "backend": "...", "command": "...", "error": {"code": "...", "message": "...", "detail": "..."}}`
//!
//! `message` is the stable summary for the error code; `detail` carries the
//! backend's own message when there is one.

use serde::{Deserialize, Serialize};

use crate::error::OmniDbError;

/// Success envelope for operation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Backend used for this operation (postgres, mysql, clickhouse, mongodb, sqlite)
    pub backend: String,

    /// Command that was executed (test, tables, query, ...)
    pub command: String,

    pub data: T,

    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    pub fn new(backend: impl Into<String>, command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, backend: backend.into(), command: command.into(), data, meta }
    }
}

/// Error envelope for operation failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    /// Backend, empty when the failure happened before one was chosen
    pub backend: String,

    pub command: String,

    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(backend: impl Into<String>, command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, backend: backend.into(), command: command.into(), error }
    }

    /// Create error envelope from an [`OmniDbError`]
    pub fn from_error(backend: impl Into<String>, command: impl Into<String>, err: &OmniDbError) -> Self {
        Self::new(backend, command, ErrorInfo::from(err))
    }
}

/// Error information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "READ_ONLY_VIOLATION", "CONNECTION_FAILED")
    pub code: String,

    /// Stable human-readable summary
    pub message: String,

    /// Backend message, when available (never contains passwords)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into(), detail: None }
    }
}

impl From<&OmniDbError> for ErrorInfo {
    fn from(err: &OmniDbError) -> Self {
        Self { code: err.error_code().to_string(), message: err.summary().to_string(), detail: Some(err.message()) }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub execution_ms: u64,

    /// Number of rows returned (for query results, None for other operations)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<usize>,
}

impl Metadata {
    #[must_use]
    pub const fn new(execution_ms: u64) -> Self {
        Self { execution_ms, rows_returned: None }
    }

    #[must_use]
    pub const fn with_rows(execution_ms: u64, rows_returned: usize) -> Self {
        Self { execution_ms, rows_returned: Some(rows_returned) }
    }
}
