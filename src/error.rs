//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout omnidb.
//! Native driver errors never leave a driver: they are mapped onto one of the
//! variants below with their original message preserved.
//!
//! # Error Categories
//! - `ConnectionFailed` / `Timeout`: unreachable host, auth failure, probe failure
//! - `ConnectionNotFound`: unknown or inactive connection id
//! - `ReadOnlyViolation` / `InvalidInput`: rejected before any native call
//! - `QueryFailed` / `EngineError`: native errors during execution
//! - `Unsupported` / `UnsupportedBackend`: operation or backend not offered
//! - `Cancelled`: cooperative cancellation of an in-flight operation
//! - `ConfigError`: configuration or profile file errors

use thiserror::Error;

/// Main error type for omnidb operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OmniDbError {
    /// Database connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// No live connection with this id (or it is not the active one)
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// Statement rejected on a read-only connection
    #[error("Read-only violation: {0}")]
    ReadOnlyViolation(String),

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Query execution failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Engine-specific database error
    #[error("Engine error ({engine}): {detail}")]
    EngineError { engine: String, detail: String },

    /// Operation not supported by this backend
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Backend type string does not name a compiled-in backend
    #[error("Unsupported database type: {0}")]
    UnsupportedBackend(String),

    /// Operation cancelled through `cancel_query`
    #[error("Query cancelled: {0}")]
    Cancelled(String),

    /// Operation exceeded the configured timeout
    #[error("Timed out after {0}ms")]
    Timeout(u64),

    /// Configuration error (file not found, invalid JSON, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl OmniDbError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::ConnectionNotFound(_) => "CONNECTION_NOT_FOUND",
            Self::ReadOnlyViolation(_) => "READ_ONLY_VIOLATION",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::EngineError { .. } => "ENGINE_ERROR",
            Self::Unsupported(_) => "UNSUPPORTED",
            Self::UnsupportedBackend(_) => "UNSUPPORTED_BACKEND",
            Self::Cancelled(_) => "QUERY_CANCELLED",
            Self::Timeout(_) => "TIMEOUT",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// Stable human-readable summary for this error category
    ///
    /// Used as `message` in failure results; the detailed text goes in `error`.
    #[must_use]
    pub const fn summary(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) => "Failed to connect to database",
            Self::ConnectionNotFound(_) => "Connection not found",
            Self::ReadOnlyViolation(_) => "Operation not allowed on a read-only connection",
            Self::InvalidInput(_) => "Invalid request",
            Self::QueryFailed(_) => "Query failed",
            Self::EngineError { .. } => "Database error",
            Self::Unsupported(_) => "Operation not supported",
            Self::UnsupportedBackend(_) => "Unsupported database type",
            Self::Cancelled(_) => "Query cancelled",
            Self::Timeout(_) => "Operation timed out",
            Self::ConfigError(_) => "Invalid configuration",
        }
    }

    /// Get human-readable error message
    ///
    /// It does not contain credentials: drivers never format passwords into errors.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a connection not found error
    pub fn connection_not_found(connection_id: impl Into<String>) -> Self {
        Self::ConnectionNotFound(connection_id.into())
    }

    /// Create a read-only violation error
    pub fn read_only_violation(message: impl Into<String>) -> Self {
        Self::ReadOnlyViolation(message.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a query failed error
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    /// Create an engine-specific error
    pub fn engine_error(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::EngineError { engine: engine.into(), detail: detail.into() }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled(message.into())
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}

/// Result type alias for omnidb operations
pub type Result<T> = std::result::Result<T, OmniDbError>;
