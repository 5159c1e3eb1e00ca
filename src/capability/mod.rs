//! Query Classification and Backend Capabilities
//!
//! This module implements lightweight statement classification and the static
//! per-backend capability table.
//!
//! # Classification Strategy
//! - Leading-keyword match only, never a parse tree
//! - Fixed priority order: READ, INSERT, UPDATE, DELETE, DDL, SYSTEM, OTHER
//! - Read-only connections accept READ and SYSTEM statements only
//!
//! Leading comments or unusual statement forms can be misclassified. Callers
//! get best-effort semantics: a misclassified read is rejected, never the other
//! way round, because unknown statements fall into OTHER.

use serde::{Deserialize, Serialize};

use crate::driver::DatabaseType;
use crate::error::{OmniDbError, Result};

/// Statement category assigned by [`classify_query`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryCategory {
    /// SELECT / WITH
    Read,
    /// INSERT
    Insert,
    /// UPDATE
    Update,
    /// DELETE
    Delete,
    /// CREATE, DROP, ALTER, TRUNCATE, RENAME, COMMENT
    Ddl,
    /// SHOW, DESCRIBE, DESC, EXPLAIN
    System,
    /// Anything else (transaction control, CALL, SET, ...)
    Other,
}

impl QueryCategory {
    /// Data manipulation: INSERT, UPDATE or DELETE
    #[must_use]
    pub const fn is_dml(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }

    /// Schema definition statement
    #[must_use]
    pub const fn is_ddl(self) -> bool {
        matches!(self, Self::Ddl)
    }

    /// Categories a read-only connection lets through
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::Read | Self::System)
    }

    /// Whether the statement is expected to produce a result set
    #[must_use]
    pub const fn returns_rows(self) -> bool {
        matches!(self, Self::Read | Self::System)
    }

    /// Upper-case name used in messages
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Ddl => "DDL",
            Self::System => "SYSTEM",
            Self::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const DDL_KEYWORDS: [&str; 6] = ["CREATE", "DROP", "ALTER", "TRUNCATE", "RENAME", "COMMENT"];
const SYSTEM_KEYWORDS: [&str; 4] = ["SHOW", "DESCRIBE", "DESC", "EXPLAIN"];

/// Classify a raw statement by its leading keyword
#[must_use]
pub fn classify_query(sql: &str) -> QueryCategory {
    let normalized = sql.trim().to_uppercase();
    let keyword = leading_keyword(&normalized);

    match keyword {
        "SELECT" | "WITH" => QueryCategory::Read,
        "INSERT" => QueryCategory::Insert,
        "UPDATE" => QueryCategory::Update,
        "DELETE" => QueryCategory::Delete,
        k if DDL_KEYWORDS.contains(&k) => QueryCategory::Ddl,
        k if SYSTEM_KEYWORDS.contains(&k) => QueryCategory::System,
        _ => QueryCategory::Other,
    }
}

/// First run of alphabetic characters, so `SELECT*` and `(SELECT` still match
fn leading_keyword(normalized: &str) -> &str {
    let start = normalized.find(|c: char| c.is_ascii_alphabetic()).unwrap_or(normalized.len());
    // Only skip opening parentheses; any other leading symbol leaves the statement unclassified
    if !normalized[..start].chars().all(|c| c == '(' || c.is_whitespace()) {
        return "";
    }
    let rest = &normalized[start..];
    let end = rest.find(|c: char| !(c.is_ascii_alphabetic() || c == '_')).unwrap_or(rest.len());
    &rest[..end]
}

/// Validate that a statement may run on a read-only connection
///
/// # Returns
/// * `Ok(category)` for READ and SYSTEM statements
/// * `Err(ReadOnlyViolation)` for everything else
/// * `Err(InvalidInput)` for empty statements
pub fn validate_read_only(sql: &str) -> Result<QueryCategory> {
    if sql.trim().is_empty() {
        return Err(OmniDbError::invalid_input("Query cannot be empty"));
    }

    let category = classify_query(sql);
    ensure_read_only(category)?;
    Ok(category)
}

/// Reject a category that is not allowed on read-only connections
pub fn ensure_read_only(category: QueryCategory) -> Result<()> {
    if category.is_read_only() {
        Ok(())
    } else {
        Err(OmniDbError::read_only_violation(format!(
            "{category} statements are not allowed on a read-only connection"
        )))
    }
}

/// Static capability declaration of a backend
///
/// Values depend only on the backend type and never change at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendCapabilities {
    /// BEGIN/COMMIT/ROLLBACK around bulk operations
    pub supports_transactions: bool,

    /// Several operations per request
    pub supports_batch_operations: bool,

    /// `RETURNING` clause on DML
    pub supports_returning: bool,

    /// Native insert-or-update
    pub supports_upsert: bool,

    /// Schemas distinct from databases
    pub supports_schemas: bool,

    /// Row edits need a primary key to address the row
    pub requires_primary_key: bool,

    /// Schema used when the caller gives none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_schema: Option<String>,
}

impl BackendCapabilities {
    /// Capability table for a backend type
    #[must_use]
    pub fn for_type(database_type: DatabaseType) -> Self {
        match database_type {
            DatabaseType::Postgres => Self {
                supports_transactions: true,
                supports_batch_operations: true,
                supports_returning: true,
                supports_upsert: true,
                supports_schemas: true,
                requires_primary_key: true,
                default_schema: Some("public".to_string()),
            },
            DatabaseType::MySql => Self {
                supports_transactions: true,
                supports_batch_operations: true,
                supports_returning: false,
                supports_upsert: true,
                supports_schemas: false,
                requires_primary_key: true,
                default_schema: None,
            },
            DatabaseType::ClickHouse => Self {
                supports_transactions: false,
                supports_batch_operations: true,
                supports_returning: false,
                supports_upsert: false,
                supports_schemas: false,
                requires_primary_key: false,
                default_schema: Some("default".to_string()),
            },
            DatabaseType::MongoDb => Self {
                supports_transactions: false,
                supports_batch_operations: true,
                supports_returning: false,
                supports_upsert: true,
                supports_schemas: false,
                requires_primary_key: false,
                default_schema: None,
            },
            DatabaseType::SQLite => Self {
                supports_transactions: true,
                supports_batch_operations: true,
                supports_returning: true,
                supports_upsert: true,
                supports_schemas: false,
                requires_primary_key: true,
                default_schema: Some("main".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_reads() {
        assert_eq!(classify_query("SELECT * FROM users"), QueryCategory::Read);
        assert_eq!(classify_query("  select 1"), QueryCategory::Read);
        assert_eq!(
            classify_query("WITH cte AS (SELECT 1) SELECT * FROM cte"),
            QueryCategory::Read
        );
        assert_eq!(classify_query("(SELECT 1) UNION (SELECT 2)"), QueryCategory::Read);
    }

    #[test]
    fn test_classify_dml() {
        assert_eq!(classify_query("INSERT INTO t VALUES (1)"), QueryCategory::Insert);
        assert_eq!(classify_query("update t set a = 1"), QueryCategory::Update);
        assert_eq!(classify_query("DELETE FROM t"), QueryCategory::Delete);
    }

    #[test]
    fn test_classify_ddl() {
        for sql in [
            "CREATE TABLE t (id INT)",
            "drop table t",
            "ALTER TABLE t ADD COLUMN x INT",
            "TRUNCATE t",
            "RENAME TABLE a TO b",
            "COMMENT ON TABLE t IS 'x'",
        ] {
            assert_eq!(classify_query(sql), QueryCategory::Ddl, "{sql}");
        }
    }

    #[test]
    fn test_classify_system() {
        assert_eq!(classify_query("SHOW TABLES"), QueryCategory::System);
        assert_eq!(classify_query("DESCRIBE users"), QueryCategory::System);
        assert_eq!(classify_query("DESC users"), QueryCategory::System);
        assert_eq!(classify_query("EXPLAIN SELECT 1"), QueryCategory::System);
    }

    #[test]
    fn test_classify_other() {
        assert_eq!(classify_query("BEGIN"), QueryCategory::Other);
        assert_eq!(classify_query("VACUUM"), QueryCategory::Other);
        assert_eq!(classify_query(""), QueryCategory::Other);
        // Keyword prefixes do not count as the keyword itself
        assert_eq!(classify_query("SELECTION"), QueryCategory::Other);
        assert_eq!(classify_query("DESCRIPTOR"), QueryCategory::Other);
    }

    #[test]
    fn test_leading_comment_is_best_effort() {
        assert_eq!(classify_query("-- note\nSELECT 1"), QueryCategory::Other);
        assert_eq!(classify_query("/* hint */ DELETE FROM t"), QueryCategory::Other);
    }

    #[test]
    fn test_dml_and_ddl_flags_are_exclusive() {
        for category in [
            QueryCategory::Read,
            QueryCategory::Insert,
            QueryCategory::Update,
            QueryCategory::Delete,
            QueryCategory::Ddl,
            QueryCategory::System,
            QueryCategory::Other,
        ] {
            assert!(!(category.is_dml() && category.is_ddl()), "{category}");
        }
    }

    #[test]
    fn test_validate_read_only() {
        assert_eq!(validate_read_only("SELECT 1").unwrap(), QueryCategory::Read);
        assert_eq!(validate_read_only("EXPLAIN SELECT 1").unwrap(), QueryCategory::System);

        for sql in ["INSERT INTO t VALUES (1)", "UPDATE t SET a = 1", "DELETE FROM t", "DROP TABLE t", "BEGIN"] {
            let err = validate_read_only(sql).unwrap_err();
            assert_eq!(err.error_code(), "READ_ONLY_VIOLATION", "{sql}");
        }
    }

    #[test]
    fn test_validate_read_only_empty() {
        let err = validate_read_only("   ").unwrap_err();
        assert!(matches!(err, OmniDbError::InvalidInput(_)));
    }

    #[test]
    fn test_category_serialization() {
        assert_eq!(serde_json::to_string(&QueryCategory::Ddl).unwrap(), r#""DDL""#);
        assert_eq!(serde_json::to_string(&QueryCategory::Read).unwrap(), r#""READ""#);
    }

    #[test]
    fn test_capability_table() {
        assert!(BackendCapabilities::for_type(DatabaseType::Postgres).supports_transactions);
        assert!(BackendCapabilities::for_type(DatabaseType::MySql).supports_transactions);
        assert!(BackendCapabilities::for_type(DatabaseType::SQLite).supports_transactions);
        assert!(!BackendCapabilities::for_type(DatabaseType::ClickHouse).supports_transactions);
        assert!(!BackendCapabilities::for_type(DatabaseType::MongoDb).supports_transactions);
        assert_eq!(
            BackendCapabilities::for_type(DatabaseType::Postgres).default_schema.as_deref(),
            Some("public")
        );
    }
}
