//! Capability and Result Model
//!
//! Shared value types returned by every driver: query results, connection
//! bookkeeping, schema descriptions, filters and bulk operations.
//!
//! # Invariants
//! - A failed [`QueryResult`] never carries data
//! - `is_ddl` / `is_dml` are derived from `query_type` only and never both true
//!
//! Both are enforced by the constructors; drivers never build results by hand.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::capability::QueryCategory;
use crate::driver::DatabaseType;
use crate::error::OmniDbError;

/// One result row, column order preserved
pub type Row = IndexMap<String, serde_json::Value>;

/// Column name to value map used by row edits and primary key addressing
pub type ValueMap = IndexMap<String, serde_json::Value>;

/// Uniform result of a query or row operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub success: bool,

    /// Result rows; `None` for failures and statements without a result set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Row>>,

    /// Column names in result order
    #[serde(default)]
    pub fields: Vec<String>,

    pub message: String,

    /// Native error text for failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_type: Option<QueryCategory>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_rows: Option<u64>,

    #[serde(default)]
    pub is_ddl: bool,

    #[serde(default)]
    pub is_dml: bool,

    /// Total rows matching the predicate (paginated table reads only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<u64>,

    /// More rows exist past this page (paginated table reads only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,

    #[serde(default)]
    pub execution_ms: u64,
}

impl QueryResult {
    /// Successful result carrying a row set
    #[must_use]
    pub fn rows(fields: Vec<String>, rows: Vec<Row>) -> Self {
        let message = format!("{} row(s) returned", rows.len());
        Self {
            success: true,
            data: Some(rows),
            fields,
            message,
            error: None,
            query_type: None,
            affected_rows: None,
            is_ddl: false,
            is_dml: false,
            total_rows: None,
            has_more: None,
            execution_ms: 0,
        }
    }

    /// Successful result of a statement without a row set
    #[must_use]
    pub fn affected(affected_rows: u64) -> Self {
        Self {
            success: true,
            data: None,
            fields: Vec::new(),
            message: format!("{affected_rows} row(s) affected"),
            error: None,
            query_type: None,
            affected_rows: Some(affected_rows),
            is_ddl: false,
            is_dml: false,
            total_rows: None,
            has_more: None,
            execution_ms: 0,
        }
    }

    /// Failed result: stable summary in `message`, native text in `error`
    #[must_use]
    pub fn failure(err: &OmniDbError) -> Self {
        Self {
            success: false,
            data: None,
            fields: Vec::new(),
            message: err.summary().to_string(),
            error: Some(err.message()),
            query_type: None,
            affected_rows: None,
            is_ddl: false,
            is_dml: false,
            total_rows: None,
            has_more: None,
            execution_ms: 0,
        }
    }

    /// Tag the result with its statement category and derived flags
    #[must_use]
    pub fn with_category(mut self, category: QueryCategory) -> Self {
        self.query_type = Some(category);
        self.is_ddl = category.is_ddl();
        self.is_dml = category.is_dml();
        self
    }

    /// Attach pagination totals; `has_more = offset + returned < total`
    #[must_use]
    pub fn with_total(mut self, total: u64, offset: u64) -> Self {
        let returned = self.row_count() as u64;
        self.total_rows = Some(total);
        self.has_more = Some(offset + returned < total);
        self
    }

    #[must_use]
    pub const fn with_elapsed(mut self, execution_ms: u64) -> Self {
        self.execution_ms = execution_ms;
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Number of rows carried (0 when there is no row set)
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }
}

/// Outcome of `connect` / `test_connection`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionInfo>,
}

impl ConnectionResult {
    #[must_use]
    pub fn connected(info: ConnectionInfo) -> Self {
        Self {
            success: true,
            message: format!("Connected to {} database", info.database_type),
            error: None,
            connection: Some(info),
        }
    }

    #[must_use]
    pub fn failure(err: &OmniDbError) -> Self {
        Self { success: false, message: err.summary().to_string(), error: Some(err.message()), connection: None }
    }
}

/// Outcome of operations that return nothing but success
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into(), error: None }
    }

    #[must_use]
    pub fn failure(err: &OmniDbError) -> Self {
        Self { success: false, message: err.summary().to_string(), error: Some(err.message()) }
    }
}

/// Description of a live connection
///
/// Never contains the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub id: String,
    pub database_type: DatabaseType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub read_only: bool,
    pub connected_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
}

/// Column information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    /// Column name
    pub name: String,

    /// Declared column type (backend-specific spelling)
    pub data_type: String,

    /// Whether column allows NULL values
    pub nullable: bool,

    /// Default value expression (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(default)]
    pub is_primary_key: bool,

    #[serde(default)]
    pub is_unique: bool,
}

impl ColumnInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            default: None,
            is_primary_key: false,
            is_unique: false,
        }
    }
}

/// Full description of a table or collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    pub primary_keys: Vec<String>,
    /// Column sets under a UNIQUE constraint or unique index
    #[serde(default)]
    pub unique_keys: Vec<Vec<String>>,
    /// Schema was sampled from documents rather than read from a catalog
    #[serde(default)]
    pub inferred: bool,
}

impl TableSchema {
    /// Build a catalog-backed schema, flagging key columns on `columns`
    #[must_use]
    pub fn from_catalog(
        table: impl Into<String>,
        mut columns: Vec<ColumnInfo>,
        primary_keys: Vec<String>,
        unique_keys: Vec<Vec<String>>,
    ) -> Self {
        for column in &mut columns {
            if primary_keys.contains(&column.name) {
                column.is_primary_key = true;
            }
            if unique_keys.iter().any(|key| key.len() == 1 && key[0] == column.name) {
                column.is_unique = true;
            }
        }
        Self { table: table.into(), columns, primary_keys, unique_keys, inferred: false }
    }
}

/// Filter operator, serialised with its SQL spelling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "LIKE")]
    Like,
    #[serde(rename = "NOT LIKE")]
    NotLike,
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "NOT IN")]
    NotIn,
    #[serde(rename = "IS NULL")]
    IsNull,
    #[serde(rename = "IS NOT NULL")]
    IsNotNull,
    #[serde(rename = "BETWEEN")]
    Between,
    #[serde(rename = "NOT BETWEEN")]
    NotBetween,
}

impl FilterOperator {
    /// SQL spelling
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
            Self::Between => "BETWEEN",
            Self::NotBetween => "NOT BETWEEN",
        }
    }

    /// Operators that take no value
    #[must_use]
    pub const fn is_null_check(self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

impl std::fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FilterOperator {
    type Err = OmniDbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
        Ok(match normalized.as_str() {
            "=" | "EQ" => Self::Eq,
            "!=" | "<>" | "NE" => Self::NotEq,
            ">" | "GT" => Self::Gt,
            "<" | "LT" => Self::Lt,
            ">=" | "GTE" => Self::Gte,
            "<=" | "LTE" => Self::Lte,
            "LIKE" => Self::Like,
            "NOT LIKE" => Self::NotLike,
            "IN" => Self::In,
            "NOT IN" => Self::NotIn,
            "IS NULL" => Self::IsNull,
            "IS NOT NULL" => Self::IsNotNull,
            "BETWEEN" => Self::Between,
            "NOT BETWEEN" => Self::NotBetween,
            _ => return Err(OmniDbError::invalid_input(format!("Unknown filter operator '{s}'"))),
        })
    }
}

/// Single predicate on a column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub operator: FilterOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl Filter {
    pub fn new(column: impl Into<String>, operator: FilterOperator, value: impl Into<serde_json::Value>) -> Self {
        Self { column: column.into(), operator, value: Some(value.into()) }
    }

    /// `IS NULL` / `IS NOT NULL` predicate
    pub fn null_check(column: impl Into<String>, operator: FilterOperator) -> Self {
        Self { column: column.into(), operator, value: None }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(column: impl Into<String>) -> Self {
        Self { column: column.into(), direction: SortDirection::Asc }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self { column: column.into(), direction: SortDirection::Desc }
    }
}

/// Structured table read: filters joined with AND, sort, pagination
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableQueryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub table: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub order_by: Vec<SortSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl TableQueryOptions {
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into(), ..Default::default() }
    }

    /// Whether a count query is needed to report totals
    #[must_use]
    pub const fn is_paginated(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }
}

/// One step of a bulk request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BulkOperation {
    #[serde(rename_all = "camelCase")]
    Insert {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        database: Option<String>,
        data: ValueMap,
    },
    #[serde(rename_all = "camelCase")]
    Update {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        database: Option<String>,
        primary_key: ValueMap,
        data: ValueMap,
    },
    #[serde(rename_all = "camelCase")]
    Delete {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        database: Option<String>,
        primary_key: ValueMap,
    },
}

impl BulkOperation {
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Insert { table, .. } | Self::Update { table, .. } | Self::Delete { table, .. } => table,
        }
    }

    #[must_use]
    pub fn database(&self) -> Option<&str> {
        match self {
            Self::Insert { database, .. } | Self::Update { database, .. } | Self::Delete { database, .. } => {
                database.as_deref()
            }
        }
    }

    /// Statement category of this operation
    #[must_use]
    pub const fn category(&self) -> QueryCategory {
        match self {
            Self::Insert { .. } => QueryCategory::Insert,
            Self::Update { .. } => QueryCategory::Update,
            Self::Delete { .. } => QueryCategory::Delete,
        }
    }
}

/// Outcome of a bulk request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOperationResult {
    pub success: bool,
    /// One entry per attempted operation, in input order
    pub results: Vec<QueryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub transactional: bool,
}

impl BulkOperationResult {
    /// Failure before any operation ran
    #[must_use]
    pub fn rejected(err: &OmniDbError) -> Self {
        Self { success: false, results: Vec::new(), error: Some(err.message()), warning: None, transactional: false }
    }
}
