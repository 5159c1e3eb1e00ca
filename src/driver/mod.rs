//! Driver Contract and Core Types
//!
//! This module defines the [`Driver`] trait every backend implements, the
//! [`DatabaseType`] enum and the [`Transaction`] handle used by bulk writes.
//!
//! # Shared Instances
//! One driver instance per backend type serves every connection of that type.
//! All methods take `&self`; per-connection state lives in the driver's
//! [`ConnectionRegistry`](crate::registry::ConnectionRegistry).
//!
//! # Error Mapping
//! Native client errors never cross this trait: drivers map them onto
//! [`OmniDbError`] with the native message preserved.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::capability::BackendCapabilities;
use crate::config::ConnectionConfig;
use crate::error::{OmniDbError, Result};
use crate::model::{
    BulkOperation, BulkOperationResult, ColumnInfo, ConnectionInfo, QueryResult, TableQueryOptions, TableSchema,
    ValueMap,
};

pub mod bulk;
pub mod sql;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "clickhouse")]
pub mod clickhouse;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "mongodb")]
pub mod mongodb;

/// Supported backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// `PostgreSQL` database
    Postgres,
    /// `MySQL` database (includes `MariaDB`)
    MySql,
    /// `ClickHouse` over its HTTP interface
    ClickHouse,
    /// `MongoDB` database
    MongoDb,
    /// `SQLite` database file
    SQLite,
}

impl DatabaseType {
    /// Every backend type, in declaration order
    pub const ALL: [Self; 5] = [Self::Postgres, Self::MySql, Self::ClickHouse, Self::MongoDb, Self::SQLite];

    /// Get the backend name as a string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::ClickHouse => "clickhouse",
            Self::MongoDb => "mongodb",
            Self::SQLite => "sqlite",
        }
    }

    /// Product name used in messages
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::MySql => "MySQL",
            Self::ClickHouse => "ClickHouse",
            Self::MongoDb => "MongoDB",
            Self::SQLite => "SQLite",
        }
    }

    /// Standard port; `None` for file databases
    #[must_use]
    pub const fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::MySql => Some(3306),
            Self::ClickHouse => Some(8123),
            Self::MongoDb => Some(27017),
            Self::SQLite => None,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DatabaseType {
    type Err = OmniDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "clickhouse" => Ok(Self::ClickHouse),
            "mongodb" | "mongo" => Ok(Self::MongoDb),
            "sqlite" | "sqlite3" => Ok(Self::SQLite),
            _ => Err(OmniDbError::UnsupportedBackend(s.to_string())),
        }
    }
}

/// Open transaction on one connection
///
/// Dropping a transaction without `commit` or `rollback` rolls it back on a
/// best-effort basis.
#[async_trait]
pub trait Transaction: Send {
    /// Execute one statement inside the transaction, returning affected rows
    async fn execute(&mut self, statement: &str) -> Result<u64>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Uniform backend driver
///
/// Every method is async and addresses a connection by its id. Methods with a
/// default body are optional capabilities; the defaults report `Unsupported`
/// or derive the answer from other methods.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Backend served by this driver
    fn database_type(&self) -> DatabaseType;

    /// Static capability flags
    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::for_type(self.database_type())
    }

    fn supports_transactions(&self) -> bool {
        self.capabilities().supports_transactions
    }

    /// Open, probe and register a connection
    ///
    /// Idempotent: an id that is already registered returns its info untouched.
    async fn connect(&self, config: &ConnectionConfig, connection_id: &str) -> Result<ConnectionInfo>;

    /// Close and unregister a connection; unknown ids are `ConnectionNotFound`
    async fn disconnect(&self, connection_id: &str) -> Result<()>;

    /// Execute backend-native query text
    ///
    /// On read-only connections the statement must classify as READ or SYSTEM
    /// before the backend is touched.
    async fn query(&self, connection_id: &str, query: &str, session_id: Option<&str>) -> Result<QueryResult>;

    /// Filtered, sorted, paginated table read
    async fn query_table(
        &self,
        connection_id: &str,
        options: &TableQueryOptions,
        session_id: Option<&str>,
    ) -> Result<QueryResult>;

    async fn insert_row(
        &self,
        connection_id: &str,
        table: &str,
        data: &ValueMap,
        database: Option<&str>,
    ) -> Result<QueryResult>;

    async fn update_row(
        &self,
        connection_id: &str,
        table: &str,
        primary_key: &ValueMap,
        data: &ValueMap,
        database: Option<&str>,
    ) -> Result<QueryResult>;

    async fn delete_row(
        &self,
        connection_id: &str,
        table: &str,
        primary_key: &ValueMap,
        database: Option<&str>,
    ) -> Result<QueryResult>;

    async fn get_databases(&self, connection_id: &str) -> Result<Vec<String>>;

    async fn get_tables(&self, connection_id: &str, database: Option<&str>) -> Result<Vec<String>>;

    /// Ordered column list of a table
    async fn get_table_schema(
        &self,
        connection_id: &str,
        table: &str,
        database: Option<&str>,
    ) -> Result<Vec<ColumnInfo>> {
        Ok(self.get_table_full_schema(connection_id, table, database).await?.columns)
    }

    async fn get_table_full_schema(
        &self,
        connection_id: &str,
        table: &str,
        database: Option<&str>,
    ) -> Result<TableSchema>;

    async fn get_primary_keys(
        &self,
        connection_id: &str,
        table: &str,
        database: Option<&str>,
    ) -> Result<Vec<String>> {
        Ok(self.get_table_full_schema(connection_id, table, database).await?.primary_keys)
    }

    /// Open a transaction on a connection
    async fn begin_transaction(&self, connection_id: &str) -> Result<Box<dyn Transaction>> {
        let _ = connection_id;
        Err(OmniDbError::unsupported(format!(
            "Transactions are not supported by {}",
            self.database_type().display_name()
        )))
    }

    /// Native statement for one bulk step, executed inside a transaction
    fn operation_statement(&self, operation: &BulkOperation) -> Result<String> {
        let _ = operation;
        Err(OmniDbError::unsupported(format!(
            "{} has no statement form for row operations",
            self.database_type().display_name()
        )))
    }

    /// Apply one bulk step outside a transaction
    async fn apply_operation(&self, connection_id: &str, operation: &BulkOperation) -> Result<QueryResult> {
        match operation {
            BulkOperation::Insert { table, database, data } => {
                self.insert_row(connection_id, table, data, database.as_deref()).await
            }
            BulkOperation::Update { table, database, primary_key, data } => {
                self.update_row(connection_id, table, primary_key, data, database.as_deref()).await
            }
            BulkOperation::Delete { table, database, primary_key } => {
                self.delete_row(connection_id, table, primary_key, database.as_deref()).await
            }
        }
    }

    /// Apply operations in order, atomically where the backend allows it
    async fn execute_bulk_operations(
        &self,
        connection_id: &str,
        operations: &[BulkOperation],
    ) -> Result<BulkOperationResult> {
        let read_only = self.is_read_only(connection_id)?;
        let sink = bulk::DriverSink::new(self, connection_id);
        Ok(bulk::execute_bulk(&sink, operations, read_only).await)
    }

    /// Cancel an in-flight query
    async fn cancel_query(&self, connection_id: &str, query_id: &str) -> Result<()> {
        let _ = (connection_id, query_id);
        Err(OmniDbError::unsupported(format!(
            "Query cancellation is not supported by {}",
            self.database_type().display_name()
        )))
    }

    /// Registered connection ids, sorted
    fn connection_ids(&self) -> Vec<String>;

    fn connection_info(&self, connection_id: &str) -> Result<ConnectionInfo>;

    fn is_read_only(&self, connection_id: &str) -> Result<bool>;

    /// Disconnect every registered connection
    async fn cleanup(&self) {
        for id in self.connection_ids() {
            if let Err(err) = self.disconnect(&id).await {
                warn!(connection_id = %id, error = %err, "disconnect during cleanup failed");
            }
        }
    }
}

/// Run a future under an optional timeout
pub(crate) async fn with_timeout<T, F>(timeout: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| OmniDbError::Timeout(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)))?,
        None => fut.await,
    }
}

/// Milliseconds elapsed since `start`
pub(crate) fn elapsed_ms(start: std::time::Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
