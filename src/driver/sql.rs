//! SQL-family driver base
//!
//! [`SqlDriver`] implements [`Driver`] once for every SQL backend. The
//! backend-specific half is a [`SqlEngine`]: how to open a native handle, run
//! a statement, open a transaction and read the catalogs. Everything else
//! (registry bookkeeping, read-only gating, timeouts, pagination, statement
//! building) lives here.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::capability::{classify_query, ensure_read_only, QueryCategory};
use crate::config::ConnectionConfig;
use crate::driver::{elapsed_ms, with_timeout, DatabaseType, Driver, Transaction};
use crate::error::{OmniDbError, Result};
use crate::filter::sql::SqlDialect;
use crate::model::{BulkOperation, ConnectionInfo, QueryResult, TableQueryOptions, TableSchema, ValueMap};
use crate::registry::{ConnectionRegistry, Lease, RegistryEntry};

/// Backend-specific half of a SQL driver
#[async_trait]
pub trait SqlEngine: Send + Sync + 'static {
    /// Live native handle; clones share the same underlying connection or pool
    type Handle: Clone + Send + Sync + 'static;

    fn database_type(&self) -> DatabaseType;

    fn dialect(&self) -> SqlDialect;

    /// Open a native handle from a validated config
    async fn open(&self, config: &ConnectionConfig) -> Result<Self::Handle>;

    /// Liveness probe; returns the server version when the backend reports one
    async fn probe(&self, handle: &Self::Handle) -> Result<Option<String>>;

    /// Release the native handle
    async fn close(&self, handle: Self::Handle);

    /// Execute one statement already classified as `category`
    async fn run(&self, handle: &Self::Handle, sql: &str, category: QueryCategory) -> Result<QueryResult>;

    /// Open a transaction
    async fn begin(&self, handle: &Self::Handle) -> Result<Box<dyn Transaction>> {
        let _ = handle;
        Err(OmniDbError::unsupported(format!(
            "Transactions are not supported by {}",
            self.database_type().display_name()
        )))
    }

    async fn list_databases(&self, handle: &Self::Handle) -> Result<Vec<String>>;

    async fn list_tables(&self, handle: &Self::Handle, database: Option<&str>) -> Result<Vec<String>>;

    async fn describe_table(&self, handle: &Self::Handle, table: &str, database: Option<&str>) -> Result<TableSchema>;
}

/// [`Driver`] implementation shared by all SQL engines
pub struct SqlDriver<E: SqlEngine> {
    engine: E,
    registry: ConnectionRegistry<E::Handle>,
}

impl<E: SqlEngine> SqlDriver<E> {
    pub fn new(engine: E) -> Self {
        Self { engine, registry: ConnectionRegistry::new() }
    }

    fn lease(&self, connection_id: &str) -> Result<Lease<E::Handle>> {
        self.registry.lease(connection_id)
    }

    /// Run a row edit built by the dialect, rejecting read-only connections
    async fn execute_write(
        &self,
        connection_id: &str,
        category: QueryCategory,
        build: impl FnOnce(SqlDialect) -> Result<String> + Send,
    ) -> Result<QueryResult> {
        let lease = self.lease(connection_id)?;
        if lease.read_only {
            ensure_read_only(category)?;
        }

        let sql = build(self.engine.dialect())?;
        debug!(connection_id, %category, "executing row edit");

        let start = Instant::now();
        let result = with_timeout(lease.timeout, self.engine.run(&lease.handle, &sql, category)).await?;
        Ok(result.with_category(category).with_elapsed(elapsed_ms(start)))
    }
}

/// Read the single count value out of a `COUNT(*)` result
///
/// Some backends return 64-bit integers as JSON strings.
pub(crate) fn extract_count(result: &QueryResult) -> Result<u64> {
    let value = result
        .data
        .as_ref()
        .and_then(|rows| rows.first())
        .and_then(|row| row.values().next())
        .ok_or_else(|| OmniDbError::query_failed("Count query returned no rows"))?;

    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| OmniDbError::query_failed(format!("Unexpected count value: {value}")))
}

#[async_trait]
impl<E: SqlEngine> Driver for SqlDriver<E> {
    fn database_type(&self) -> DatabaseType {
        self.engine.database_type()
    }

    async fn connect(&self, config: &ConnectionConfig, connection_id: &str) -> Result<ConnectionInfo> {
        if self.registry.contains(connection_id) {
            return self.registry.info(connection_id);
        }
        if config.database_type != self.database_type() {
            return Err(OmniDbError::invalid_input(format!(
                "Expected {} configuration, got {}",
                self.database_type(),
                config.database_type
            )));
        }

        config.validate()?;
        let mut config = config.clone();
        config.resolve_password()?;
        let timeout = config.timeout_duration();

        debug!(connection_id, backend = %self.database_type(), "opening connection");
        let handle = with_timeout(timeout, self.engine.open(&config)).await?;

        let version = match with_timeout(timeout, self.engine.probe(&handle)).await {
            Ok(version) => version,
            Err(err) => {
                self.engine.close(handle).await;
                return Err(match err {
                    OmniDbError::ConnectionFailed(_) | OmniDbError::Timeout(_) => err,
                    other => OmniDbError::connection_failed(other.message()),
                });
            }
        };

        if let Some(previous) = self.registry.insert(connection_id, RegistryEntry::new(handle, config, version)) {
            self.engine.close(previous.handle).await;
        }
        debug!(connection_id, "connection registered");
        self.registry.info(connection_id)
    }

    async fn disconnect(&self, connection_id: &str) -> Result<()> {
        let entry = self.registry.remove(connection_id)?;
        self.engine.close(entry.handle).await;
        debug!(connection_id, "connection closed");
        Ok(())
    }

    async fn query(&self, connection_id: &str, query: &str, _session_id: Option<&str>) -> Result<QueryResult> {
        let lease = self.lease(connection_id)?;
        if query.trim().is_empty() {
            return Err(OmniDbError::invalid_input("Query cannot be empty"));
        }

        let category = classify_query(query);
        if lease.read_only {
            ensure_read_only(category)?;
        }

        debug!(connection_id, %category, "executing query");
        let start = Instant::now();
        let result = with_timeout(lease.timeout, self.engine.run(&lease.handle, query, category)).await?;
        Ok(result.with_category(category).with_elapsed(elapsed_ms(start)))
    }

    async fn query_table(
        &self,
        connection_id: &str,
        options: &TableQueryOptions,
        _session_id: Option<&str>,
    ) -> Result<QueryResult> {
        let lease = self.lease(connection_id)?;
        let dialect = self.engine.dialect();
        let sql = dialect.select_query(options)?;

        let start = Instant::now();
        let mut result =
            with_timeout(lease.timeout, self.engine.run(&lease.handle, &sql, QueryCategory::Read)).await?;

        if options.is_paginated() {
            let count_sql = dialect.count_query(options)?;
            let count =
                with_timeout(lease.timeout, self.engine.run(&lease.handle, &count_sql, QueryCategory::Read)).await?;
            result = result.with_total(extract_count(&count)?, options.offset.unwrap_or(0));
        }

        Ok(result.with_category(QueryCategory::Read).with_elapsed(elapsed_ms(start)))
    }

    async fn insert_row(
        &self,
        connection_id: &str,
        table: &str,
        data: &ValueMap,
        database: Option<&str>,
    ) -> Result<QueryResult> {
        self.execute_write(connection_id, QueryCategory::Insert, |d| d.insert_statement(database, table, data))
            .await
    }

    async fn update_row(
        &self,
        connection_id: &str,
        table: &str,
        primary_key: &ValueMap,
        data: &ValueMap,
        database: Option<&str>,
    ) -> Result<QueryResult> {
        self.execute_write(connection_id, QueryCategory::Update, |d| {
            d.update_statement(database, table, primary_key, data)
        })
        .await
    }

    async fn delete_row(
        &self,
        connection_id: &str,
        table: &str,
        primary_key: &ValueMap,
        database: Option<&str>,
    ) -> Result<QueryResult> {
        self.execute_write(connection_id, QueryCategory::Delete, |d| d.delete_statement(database, table, primary_key))
            .await
    }

    async fn get_databases(&self, connection_id: &str) -> Result<Vec<String>> {
        let lease = self.lease(connection_id)?;
        with_timeout(lease.timeout, self.engine.list_databases(&lease.handle)).await
    }

    async fn get_tables(&self, connection_id: &str, database: Option<&str>) -> Result<Vec<String>> {
        let lease = self.lease(connection_id)?;
        with_timeout(lease.timeout, self.engine.list_tables(&lease.handle, database)).await
    }

    async fn get_table_full_schema(
        &self,
        connection_id: &str,
        table: &str,
        database: Option<&str>,
    ) -> Result<TableSchema> {
        if table.trim().is_empty() {
            return Err(OmniDbError::invalid_input("Table name cannot be empty"));
        }
        let lease = self.lease(connection_id)?;
        with_timeout(lease.timeout, self.engine.describe_table(&lease.handle, table, database)).await
    }

    async fn begin_transaction(&self, connection_id: &str) -> Result<Box<dyn Transaction>> {
        let lease = self.lease(connection_id)?;
        if lease.read_only {
            return Err(OmniDbError::read_only_violation(
                "Transactions are not allowed on a read-only connection",
            ));
        }
        with_timeout(lease.timeout, self.engine.begin(&lease.handle)).await
    }

    fn operation_statement(&self, operation: &BulkOperation) -> Result<String> {
        self.engine.dialect().operation_statement(operation)
    }

    fn connection_ids(&self) -> Vec<String> {
        self.registry.ids()
    }

    fn connection_info(&self, connection_id: &str) -> Result<ConnectionInfo> {
        self.registry.info(connection_id)
    }

    fn is_read_only(&self, connection_id: &str) -> Result<bool> {
        self.registry.is_read_only(connection_id)
    }

    async fn cleanup(&self) {
        for (id, entry) in self.registry.drain() {
            debug!(connection_id = %id, "closing connection during cleanup");
            self.engine.close(entry.handle).await;
        }
        if !self.registry.is_empty() {
            warn!("connections registered during cleanup were left open");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Row;
    use serde_json::json;

    fn count_result(value: Value) -> QueryResult {
        let row = Row::from_iter([("total".to_string(), value)]);
        QueryResult::rows(vec!["total".into()], vec![row])
    }

    #[test]
    fn test_extract_count_number() {
        assert_eq!(extract_count(&count_result(json!(23))).unwrap(), 23);
    }

    #[test]
    fn test_extract_count_string() {
        assert_eq!(extract_count(&count_result(json!("23"))).unwrap(), 23);
    }

    #[test]
    fn test_extract_count_errors() {
        assert!(extract_count(&count_result(json!(null))).is_err());
        assert!(extract_count(&QueryResult::rows(vec![], vec![])).is_err());
        assert!(extract_count(&QueryResult::affected(1)).is_err());
    }
}
