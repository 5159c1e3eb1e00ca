//! Session Manager
//!
//! [`SessionManager`] is the single entry point for callers. It holds at most
//! one active connection and routes every operation to the driver serving it.
//!
//! # Routing
//! Operations name a connection id; an id other than the active one (or any
//! id while disconnected) fails with `CONNECTION_NOT_FOUND` before a driver is
//! touched. [`SessionManager::get_all_connections`] is the exception: it lists
//! what every instantiated driver still holds, which can include connections
//! opened directly through [`SessionManager::factory`].
//!
//! # Error Boundary
//! Calls that produce a result envelope (`QueryResult`, `ConnectionResult`,
//! `OperationResult`, `BulkOperationResult`) never return an error; driver
//! errors are folded into a failure result. Metadata calls return
//! [`Result`] with the typed error.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::capability::BackendCapabilities;
use crate::config::ConnectionConfig;
use crate::driver::{DatabaseType, Driver, Transaction};
use crate::error::{OmniDbError, Result};
use crate::factory::DriverFactory;
use crate::model::{
    BulkOperation, BulkOperationResult, ColumnInfo, ConnectionInfo, ConnectionResult, OperationResult, QueryResult,
    TableQueryOptions, TableSchema, ValueMap,
};

/// Connection id used by [`SessionManager::test_connection`]
const PROBE_CONNECTION_PREFIX: &str = "__omnidb_probe";

/// The connection operations are routed to
struct ActiveConnection {
    id: String,
    database_type: DatabaseType,
    driver: Arc<dyn Driver>,
}

/// Single-active-connection facade over the driver factory
#[derive(Default)]
pub struct SessionManager {
    factory: DriverFactory,
    active: RwLock<Option<ActiveConnection>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("factory", &self.factory)
            .field("active", &self.get_active_connection())
            .finish()
    }
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory holding the shared driver instances
    #[must_use]
    pub const fn factory(&self) -> &DriverFactory {
        &self.factory
    }

    /// Driver for `connection_id` if it is the active connection
    fn route(&self, connection_id: &str) -> Result<Arc<dyn Driver>> {
        match self.active.read().as_ref() {
            Some(active) if active.id == connection_id => Ok(Arc::clone(&active.driver)),
            _ => Err(OmniDbError::connection_not_found(connection_id)),
        }
    }

    /// Open a connection and make it the active one
    ///
    /// The previous active connection is closed first, even when the new
    /// connection then fails to open.
    pub async fn connect(&self, config: &ConnectionConfig, connection_id: &str) -> ConnectionResult {
        let previous = self.active.write().take();
        if let Some(previous) = previous {
            debug!(connection_id = %previous.id, "closing previous active connection");
            if let Err(err) = previous.driver.disconnect(&previous.id).await {
                warn!(connection_id = %previous.id, error = %err, "failed to close previous connection");
            }
        }

        let result = async {
            let driver = self.factory.get_driver(config.database_type)?;
            let info = driver.connect(config, connection_id).await?;
            Ok::<_, OmniDbError>((driver, info))
        }
        .await;

        match result {
            Ok((driver, info)) => {
                info!(connection_id, backend = %config.database_type, "connected");
                // A concurrent connect may have installed its connection meanwhile
                let displaced = self.active.write().replace(ActiveConnection {
                    id: connection_id.to_string(),
                    database_type: config.database_type,
                    driver,
                });
                if let Some(displaced) = displaced {
                    let same = displaced.id == connection_id && displaced.database_type == config.database_type;
                    if !same {
                        debug!(connection_id = %displaced.id, "closing connection displaced by concurrent connect");
                        if let Err(err) = displaced.driver.disconnect(&displaced.id).await {
                            warn!(connection_id = %displaced.id, error = %err, "failed to close displaced connection");
                        }
                    }
                }
                ConnectionResult::connected(info)
            }
            Err(err) => {
                warn!(connection_id, backend = %config.database_type, error = %err, "connect failed");
                ConnectionResult::failure(&err)
            }
        }
    }

    /// Close the active connection
    pub async fn disconnect(&self, connection_id: &str) -> OperationResult {
        let driver = match self.route(connection_id) {
            Ok(driver) => driver,
            Err(err) => return OperationResult::failure(&err),
        };
        {
            let mut active = self.active.write();
            if active.as_ref().is_some_and(|a| a.id == connection_id) {
                *active = None;
            }
        }

        match driver.disconnect(connection_id).await {
            Ok(()) => {
                info!(connection_id, "disconnected");
                OperationResult::ok("Disconnected")
            }
            Err(err) => OperationResult::failure(&err),
        }
    }

    /// Connect under a throwaway id, probe, disconnect and report
    ///
    /// The active connection is left untouched.
    pub async fn test_connection(&self, config: &ConnectionConfig) -> ConnectionResult {
        let probe_id = format!("{PROBE_CONNECTION_PREFIX}_{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0));

        let driver = match self.factory.get_driver(config.database_type) {
            Ok(driver) => driver,
            Err(err) => return ConnectionResult::failure(&err),
        };

        match driver.connect(config, &probe_id).await {
            Ok(info) => {
                if let Err(err) = driver.disconnect(&probe_id).await {
                    warn!(error = %err, "failed to close test connection");
                }
                let mut result = ConnectionResult::connected(info);
                result.message = "Connection test succeeded".to_string();
                result
            }
            Err(err) => ConnectionResult::failure(&err),
        }
    }

    pub async fn query(&self, connection_id: &str, query: &str, session_id: Option<&str>) -> QueryResult {
        let outcome = async { self.route(connection_id)?.query(connection_id, query, session_id).await }.await;
        fold_query(connection_id, outcome)
    }

    pub async fn query_table(
        &self,
        connection_id: &str,
        options: &TableQueryOptions,
        session_id: Option<&str>,
    ) -> QueryResult {
        let outcome =
            async { self.route(connection_id)?.query_table(connection_id, options, session_id).await }.await;
        fold_query(connection_id, outcome)
    }

    /// Signal an in-flight query registered under `query_id`
    pub async fn cancel_query(&self, connection_id: &str, query_id: &str) -> OperationResult {
        let outcome = async { self.route(connection_id)?.cancel_query(connection_id, query_id).await }.await;
        match outcome {
            Ok(()) => OperationResult::ok(format!("Cancellation requested for '{query_id}'")),
            Err(err) => OperationResult::failure(&err),
        }
    }

    pub async fn insert_row(
        &self,
        connection_id: &str,
        table: &str,
        data: &ValueMap,
        database: Option<&str>,
    ) -> QueryResult {
        let outcome =
            async { self.route(connection_id)?.insert_row(connection_id, table, data, database).await }.await;
        fold_query(connection_id, outcome)
    }

    pub async fn update_row(
        &self,
        connection_id: &str,
        table: &str,
        primary_key: &ValueMap,
        data: &ValueMap,
        database: Option<&str>,
    ) -> QueryResult {
        let outcome = async {
            self.route(connection_id)?.update_row(connection_id, table, primary_key, data, database).await
        }
        .await;
        fold_query(connection_id, outcome)
    }

    pub async fn delete_row(
        &self,
        connection_id: &str,
        table: &str,
        primary_key: &ValueMap,
        database: Option<&str>,
    ) -> QueryResult {
        let outcome =
            async { self.route(connection_id)?.delete_row(connection_id, table, primary_key, database).await }.await;
        fold_query(connection_id, outcome)
    }

    pub async fn get_databases(&self, connection_id: &str) -> Result<Vec<String>> {
        self.route(connection_id)?.get_databases(connection_id).await
    }

    pub async fn get_tables(&self, connection_id: &str, database: Option<&str>) -> Result<Vec<String>> {
        self.route(connection_id)?.get_tables(connection_id, database).await
    }

    pub async fn get_table_schema(
        &self,
        connection_id: &str,
        table: &str,
        database: Option<&str>,
    ) -> Result<Vec<ColumnInfo>> {
        self.route(connection_id)?.get_table_schema(connection_id, table, database).await
    }

    pub async fn get_table_full_schema(
        &self,
        connection_id: &str,
        table: &str,
        database: Option<&str>,
    ) -> Result<TableSchema> {
        self.route(connection_id)?.get_table_full_schema(connection_id, table, database).await
    }

    pub async fn get_primary_keys(
        &self,
        connection_id: &str,
        table: &str,
        database: Option<&str>,
    ) -> Result<Vec<String>> {
        self.route(connection_id)?.get_primary_keys(connection_id, table, database).await
    }

    /// Capability flags of the active connection's backend
    pub fn get_capabilities(&self, connection_id: &str) -> Result<BackendCapabilities> {
        Ok(self.route(connection_id)?.capabilities())
    }

    /// Whether the active connection's backend supports transactions
    #[must_use]
    pub fn supports_transactions(&self, connection_id: &str) -> bool {
        self.route(connection_id).is_ok_and(|driver| driver.supports_transactions())
    }

    pub async fn begin_transaction(&self, connection_id: &str) -> Result<Box<dyn Transaction>> {
        self.route(connection_id)?.begin_transaction(connection_id).await
    }

    /// Apply row operations in order, atomically where the backend allows it
    pub async fn execute_bulk_operations(
        &self,
        connection_id: &str,
        operations: &[BulkOperation],
    ) -> BulkOperationResult {
        let outcome =
            async { self.route(connection_id)?.execute_bulk_operations(connection_id, operations).await }.await;
        match outcome {
            Ok(result) => {
                debug!(
                    connection_id,
                    operations = operations.len(),
                    success = result.success,
                    transactional = result.transactional,
                    "bulk operations finished"
                );
                result
            }
            Err(err) => BulkOperationResult::rejected(&err),
        }
    }

    pub fn get_connection_info(&self, connection_id: &str) -> Result<ConnectionInfo> {
        self.route(connection_id)?.connection_info(connection_id)
    }

    /// Connection ids held by every instantiated driver, sorted
    #[must_use]
    pub fn get_all_connections(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.factory.all_drivers().iter().flat_map(|d| d.connection_ids()).collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn get_supported_database_types(&self) -> Vec<DatabaseType> {
        DriverFactory::supported_types()
    }

    /// Id of the active connection, if any
    #[must_use]
    pub fn get_active_connection(&self) -> Option<String> {
        self.active.read().as_ref().map(|a| a.id.clone())
    }

    /// Backend type of the active connection, if any
    #[must_use]
    pub fn active_database_type(&self) -> Option<DatabaseType> {
        self.active.read().as_ref().map(|a| a.database_type)
    }

    /// Drop the active connection and close everything every driver holds
    pub async fn cleanup(&self) {
        let active = self.active.write().take();
        if let Some(active) = active {
            debug!(connection_id = %active.id, "dropping active connection during cleanup");
        }
        for driver in self.factory.all_drivers() {
            driver.cleanup().await;
        }
    }
}

/// Fold a driver outcome into a result envelope
fn fold_query(connection_id: &str, outcome: Result<QueryResult>) -> QueryResult {
    outcome.unwrap_or_else(|err| {
        debug!(connection_id, code = err.error_code(), "operation failed");
        QueryResult::failure(&err)
    })
}
