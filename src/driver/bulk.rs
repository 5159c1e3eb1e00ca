//! Bulk operation orchestration
//!
//! Applies a list of row operations in input order:
//! 1. Read-only connection: rejected before anything runs
//! 2. Transactional backend: BEGIN, each statement, COMMIT; the first failure
//!    rolls back and stops
//! 3. BEGIN or COMMIT failure: best-effort ROLLBACK, then step 4
//! 4. Sequential fallback: every operation on its own, no early stop, with a
//!    warning that partial changes may have been applied

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::driver::{Driver, Transaction};
use crate::error::{OmniDbError, Result};
use crate::model::{BulkOperation, BulkOperationResult, QueryResult};

/// Warning attached to every non-transactional bulk result
pub const NON_TRANSACTIONAL_WARNING: &str =
    "Operations were executed without a transaction; partial changes may have been applied";

/// The orchestrator's view of a driver bound to one connection
#[async_trait]
pub trait OperationSink: Send + Sync {
    fn supports_transactions(&self) -> bool;

    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Native statement for an operation, run inside a transaction
    fn statement_for(&self, operation: &BulkOperation) -> Result<String>;

    /// Apply an operation on its own
    async fn apply(&self, operation: &BulkOperation) -> Result<QueryResult>;
}

/// A driver bound to one connection id
pub struct DriverSink<'a, D: ?Sized> {
    driver: &'a D,
    connection_id: &'a str,
}

impl<'a, D: Driver + ?Sized> DriverSink<'a, D> {
    pub fn new(driver: &'a D, connection_id: &'a str) -> Self {
        Self { driver, connection_id }
    }
}

#[async_trait]
impl<D: Driver + ?Sized> OperationSink for DriverSink<'_, D> {
    fn supports_transactions(&self) -> bool {
        self.driver.supports_transactions()
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.driver.begin_transaction(self.connection_id).await
    }

    fn statement_for(&self, operation: &BulkOperation) -> Result<String> {
        self.driver.operation_statement(operation)
    }

    async fn apply(&self, operation: &BulkOperation) -> Result<QueryResult> {
        self.driver.apply_operation(self.connection_id, operation).await
    }
}

/// Run a bulk request against a sink
pub async fn execute_bulk<S>(sink: &S, operations: &[BulkOperation], read_only: bool) -> BulkOperationResult
where
    S: OperationSink + ?Sized,
{
    if read_only {
        let err = OmniDbError::read_only_violation("Bulk operations are not allowed on a read-only connection");
        return BulkOperationResult::rejected(&err);
    }

    if operations.is_empty() {
        return BulkOperationResult {
            success: true,
            results: Vec::new(),
            error: None,
            warning: None,
            transactional: sink.supports_transactions(),
        };
    }

    if sink.supports_transactions() {
        match sink.begin().await {
            Ok(mut tx) => {
                if let Some(result) = run_in_transaction(sink, tx.as_mut(), operations).await {
                    return result;
                }
            }
            Err(err) => {
                warn!(error = %err, "BEGIN failed, applying bulk operations without a transaction");
            }
        }
    }

    run_sequentially(sink, operations).await
}

/// Transactional attempt; `None` means fall back to sequential execution
async fn run_in_transaction<S>(
    sink: &S,
    tx: &mut dyn Transaction,
    operations: &[BulkOperation],
) -> Option<BulkOperationResult>
where
    S: OperationSink + ?Sized,
{
    let mut results = Vec::with_capacity(operations.len());

    for (index, operation) in operations.iter().enumerate() {
        let outcome = match sink.statement_for(operation) {
            Ok(statement) => tx.execute(&statement).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(affected) => {
                results.push(QueryResult::affected(affected).with_category(operation.category()));
            }
            Err(err) => {
                results.push(QueryResult::failure(&err).with_category(operation.category()));
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "ROLLBACK after failed bulk operation failed");
                }
                info!(failed_index = index, "bulk operations rolled back");
                return Some(BulkOperationResult {
                    success: false,
                    results,
                    error: Some(format!("Operation {} failed: {}", index + 1, err.message())),
                    warning: None,
                    transactional: true,
                });
            }
        }
    }

    match tx.commit().await {
        Ok(()) => {
            info!(count = operations.len(), "bulk operations committed");
            Some(BulkOperationResult { success: true, results, error: None, warning: None, transactional: true })
        }
        Err(err) => {
            warn!(error = %err, "COMMIT failed, applying bulk operations without a transaction");
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "ROLLBACK after failed COMMIT failed");
            }
            None
        }
    }
}

async fn run_sequentially<S>(sink: &S, operations: &[BulkOperation]) -> BulkOperationResult
where
    S: OperationSink + ?Sized,
{
    let mut results = Vec::with_capacity(operations.len());
    let mut first_error = None;

    for (index, operation) in operations.iter().enumerate() {
        match sink.apply(operation).await {
            Ok(result) => results.push(result),
            Err(err) => {
                debug!(index, error = %err, "bulk operation failed");
                if first_error.is_none() {
                    first_error = Some(format!("Operation {} failed: {}", index + 1, err.message()));
                }
                results.push(QueryResult::failure(&err).with_category(operation.category()));
            }
        }
    }

    let success = first_error.is_none();
    info!(count = operations.len(), success, "bulk operations applied without a transaction");
    BulkOperationResult {
        success,
        results,
        error: first_error,
        warning: Some(NON_TRANSACTIONAL_WARNING.to_string()),
        transactional: false,
    }
}
