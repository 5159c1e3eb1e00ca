//! `SQLite` Engine Implementation
//!
//! This module implements [`SqlEngine`] for `SQLite` database files.
//!
//! # Features
//! - File-based connections (`/path/to/db.sqlite`)
//! - In-memory connections (`:memory:`)
//! - Catalogs via `sqlite_master` and PRAGMAs
//! - Transactions with `BEGIN` / `COMMIT` / `ROLLBACK`
//!
//! # Implementation Notes
//! - `rusqlite` is synchronous: every call runs on `spawn_blocking` with the
//!   connection behind `Arc<Mutex<_>>`
//! - BLOB data is Base64-encoded for JSON safety
//! - Timeouts are applied as `busy_timeout`
//! - The `database` argument of metadata calls names an attached schema
//!   (default `main`)

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;

use crate::capability::QueryCategory;
use crate::config::ConnectionConfig;
use crate::driver::sql::SqlEngine;
use crate::driver::{DatabaseType, Transaction};
use crate::error::{OmniDbError, Result};
use crate::filter::sql::SqlDialect;
use crate::model::{ColumnInfo, QueryResult, Row, TableSchema};

/// Shared native connection
pub type SqliteHandle = Arc<Mutex<Connection>>;

const DEFAULT_SCHEMA: &str = "main";

/// `SQLite` engine
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteEngine;

fn engine_error(detail: impl std::fmt::Display) -> OmniDbError {
    OmniDbError::engine_error("sqlite", detail.to_string())
}

/// Run a closure against the connection on the blocking pool
async fn blocking<T, F>(handle: &SqliteHandle, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
{
    let conn = Arc::clone(handle);
    tokio::task::spawn_blocking(move || {
        let guard = conn.lock();
        f(&guard)
    })
    .await
    .map_err(|e| engine_error(format!("Blocking task failed: {e}")))?
}

/// Open `SQLite` connection with appropriate flags
fn open_connection(path: &Path, read_only: bool) -> Result<Connection> {
    if path.as_os_str() == ":memory:" {
        return Connection::open_in_memory().map_err(|e| {
            OmniDbError::connection_failed(format!("Failed to open SQLite database: {e}"))
        });
    }

    let flags = if read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
    };

    Connection::open_with_flags(path, flags)
        .map_err(|e| OmniDbError::connection_failed(format!("Failed to open SQLite database: {e}")))
}

fn quote(name: &str) -> String {
    SqlDialect::SQLite.quote_identifier(name)
}

#[async_trait]
impl SqlEngine for SqliteEngine {
    type Handle = SqliteHandle;

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<SqliteHandle> {
        let path = config
            .file
            .clone()
            .ok_or_else(|| OmniDbError::invalid_input("SQLite requires 'file' parameter"))?;
        let read_only = config.readonly;
        let busy_timeout = config.timeout_duration();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = open_connection(&path, read_only)?;
            if let Some(timeout) = busy_timeout {
                conn.busy_timeout(timeout)
                    .map_err(|e| engine_error(format!("Failed to set timeout: {e}")))?;
            }
            Ok::<_, OmniDbError>(conn)
        })
        .await
        .map_err(|e| engine_error(format!("Blocking task failed: {e}")))??;

        Ok(Arc::new(Mutex::new(conn)))
    }

    async fn probe(&self, handle: &SqliteHandle) -> Result<Option<String>> {
        blocking(handle, |conn| {
            conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0))
                .map(Some)
                .map_err(|e| OmniDbError::connection_failed(format!("Failed to query SQLite version: {e}")))
        })
        .await
    }

    async fn close(&self, handle: SqliteHandle) {
        // The file is closed when the last clone (including open transactions) drops
        drop(handle);
    }

    async fn run(&self, handle: &SqliteHandle, sql: &str, _category: QueryCategory) -> Result<QueryResult> {
        let sql = sql.to_string();
        blocking(handle, move |conn| execute_query(conn, &sql)).await
    }

    async fn begin(&self, handle: &SqliteHandle) -> Result<Box<dyn Transaction>> {
        blocking(handle, |conn| {
            conn.execute_batch("BEGIN").map_err(|e| OmniDbError::query_failed(format!("BEGIN failed: {e}")))
        })
        .await?;
        Ok(Box::new(SqliteTransaction { conn: Arc::clone(handle), finished: false }))
    }

    async fn list_databases(&self, handle: &SqliteHandle) -> Result<Vec<String>> {
        blocking(handle, |conn| {
            let mut stmt = conn.prepare("PRAGMA database_list").map_err(engine_error)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(1))
                .map_err(engine_error)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(engine_error)?;
            Ok(names)
        })
        .await
    }

    async fn list_tables(&self, handle: &SqliteHandle, database: Option<&str>) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT name FROM {}.sqlite_master WHERE type IN ('table', 'view') \
             AND name NOT LIKE 'sqlite_%' ORDER BY name",
            quote(database.unwrap_or(DEFAULT_SCHEMA))
        );
        blocking(handle, move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(|e| engine_error(format!("Failed to query tables: {e}")))?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| engine_error(format!("Failed to fetch table names: {e}")))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| engine_error(format!("Failed to collect table names: {e}")))?;
            Ok(names)
        })
        .await
    }

    async fn describe_table(&self, handle: &SqliteHandle, table: &str, database: Option<&str>) -> Result<TableSchema> {
        let table = table.to_string();
        let schema = database.unwrap_or(DEFAULT_SCHEMA).to_string();
        blocking(handle, move |conn| describe_table(conn, &schema, &table)).await
    }
}

/// Read columns, primary key and unique indexes of one table
fn describe_table(conn: &Connection, schema: &str, table: &str) -> Result<TableSchema> {
    let schema_ref = quote(schema);
    let table_ref = quote(table);

    let mut stmt = conn
        .prepare(&format!("PRAGMA {schema_ref}.table_info({table_ref})"))
        .map_err(|e| engine_error(format!("Failed to prepare table_info for {table}: {e}")))?;

    // (column, pk position) pairs; pk > 0 means part of the primary key
    let mut pk_positions: Vec<(i64, String)> = Vec::new();
    let columns: Vec<ColumnInfo> = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let data_type: String = row.get(2)?;
            let not_null: i64 = row.get(3)?;
            let default: Option<String> = row.get(4)?;
            let pk: i64 = row.get(5)?;
            Ok((name, data_type, not_null, default, pk))
        })
        .map_err(|e| engine_error(format!("Failed to query columns for {table}: {e}")))?
        .map(|r| {
            r.map(|(name, data_type, not_null, default, pk)| {
                if pk > 0 {
                    pk_positions.push((pk, name.clone()));
                }
                let mut column = ColumnInfo::new(name, data_type, not_null == 0);
                column.default = default;
                column
            })
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| engine_error(format!("Failed to collect columns for {table}: {e}")))?;

    if columns.is_empty() {
        return Err(OmniDbError::query_failed(format!("Table '{table}' not found")));
    }

    pk_positions.sort_by_key(|(position, _)| *position);
    let primary_keys = pk_positions.into_iter().map(|(_, name)| name).collect();

    let mut idx_stmt = conn
        .prepare(&format!("PRAGMA {schema_ref}.index_list({table_ref})"))
        .map_err(|e| engine_error(format!("Failed to prepare index_list for {table}: {e}")))?;

    // Unique indexes other than the one backing the primary key
    let unique_indexes: Vec<String> = idx_stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let unique: i64 = row.get(2)?;
            let origin: String = row.get(3)?;
            Ok((name, unique != 0 && origin != "pk"))
        })
        .map_err(|e| engine_error(format!("Failed to query indexes for {table}: {e}")))?
        .filter_map(std::result::Result::ok)
        .filter(|(_, unique)| *unique)
        .map(|(name, _)| name)
        .collect();

    let mut unique_keys = Vec::with_capacity(unique_indexes.len());
    for index_name in unique_indexes {
        let mut info_stmt = conn
            .prepare(&format!("PRAGMA {schema_ref}.index_info({})", quote(&index_name)))
            .map_err(|e| engine_error(format!("Failed to prepare index_info for {index_name}: {e}")))?;

        let index_columns: Vec<String> = info_stmt
            .query_map([], |row| row.get::<_, String>(2))
            .map_err(|e| engine_error(format!("Failed to query index columns for {index_name}: {e}")))?
            .filter_map(std::result::Result::ok)
            .collect();

        if !index_columns.is_empty() {
            unique_keys.push(index_columns);
        }
    }

    Ok(TableSchema::from_catalog(table, columns, primary_keys, unique_keys))
}

/// Execute one statement and build a [`QueryResult`]
fn execute_query(conn: &Connection, query: &str) -> Result<QueryResult> {
    let mut stmt = conn
        .prepare(query)
        .map_err(|e| OmniDbError::query_failed(format!("Failed to prepare query: {e}")))?;

    let column_names: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();

    if column_names.is_empty() {
        // INSERT, UPDATE, DELETE, DDL
        let affected =
            stmt.execute([]).map_err(|e| OmniDbError::query_failed(format!("Failed to execute query: {e}")))?;
        return Ok(QueryResult::affected(affected as u64));
    }

    let mut rows = stmt
        .query([])
        .map_err(|e| OmniDbError::query_failed(format!("Failed to execute query: {e}")))?;

    let mut data = Vec::new();
    while let Some(row) =
        rows.next().map_err(|e| OmniDbError::query_failed(format!("Failed to fetch row: {e}")))?
    {
        let mut record = Row::with_capacity(column_names.len());
        for (idx, name) in column_names.iter().enumerate() {
            let value = sqlite_value_to_json(row, idx)
                .map_err(|e| OmniDbError::query_failed(format!("Failed to read column {name}: {e}")))?;
            record.insert(name.clone(), value);
        }
        data.push(record);
    }

    Ok(QueryResult::rows(column_names, data))
}

/// Convert `SQLite` value to JSON value
fn sqlite_value_to_json(row: &rusqlite::Row<'_>, idx: usize) -> std::result::Result<Value, rusqlite::Error> {
    use rusqlite::types::ValueRef;

    Ok(match row.get_ref(idx)? {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        // NaN and infinities have no JSON form
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(s) => Value::String(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
    })
}

/// Transaction on a shared `SQLite` connection
struct SqliteTransaction {
    conn: SqliteHandle,
    finished: bool,
}

impl SqliteTransaction {
    async fn finish(&mut self, statement: &'static str) -> Result<()> {
        self.finished = true;
        blocking(&self.conn, move |conn| {
            conn.execute_batch(statement).map_err(|e| OmniDbError::query_failed(format!("{statement} failed: {e}")))
        })
        .await
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn execute(&mut self, statement: &str) -> Result<u64> {
        let statement = statement.to_string();
        blocking(&self.conn, move |conn| {
            conn.execute(&statement, [])
                .map(|n| n as u64)
                .map_err(|e| OmniDbError::query_failed(e.to_string()))
        })
        .await
    }

    async fn commit(&mut self) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if !self.finished {
            let conn = self.conn.lock();
            if !conn.is_autocommit() {
                let _ = conn.execute_batch("ROLLBACK");
            }
        }
    }
}
