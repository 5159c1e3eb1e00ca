//! `MySQL` Engine Implementation
//!
//! This module implements [`SqlEngine`] for `MySQL` and `MariaDB` servers.
//!
//! # Features
//! - Pooled client-server connections (`mysql_async::Pool`)
//! - TLS via `SslOpts` when `secure` is set
//! - Catalogs via `information_schema`
//! - Transactions on a dedicated pooled connection
//!
//! # Implementation Notes
//! - Raw statements use the text protocol, so numeric columns arrive as text
//!   and are parsed by column type
//! - Binary data that is not valid UTF-8 is Base64-encoded for JSON safety
//! - The `database` argument of metadata calls defaults to the connected database

use async_trait::async_trait;
use indexmap::IndexMap;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::Queryable;
use mysql_async::{Column, Conn, OptsBuilder, Pool, SslOpts, Value as MyValue};
use serde_json::Value;
use tracing::debug;

use crate::capability::QueryCategory;
use crate::config::ConnectionConfig;
use crate::driver::sql::SqlEngine;
use crate::driver::{DatabaseType, Transaction};
use crate::error::{OmniDbError, Result};
use crate::filter::sql::SqlDialect;
use crate::model::{ColumnInfo, QueryResult, Row, TableSchema};

/// `MySQL` engine
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlEngine;

fn query_error(e: mysql_async::Error) -> OmniDbError {
    OmniDbError::query_failed(e.to_string())
}

fn engine_error(e: mysql_async::Error) -> OmniDbError {
    OmniDbError::engine_error("mysql", e.to_string())
}

/// Build the native pool options
fn build_mysql_opts(config: &ConnectionConfig) -> Result<OptsBuilder> {
    let user = config
        .username
        .as_deref()
        .ok_or_else(|| OmniDbError::invalid_input("MySQL requires 'username' parameter"))?;

    let mut opts = OptsBuilder::default()
        .ip_or_hostname(config.effective_host())
        .tcp_port(config.effective_port().unwrap_or(3306))
        .user(Some(user))
        .pass(config.password.as_deref())
        .db_name(config.database.as_deref());

    if config.secure {
        opts = opts.ssl_opts(Some(SslOpts::default()));
    }

    Ok(opts)
}

async fn get_conn(pool: &Pool) -> Result<Conn> {
    pool.get_conn()
        .await
        .map_err(|e| OmniDbError::connection_failed(format!("Failed to get MySQL connection: {e}")))
}

#[async_trait]
impl SqlEngine for MySqlEngine {
    type Handle = Pool;

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySql
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::MySql
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<Pool> {
        Ok(Pool::new(build_mysql_opts(config)?))
    }

    async fn probe(&self, pool: &Pool) -> Result<Option<String>> {
        let mut conn = get_conn(pool).await?;
        conn.query_first::<String, _>("SELECT VERSION()")
            .await
            .map_err(|e| OmniDbError::connection_failed(format!("Failed to query MySQL version: {e}")))
    }

    async fn close(&self, pool: Pool) {
        if let Err(err) = pool.disconnect().await {
            debug!(error = %err, "MySQL pool disconnect reported an error");
        }
    }

    async fn run(&self, pool: &Pool, sql: &str, _category: QueryCategory) -> Result<QueryResult> {
        let mut conn = get_conn(pool).await?;
        let mut result = conn.query_iter(sql).await.map_err(query_error)?;

        let columns = result.columns().filter(|c| !c.is_empty());
        let rows: Vec<mysql_async::Row> = result.collect().await.map_err(query_error)?;
        let affected = result.affected_rows();
        result.drop_result().await.map_err(query_error)?;

        let Some(columns) = columns else {
            return Ok(QueryResult::affected(affected));
        };

        let fields: Vec<String> = columns.iter().map(|c| c.name_str().into_owned()).collect();
        let mut data = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = Row::with_capacity(fields.len());
            for (idx, (name, column)) in fields.iter().zip(columns.iter()).enumerate() {
                let value = row
                    .as_ref(idx)
                    .ok_or_else(|| OmniDbError::query_failed(format!("Failed to get value at index {idx}")))?;
                record.insert(name.clone(), mysql_value_to_json(value, column));
            }
            data.push(record);
        }

        Ok(QueryResult::rows(fields, data))
    }

    async fn begin(&self, pool: &Pool) -> Result<Box<dyn Transaction>> {
        let mut conn = get_conn(pool).await?;
        conn.query_drop("START TRANSACTION")
            .await
            .map_err(|e| OmniDbError::query_failed(format!("START TRANSACTION failed: {e}")))?;
        Ok(Box::new(MySqlTransaction { conn: Some(conn) }))
    }

    async fn list_databases(&self, pool: &Pool) -> Result<Vec<String>> {
        let mut conn = get_conn(pool).await?;
        conn.query::<String, _>("SHOW DATABASES").await.map_err(engine_error)
    }

    async fn list_tables(&self, pool: &Pool, database: Option<&str>) -> Result<Vec<String>> {
        let mut conn = get_conn(pool).await?;
        conn.exec::<String, _, _>(
            "SELECT TABLE_NAME FROM information_schema.TABLES
             WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
             ORDER BY TABLE_NAME",
            (database.map(str::to_string),),
        )
        .await
        .map_err(engine_error)
    }

    async fn describe_table(&self, pool: &Pool, table: &str, database: Option<&str>) -> Result<TableSchema> {
        let mut conn = get_conn(pool).await?;
        let schema = database.map(str::to_string);

        let rows: Vec<(String, String, String, Option<String>)> = conn
            .exec(
                "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT
                 FROM information_schema.COLUMNS
                 WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?
                 ORDER BY ORDINAL_POSITION",
                (schema.clone(), table),
            )
            .await
            .map_err(engine_error)?;

        if rows.is_empty() {
            return Err(OmniDbError::query_failed(format!("Table '{table}' not found")));
        }

        let columns = rows
            .into_iter()
            .map(|(name, data_type, nullable, default)| {
                let mut column = ColumnInfo::new(name, data_type, nullable == "YES");
                column.default = default;
                column
            })
            .collect();

        let index_rows: Vec<(String, String)> = conn
            .exec(
                "SELECT INDEX_NAME, COLUMN_NAME
                 FROM information_schema.STATISTICS
                 WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ? AND NON_UNIQUE = 0
                 ORDER BY INDEX_NAME, SEQ_IN_INDEX",
                (schema, table),
            )
            .await
            .map_err(engine_error)?;

        let mut primary_keys = Vec::new();
        let mut unique: IndexMap<String, Vec<String>> = IndexMap::new();
        for (index, column) in index_rows {
            if index == "PRIMARY" {
                primary_keys.push(column);
            } else {
                unique.entry(index).or_default().push(column);
            }
        }

        Ok(TableSchema::from_catalog(table, columns, primary_keys, unique.into_values().collect()))
    }
}

const fn is_integer(column_type: ColumnType) -> bool {
    matches!(
        column_type,
        ColumnType::MYSQL_TYPE_TINY
            | ColumnType::MYSQL_TYPE_SHORT
            | ColumnType::MYSQL_TYPE_LONG
            | ColumnType::MYSQL_TYPE_INT24
            | ColumnType::MYSQL_TYPE_LONGLONG
            | ColumnType::MYSQL_TYPE_YEAR
    )
}

const fn is_float(column_type: ColumnType) -> bool {
    matches!(column_type, ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE)
}

fn float_to_json(f: f64) -> Value {
    // NaN and infinities have no JSON form
    serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
}

/// Convert `MySQL` value to JSON value
fn mysql_value_to_json(value: &MyValue, column: &Column) -> Value {
    let column_type = column.column_type();

    match value {
        MyValue::NULL => Value::Null,

        MyValue::Bytes(bytes) => {
            let Ok(text) = std::str::from_utf8(bytes) else {
                use base64::Engine;
                return Value::String(base64::engine::general_purpose::STANDARD.encode(bytes));
            };

            if is_integer(column_type) {
                if let Ok(i) = text.parse::<i64>() {
                    return Value::from(i);
                }
                if let Ok(u) = text.parse::<u64>() {
                    return Value::from(u);
                }
            } else if is_float(column_type) {
                if let Ok(f) = text.parse::<f64>() {
                    return float_to_json(f);
                }
            }
            Value::String(text.to_string())
        }

        MyValue::Int(i) => Value::from(*i),
        MyValue::UInt(u) => Value::from(*u),
        MyValue::Float(f) => float_to_json(f64::from(*f)),
        MyValue::Double(d) => float_to_json(*d),

        MyValue::Date(year, month, day, hour, minute, second, micro) => {
            if column_type == ColumnType::MYSQL_TYPE_DATE {
                Value::String(format!("{year:04}-{month:02}-{day:02}"))
            } else {
                Value::String(format!(
                    "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{micro:06}"
                ))
            }
        }

        MyValue::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if *is_negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(*hours);
            Value::String(format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}.{micros:06}"))
        }
    }
}

/// Transaction on a dedicated pooled connection
struct MySqlTransaction {
    conn: Option<Conn>,
}

impl MySqlTransaction {
    fn conn(&mut self) -> Result<&mut Conn> {
        self.conn.as_mut().ok_or_else(|| OmniDbError::query_failed("Transaction already finished"))
    }

    async fn finish(&mut self, statement: &str) -> Result<()> {
        let mut conn =
            self.conn.take().ok_or_else(|| OmniDbError::query_failed("Transaction already finished"))?;
        conn.query_drop(statement)
            .await
            .map_err(|e| OmniDbError::query_failed(format!("{statement} failed: {e}")))
    }
}

#[async_trait]
impl Transaction for MySqlTransaction {
    async fn execute(&mut self, statement: &str) -> Result<u64> {
        let conn = self.conn()?;
        conn.query_drop(statement).await.map_err(query_error)?;
        Ok(conn.affected_rows())
    }

    async fn commit(&mut self) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for MySqlTransaction {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = conn.query_drop("ROLLBACK").await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sql::SqlDriver;
    use crate::driver::Driver;
    use crate::model::BulkOperation;
    use serde_json::json;

    fn live_config() -> ConnectionConfig {
        ConnectionConfig::mysql("localhost", 3306, "root", "root", "test").with_timeout(5000)
    }

    #[test]
    fn test_build_mysql_opts_requires_username() {
        assert!(build_mysql_opts(&ConnectionConfig::new(DatabaseType::MySql)).is_err());
        assert!(build_mysql_opts(&live_config()).is_ok());
    }

    #[tokio::test]
    #[ignore = "Requires running MySQL instance"]
    async fn test_live_round_trip() {
        let driver = SqlDriver::new(MySqlEngine);
        let info = driver.connect(&live_config(), "my").await.unwrap();
        assert!(info.server_version.is_some());

        driver.query("my", "DROP TABLE IF EXISTS omnidb_items", None).await.unwrap();
        driver
            .query("my", "CREATE TABLE omnidb_items (id INT PRIMARY KEY, sku VARCHAR(20) UNIQUE, qty INT)", None)
            .await
            .unwrap();

        let result = driver.query("my", "INSERT INTO omnidb_items VALUES (1, 'a', 5), (2, 'b', 7)", None).await.unwrap();
        assert_eq!(result.affected_rows, Some(2));

        let rows = driver.query("my", "SELECT id, qty FROM omnidb_items ORDER BY id", None).await.unwrap();
        assert_eq!(rows.data.unwrap()[1]["qty"], json!(7));

        let schema = driver.get_table_full_schema("my", "omnidb_items", None).await.unwrap();
        assert_eq!(schema.primary_keys, vec!["id"]);
        assert_eq!(schema.unique_keys, vec![vec!["sku".to_string()]]);

        let ops: Vec<BulkOperation> = serde_json::from_value(json!([
            {"type": "insert", "table": "omnidb_items", "data": {"id": 3, "sku": "c", "qty": 1}},
            {"type": "insert", "table": "omnidb_items", "data": {"id": 1, "sku": "dup", "qty": 1}}
        ]))
        .unwrap();
        let bulk = driver.execute_bulk_operations("my", &ops).await.unwrap();
        assert!(!bulk.success);
        assert!(bulk.transactional);

        let count = driver.query("my", "SELECT COUNT(*) AS n FROM omnidb_items", None).await.unwrap();
        assert_eq!(count.data.unwrap()[0]["n"], json!(2));

        driver.query("my", "DROP TABLE omnidb_items", None).await.unwrap();
        driver.disconnect("my").await.unwrap();
    }
}
