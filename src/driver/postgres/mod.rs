//! `PostgreSQL` Engine Implementation
//!
//! This module implements [`SqlEngine`] for `PostgreSQL` servers.
//!
//! # Features
//! - Client-server connections via TCP
//! - Catalogs via `pg_database` and `information_schema`
//! - Transactions with `BEGIN` / `COMMIT` / `ROLLBACK`
//! - Rich type mapping (JSON/JSONB, numeric, timestamps, UUID)
//!
//! # Implementation Notes
//! - Uses `tokio-postgres`; the connection task is spawned on the runtime
//! - The client is shared behind `Arc`, so a transaction covers every
//!   statement issued on the connection until it ends
//! - BYTEA data is Base64-encoded for JSON safety
//! - The `database` argument of metadata calls is the schema (default `public`)
//! - TLS is not offered; `secure` configs are rejected at validation

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row as PgRow};

use crate::capability::QueryCategory;
use crate::config::ConnectionConfig;
use crate::driver::sql::SqlEngine;
use crate::driver::{DatabaseType, Transaction};
use crate::error::{OmniDbError, Result};
use crate::filter::sql::SqlDialect;
use crate::model::{ColumnInfo, QueryResult, Row, TableSchema};

const DEFAULT_SCHEMA: &str = "public";
const DEFAULT_DATABASE: &str = "postgres";

/// `PostgreSQL` engine
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresEngine;

/// Native error text, without the `db error:` prefix for server errors
fn pg_message(e: &tokio_postgres::Error) -> String {
    e.as_db_error().map_or_else(|| e.to_string(), |db| db.message().to_string())
}

fn query_error(e: &tokio_postgres::Error) -> OmniDbError {
    OmniDbError::query_failed(pg_message(e))
}

fn engine_error(e: &tokio_postgres::Error) -> OmniDbError {
    OmniDbError::engine_error("postgres", pg_message(e))
}

/// Build the native client configuration
fn build_pg_config(config: &ConnectionConfig) -> Result<Config> {
    let user = config
        .username
        .as_deref()
        .ok_or_else(|| OmniDbError::invalid_input("PostgreSQL requires 'username' parameter"))?;

    let mut pg_config = Config::new();
    pg_config
        .host(config.effective_host())
        .port(config.effective_port().unwrap_or(5432))
        .user(user)
        .dbname(config.database.as_deref().unwrap_or(DEFAULT_DATABASE))
        .application_name("omnidb");

    if let Some(password) = &config.password {
        pg_config.password(password);
    }
    if let Some(timeout) = config.timeout_duration() {
        pg_config.connect_timeout(timeout);
    }

    Ok(pg_config)
}

#[async_trait]
impl SqlEngine for PostgresEngine {
    type Handle = Arc<Client>;

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<Arc<Client>> {
        let pg_config = build_pg_config(config)?;

        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
            OmniDbError::connection_failed(format!("Failed to connect to PostgreSQL: {}", pg_message(&e)))
        })?;

        // Connection errors are not logged to prevent credential leakage
        tokio::spawn(async move {
            let _ = connection.await;
        });

        Ok(Arc::new(client))
    }

    async fn probe(&self, client: &Arc<Client>) -> Result<Option<String>> {
        let row = client.query_one("SELECT version()", &[]).await.map_err(|e| {
            OmniDbError::connection_failed(format!("Failed to query PostgreSQL version: {}", pg_message(&e)))
        })?;
        let version: String = row.get(0);

        // "PostgreSQL 15.3 on x86_64..." -> "15.3"
        Ok(version.split_whitespace().nth(1).map(str::to_string))
    }

    async fn close(&self, client: Arc<Client>) {
        // The connection task exits once the last client clone is dropped
        drop(client);
    }

    async fn run(&self, client: &Arc<Client>, sql: &str, _category: QueryCategory) -> Result<QueryResult> {
        let statement = client.prepare(sql).await.map_err(|e| query_error(&e))?;

        if statement.columns().is_empty() {
            let affected = client.execute(&statement, &[]).await.map_err(|e| query_error(&e))?;
            return Ok(QueryResult::affected(affected));
        }

        let fields: Vec<String> = statement.columns().iter().map(|c| c.name().to_string()).collect();
        let rows = client.query(&statement, &[]).await.map_err(|e| query_error(&e))?;

        let mut data = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = Row::with_capacity(fields.len());
            for (idx, name) in fields.iter().enumerate() {
                record.insert(name.clone(), postgres_value_to_json(row, idx)?);
            }
            data.push(record);
        }

        Ok(QueryResult::rows(fields, data))
    }

    async fn begin(&self, client: &Arc<Client>) -> Result<Box<dyn Transaction>> {
        client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| OmniDbError::query_failed(format!("BEGIN failed: {}", pg_message(&e))))?;
        Ok(Box::new(PostgresTransaction { client: Arc::clone(client), finished: false }))
    }

    async fn list_databases(&self, client: &Arc<Client>) -> Result<Vec<String>> {
        let rows = client
            .query("SELECT datname::text FROM pg_database WHERE datistemplate = false ORDER BY datname", &[])
            .await
            .map_err(|e| engine_error(&e))?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn list_tables(&self, client: &Arc<Client>, database: Option<&str>) -> Result<Vec<String>> {
        let schema = database.unwrap_or(DEFAULT_SCHEMA);
        let rows = client
            .query(
                "SELECT table_name::text FROM information_schema.tables
                 WHERE table_schema = $1
                 ORDER BY table_name",
                &[&schema],
            )
            .await
            .map_err(|e| engine_error(&e))?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn describe_table(&self, client: &Arc<Client>, table: &str, database: Option<&str>) -> Result<TableSchema> {
        let schema = database.unwrap_or(DEFAULT_SCHEMA);

        let rows = client
            .query(
                "SELECT column_name::text, data_type::text, is_nullable::text, column_default::text
                 FROM information_schema.columns
                 WHERE table_schema = $1 AND table_name = $2
                 ORDER BY ordinal_position",
                &[&schema, &table],
            )
            .await
            .map_err(|e| engine_error(&e))?;

        if rows.is_empty() {
            return Err(OmniDbError::query_failed(format!("Table '{schema}.{table}' not found")));
        }

        let columns = rows
            .iter()
            .map(|row| {
                let nullable: String = row.get(2);
                let mut column = ColumnInfo::new(row.get::<_, String>(0), row.get::<_, String>(1), nullable == "YES");
                column.default = row.get(3);
                column
            })
            .collect();

        let key_rows = client
            .query(
                "SELECT tc.constraint_name::text, tc.constraint_type::text, kcu.column_name::text
                 FROM information_schema.table_constraints tc
                 JOIN information_schema.key_column_usage kcu
                   ON tc.constraint_name = kcu.constraint_name
                  AND tc.table_schema = kcu.table_schema
                  AND tc.table_name = kcu.table_name
                 WHERE tc.table_schema = $1 AND tc.table_name = $2
                   AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE')
                 ORDER BY tc.constraint_name, kcu.ordinal_position",
                &[&schema, &table],
            )
            .await
            .map_err(|e| engine_error(&e))?;

        let mut primary_keys = Vec::new();
        let mut unique: IndexMap<String, Vec<String>> = IndexMap::new();
        for row in &key_rows {
            let constraint: String = row.get(0);
            let kind: String = row.get(1);
            let column: String = row.get(2);
            if kind == "PRIMARY KEY" {
                primary_keys.push(column);
            } else {
                unique.entry(constraint).or_default().push(column);
            }
        }

        Ok(TableSchema::from_catalog(table, columns, primary_keys, unique.into_values().collect()))
    }
}

/// Read one nullable column value
fn get<'a, T: FromSql<'a>>(row: &'a PgRow, idx: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        OmniDbError::query_failed(format!("Failed to read column '{}': {e}", row.columns()[idx].name()))
    })
}

/// Convert `PostgreSQL` value to JSON value
fn postgres_value_to_json(row: &PgRow, idx: usize) -> Result<Value> {
    let col_type = row.columns()[idx].type_().clone();

    let value = match col_type {
        Type::BOOL => get::<bool>(row, idx)?.map(Value::Bool),

        Type::INT2 => get::<i16>(row, idx)?.map(Value::from),
        Type::INT4 => get::<i32>(row, idx)?.map(Value::from),
        Type::INT8 => get::<i64>(row, idx)?.map(Value::from),
        Type::OID => get::<u32>(row, idx)?.map(Value::from),

        // NaN and infinities have no JSON form
        Type::FLOAT4 => get::<f32>(row, idx)?
            .map(|v| serde_json::Number::from_f64(f64::from(v)).map_or(Value::Null, Value::Number)),
        Type::FLOAT8 => {
            get::<f64>(row, idx)?.map(|v| serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number))
        }

        Type::NUMERIC => get::<rust_decimal::Decimal>(row, idx)?.map(|v| Value::String(v.to_string())),

        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME => get::<String>(row, idx)?.map(Value::String),

        Type::JSON | Type::JSONB => get::<Value>(row, idx)?,

        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(|v| {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(v))
        }),

        Type::TIMESTAMP => get::<chrono::NaiveDateTime>(row, idx)?
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => {
            get::<chrono::DateTime<chrono::Utc>>(row, idx)?.map(|v| Value::String(v.to_rfc3339()))
        }
        Type::DATE => get::<chrono::NaiveDate>(row, idx)?.map(|v| Value::String(v.format("%Y-%m-%d").to_string())),
        Type::TIME => get::<chrono::NaiveTime>(row, idx)?.map(|v| Value::String(v.format("%H:%M:%S%.f").to_string())),

        Type::UUID => get::<uuid::Uuid>(row, idx)?.map(|v| Value::String(v.to_string())),

        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => {
            get::<Vec<Option<String>>>(row, idx)?.map(|items| items.into_iter().map(Value::from).collect())
        }
        Type::INT4_ARRAY => get::<Vec<Option<i32>>>(row, idx)?.map(|items| items.into_iter().map(Value::from).collect()),
        Type::INT8_ARRAY => get::<Vec<Option<i64>>>(row, idx)?.map(|items| items.into_iter().map(Value::from).collect()),

        // Text-compatible types read as text; anything else becomes a type placeholder
        ref other => match row.try_get::<_, Option<String>>(idx) {
            Ok(text) => text.map(Value::String),
            Err(_) => Some(Value::String(format!("<{}>", other.name()))),
        },
    };

    Ok(value.unwrap_or(Value::Null))
}

/// Transaction on the shared client
struct PostgresTransaction {
    client: Arc<Client>,
    finished: bool,
}

impl PostgresTransaction {
    async fn finish(&mut self, statement: &str) -> Result<()> {
        self.finished = true;
        self.client
            .batch_execute(statement)
            .await
            .map_err(|e| OmniDbError::query_failed(format!("{statement} failed: {}", pg_message(&e))))
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn execute(&mut self, statement: &str) -> Result<u64> {
        self.client.execute(statement, &[]).await.map_err(|e| query_error(&e))
    }

    async fn commit(&mut self) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let client = Arc::clone(&self.client);
            runtime.spawn(async move {
                let _ = client.batch_execute("ROLLBACK").await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sql::SqlDriver;
    use crate::driver::Driver;
    use crate::model::{Filter, FilterOperator, TableQueryOptions};
    use serde_json::json;

    fn live_config() -> ConnectionConfig {
        ConnectionConfig::postgres("localhost", 5432, "postgres", "postgres", "postgres").with_timeout(5000)
    }

    #[test]
    fn test_build_pg_config_defaults() {
        let mut config = ConnectionConfig::new(DatabaseType::Postgres);
        config.username = Some("app".into());
        let pg = build_pg_config(&config).unwrap();
        assert_eq!(pg.get_user(), Some("app"));
        assert_eq!(pg.get_dbname(), Some(DEFAULT_DATABASE));
        assert_eq!(pg.get_ports(), &[5432]);
        assert!(pg.get_password().is_none());
    }

    #[test]
    fn test_build_pg_config_requires_username() {
        let config = ConnectionConfig::new(DatabaseType::Postgres);
        assert!(build_pg_config(&config).is_err());
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn test_live_round_trip() {
        let driver = SqlDriver::new(PostgresEngine);
        let info = driver.connect(&live_config(), "pg").await.unwrap();
        assert!(info.server_version.is_some());

        driver.query("pg", "DROP TABLE IF EXISTS omnidb_people", None).await.unwrap();
        driver
            .query("pg", "CREATE TABLE omnidb_people (id SERIAL PRIMARY KEY, name TEXT UNIQUE, age INT)", None)
            .await
            .unwrap();
        driver
            .query("pg", "INSERT INTO omnidb_people (name, age) VALUES ('ann', 17), ('bob', 30)", None)
            .await
            .unwrap();

        let mut options = TableQueryOptions::new("omnidb_people");
        options.filters = vec![Filter::new("age", FilterOperator::Gte, 18)];
        options.limit = Some(10);
        let result = driver.query_table("pg", &options, None).await.unwrap();
        assert_eq!(result.total_rows, Some(1));
        assert_eq!(result.data.unwrap()[0]["name"], json!("bob"));

        let schema = driver.get_table_full_schema("pg", "omnidb_people", None).await.unwrap();
        assert_eq!(schema.primary_keys, vec!["id"]);
        assert_eq!(schema.unique_keys, vec![vec!["name".to_string()]]);

        driver.query("pg", "DROP TABLE omnidb_people", None).await.unwrap();
        driver.disconnect("pg").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL instance"]
    async fn test_live_wrong_password() {
        let driver = SqlDriver::new(PostgresEngine);
        let mut config = live_config();
        config.password = Some("definitely-wrong".into());
        let err = driver.connect(&config, "pg").await.unwrap_err();
        assert_eq!(err.error_code(), "CONNECTION_FAILED");
        assert!(driver.connection_ids().is_empty());
    }
}
