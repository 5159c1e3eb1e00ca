//! `ClickHouse` Engine Implementation
//!
//! This module implements [`SqlEngine`] for `ClickHouse` over its HTTP(S)
//! interface.
//!
//! # Implementation Notes
//! - Row-returning statements are fetched as `JSONCompact` and decoded with
//!   the column names from its `meta` block
//! - The client treats `?` as a bind placeholder, so literal question marks
//!   in raw statements are escaped as `??`
//! - `Int64` / `UInt64` values (quoted by `ClickHouse` JSON output) are turned
//!   back into numbers when they fit
//! - Row updates and deletes are `ALTER TABLE ... UPDATE/DELETE` mutations;
//!   there are no transactions and no affected-row counts
//! - The timeout is also sent as the `max_execution_time` setting

use async_trait::async_trait;
use clickhouse::{Client, Row as ChRow};
use serde::Deserialize;
use serde_json::Value;

use crate::capability::QueryCategory;
use crate::config::ConnectionConfig;
use crate::driver::sql::SqlEngine;
use crate::driver::DatabaseType;
use crate::error::{OmniDbError, Result};
use crate::filter::sql::SqlDialect;
use crate::model::{ColumnInfo, QueryResult, Row, TableSchema};

/// `ClickHouse` engine
#[derive(Debug, Default, Clone, Copy)]
pub struct ClickHouseEngine;

fn query_error(e: clickhouse::error::Error) -> OmniDbError {
    OmniDbError::query_failed(e.to_string())
}

fn engine_error(e: clickhouse::error::Error) -> OmniDbError {
    OmniDbError::engine_error("clickhouse", e.to_string())
}

/// Escape literal `?` so the client does not treat it as a placeholder
fn escape_placeholders(sql: &str) -> String {
    sql.replace('?', "??")
}

/// Build the HTTP client
fn build_client(config: &ConnectionConfig) -> Client {
    let scheme = if config.secure { "https" } else { "http" };
    let url = format!("{scheme}://{}:{}", config.effective_host(), config.effective_port().unwrap_or(8123));

    let mut client = Client::default()
        .with_url(url)
        .with_user(config.username.as_deref().unwrap_or("default"))
        .with_password(config.password.as_deref().unwrap_or_default());

    if let Some(database) = &config.database {
        client = client.with_database(database);
    }
    if let Some(timeout_ms) = config.timeout {
        client = client.with_option("max_execution_time", timeout_ms.div_ceil(1000).to_string());
    }
    client
}

#[derive(Debug, Deserialize, ChRow)]
struct ColumnRow {
    name: String,
    #[serde(rename = "type")]
    data_type: String,
    default_expression: String,
    is_in_primary_key: u8,
}

/// `JSONCompact` response body
#[derive(Debug, Deserialize)]
struct CompactResponse {
    meta: Vec<CompactColumn>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct CompactColumn {
    name: String,
    #[serde(rename = "type")]
    data_type: String,
}

/// Strip `Nullable(...)` / `LowCardinality(...)` wrappers
fn base_type(data_type: &str) -> &str {
    let mut current = data_type;
    while let Some(inner) = ["Nullable(", "LowCardinality("]
        .iter()
        .find_map(|wrapper| current.strip_prefix(wrapper).and_then(|s| s.strip_suffix(')')))
    {
        current = inner;
    }
    current
}

fn decode_value(value: Value, data_type: &str) -> Value {
    let Value::String(text) = &value else {
        return value;
    };
    let parsed = match base_type(data_type) {
        "Int64" => text.parse::<i64>().ok().map(Value::from),
        "UInt64" => text.parse::<u64>().ok().map(Value::from),
        _ => None,
    };
    parsed.unwrap_or(value)
}

/// Decode a `JSONCompact` body into a row result
/// Whether a statement is read back as `JSONCompact`
///
/// Only writes and DDL skip the output format; unclassified statements
/// (leading comments, `EXISTS`, `CHECK TABLE`) may still produce rows.
const fn fetches_rows(category: QueryCategory) -> bool {
    !(category.is_dml() || category.is_ddl())
}

fn decode_compact(body: &[u8]) -> Result<QueryResult> {
    let response: CompactResponse = serde_json::from_slice(body)
        .map_err(|e| OmniDbError::query_failed(format!("Invalid ClickHouse response: {e}")))?;

    let fields: Vec<String> = response.meta.iter().map(|c| c.name.clone()).collect();
    let data = response
        .data
        .into_iter()
        .map(|values| {
            response
                .meta
                .iter()
                .zip(values)
                .map(|(column, value)| (column.name.clone(), decode_value(value, &column.data_type)))
                .collect::<Row>()
        })
        .collect();

    Ok(QueryResult::rows(fields, data))
}

#[async_trait]
impl SqlEngine for ClickHouseEngine {
    type Handle = Client;

    fn database_type(&self) -> DatabaseType {
        DatabaseType::ClickHouse
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::ClickHouse
    }

    async fn open(&self, config: &ConnectionConfig) -> Result<Client> {
        Ok(build_client(config))
    }

    async fn probe(&self, client: &Client) -> Result<Option<String>> {
        client
            .query("SELECT version()")
            .fetch_one::<String>()
            .await
            .map(Some)
            .map_err(|e| OmniDbError::connection_failed(format!("Failed to reach ClickHouse: {e}")))
    }

    async fn close(&self, client: Client) {
        // HTTP client; nothing to release beyond the pooled sockets
        drop(client);
    }

    async fn run(&self, client: &Client, sql: &str, category: QueryCategory) -> Result<QueryResult> {
        let sql = escape_placeholders(sql);

        if !fetches_rows(category) {
            client.query(&sql).execute().await.map_err(query_error)?;
            return Ok(QueryResult::affected(0));
        }

        let mut cursor = client.query(&sql).fetch_bytes("JSONCompact").map_err(query_error)?;
        let mut body = Vec::new();
        while let Some(chunk) = cursor.next().await.map_err(query_error)? {
            body.extend_from_slice(&chunk);
        }
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(QueryResult::affected(0));
        }
        decode_compact(&body)
    }

    async fn list_databases(&self, client: &Client) -> Result<Vec<String>> {
        client.query("SELECT name FROM system.databases ORDER BY name").fetch_all::<String>().await.map_err(engine_error)
    }

    async fn list_tables(&self, client: &Client, database: Option<&str>) -> Result<Vec<String>> {
        let query = match database {
            Some(db) => client.query("SELECT name FROM system.tables WHERE database = ? ORDER BY name").bind(db),
            None => client.query("SELECT name FROM system.tables WHERE database = currentDatabase() ORDER BY name"),
        };
        query.fetch_all::<String>().await.map_err(engine_error)
    }

    async fn describe_table(&self, client: &Client, table: &str, database: Option<&str>) -> Result<TableSchema> {
        let query = match database {
            Some(db) => client
                .query(
                    "SELECT name, type, default_expression, is_in_primary_key FROM system.columns
                     WHERE database = ? AND table = ? ORDER BY position",
                )
                .bind(db)
                .bind(table),
            None => client
                .query(
                    "SELECT name, type, default_expression, is_in_primary_key FROM system.columns
                     WHERE database = currentDatabase() AND table = ? ORDER BY position",
                )
                .bind(table),
        };
        let rows = query.fetch_all::<ColumnRow>().await.map_err(engine_error)?;

        if rows.is_empty() {
            return Err(OmniDbError::query_failed(format!("Table '{table}' not found")));
        }

        let mut primary_keys = Vec::new();
        let columns = rows
            .into_iter()
            .map(|row| {
                if row.is_in_primary_key != 0 {
                    primary_keys.push(row.name.clone());
                }
                let nullable = row.data_type.starts_with("Nullable(");
                let mut column = ColumnInfo::new(row.name, row.data_type, nullable);
                column.default = Some(row.default_expression).filter(|d| !d.is_empty());
                column
            })
            .collect();

        Ok(TableSchema::from_catalog(table, columns, primary_keys, Vec::new()))
    }
}
