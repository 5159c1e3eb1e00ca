//! `MongoDB` Driver Implementation
//!
//! This module implements [`Driver`] for `MongoDB` using the official async
//! client.
//!
//! # Features
//! - Connection strings or host/port/credential configs
//! - Closed command language (see [`command`]) for raw queries
//! - Filtered, sorted, paginated collection reads
//! - Schema inference from sampled documents
//! - Cooperative query cancellation by session id
//!
//! # Implementation Notes
//! - Collections are exposed as tables; the "database" argument selects the
//!   `MongoDB` database and defaults to the one the connection was opened on
//! - Result rows carry the union of document keys with `_id` first; missing
//!   fields are filled with `null`
//! - There are no multi-statement transactions; bulk writes run sequentially

pub mod command;
pub mod convert;
pub mod schema;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use indexmap::IndexSet;
use mongodb::bson::{doc, Document};
use mongodb::options::{ClientOptions, Credential, ServerAddress, Tls, TlsOptions};
use mongodb::{Client, Collection, Database};
use serde_json::Value;
use tracing::debug;

use crate::capability::{ensure_read_only, QueryCategory};
use crate::config::ConnectionConfig;
use crate::driver::{elapsed_ms, with_timeout, DatabaseType, Driver};
use crate::error::{OmniDbError, Result};
use crate::filter::document::{build_filter, build_sort};
use crate::model::{ConnectionInfo, Filter, FilterOperator, QueryResult, Row, TableQueryOptions, TableSchema, ValueMap};
use crate::registry::{CancellationRegistry, ConnectionRegistry, Lease, RegistryEntry};

use self::command::{CommandOp, MongoCommand};
use self::convert::{bson_to_json, json_to_document};

/// Database used when neither the config nor the URI names one
const FALLBACK_DATABASE: &str = "test";

/// Live client plus the database it was opened on
#[derive(Debug, Clone)]
pub struct MongoHandle {
    pub client: Client,
    pub database: String,
}

impl MongoHandle {
    fn database(&self, name: Option<&str>) -> Database {
        self.client.database(name.filter(|n| !n.is_empty()).unwrap_or(&self.database))
    }

    fn collection(&self, name: &str, database: Option<&str>) -> Collection<Document> {
        self.database(database).collection::<Document>(name)
    }
}

fn query_error(e: mongodb::error::Error) -> OmniDbError {
    OmniDbError::query_failed(e.to_string())
}

fn engine_error(e: mongodb::error::Error) -> OmniDbError {
    OmniDbError::engine_error("mongodb", e.to_string())
}

/// Build client options from a config
async fn client_options(config: &ConnectionConfig) -> Result<ClientOptions> {
    let mut options = match &config.uri {
        Some(uri) => ClientOptions::parse(uri)
            .await
            .map_err(|e| OmniDbError::connection_failed(format!("Invalid MongoDB connection string: {e}")))?,
        None => {
            let mut options = ClientOptions::default();
            options.hosts = vec![ServerAddress::Tcp {
                host: config.effective_host().to_string(),
                port: config.effective_port(),
            }];
            if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
                let mut credential = Credential::default();
                credential.username = Some(username.to_string());
                credential.password = config.password.clone();
                credential.source = config.auth_source.clone();
                options.credential = Some(credential);
            }
            options
        }
    };

    if config.tls.unwrap_or(false) || config.secure {
        options.tls = Some(Tls::Enabled(TlsOptions::default()));
    }
    if let Some(timeout) = config.timeout_duration() {
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);
    }
    options.app_name = Some("omnidb".to_string());
    Ok(options)
}

/// Rows from documents: union of keys, `_id` first, gaps filled with null
fn documents_to_result(documents: &[Document]) -> QueryResult {
    let mut fields: IndexSet<String> = IndexSet::new();
    if documents.iter().any(|d| d.contains_key("_id")) {
        fields.insert("_id".to_string());
    }
    for doc in documents {
        fields.extend(doc.keys().cloned());
    }

    let rows = documents
        .iter()
        .map(|doc| {
            fields
                .iter()
                .map(|field| (field.clone(), doc.get(field).map_or(Value::Null, bson_to_json)))
                .collect::<Row>()
        })
        .collect();

    QueryResult::rows(fields.into_iter().collect(), rows)
}

/// Single-column rows
fn column_result(field: &str, values: impl IntoIterator<Item = Value>) -> QueryResult {
    let rows = values.into_iter().map(|value| Row::from_iter([(field.to_string(), value)])).collect();
    QueryResult::rows(vec![field.to_string()], rows)
}

/// Equality filter on every primary key column
fn key_filter(primary_key: &ValueMap) -> Result<Document> {
    if primary_key.is_empty() {
        return Err(OmniDbError::invalid_input("Primary key cannot be empty"));
    }
    let filters: Vec<Filter> =
        primary_key.iter().map(|(column, value)| Filter::new(column.clone(), FilterOperator::Eq, value.clone())).collect();
    build_filter(&filters)
}

fn row_document(data: &ValueMap) -> Result<Document> {
    json_to_document(&Value::Object(data.iter().map(|(k, v)| (k.clone(), v.clone())).collect()))
}

/// Run a parsed command against a handle
async fn execute_command(handle: &MongoHandle, command: MongoCommand) -> Result<QueryResult> {
    let db = handle.database(None);
    let target = command.collection.as_deref().map(|name| db.collection::<Document>(name));
    let collection =
        || target.as_ref().ok_or_else(|| OmniDbError::invalid_input("Command requires a collection"));

    Ok(match command.op {
        CommandOp::Find { ref filter, ref projection, ref sort, limit, skip } => {
            let mut find = collection()?.find(filter.clone());
            if let Some(projection) = projection {
                find = find.projection(projection.clone());
            }
            if let Some(sort) = sort {
                find = find.sort(sort.clone());
            }
            if let Some(limit) = limit {
                find = find.limit(limit);
            }
            if let Some(skip) = skip {
                find = find.skip(skip);
            }
            let docs: Vec<Document> = find.await.map_err(query_error)?.try_collect().await.map_err(query_error)?;
            documents_to_result(&docs)
        }
        CommandOp::FindOne { ref filter, ref projection } => {
            let mut find = collection()?.find_one(filter.clone());
            if let Some(projection) = projection {
                find = find.projection(projection.clone());
            }
            let docs: Vec<Document> = find.await.map_err(query_error)?.into_iter().collect();
            documents_to_result(&docs)
        }
        CommandOp::Aggregate { ref pipeline } => {
            let cursor = collection()?.aggregate(pipeline.clone()).await.map_err(query_error)?;
            let docs: Vec<Document> = cursor.try_collect().await.map_err(query_error)?;
            documents_to_result(&docs)
        }
        CommandOp::CountDocuments { ref filter } => {
            let count = collection()?.count_documents(filter.clone()).await.map_err(query_error)?;
            column_result("count", [Value::from(count)])
        }
        CommandOp::Distinct { ref field, ref filter } => {
            let values = collection()?.distinct(field.as_str(), filter.clone()).await.map_err(query_error)?;
            column_result(field, values.iter().map(bson_to_json))
        }
        CommandOp::GetCollectionNames => {
            let mut names = db.list_collection_names().await.map_err(query_error)?;
            names.sort();
            column_result("name", names.into_iter().map(Value::String))
        }
        CommandOp::InsertOne { ref document } => {
            let inserted = collection()?.insert_one(document.clone()).await.map_err(query_error)?;
            QueryResult::affected(1).with_message(format!("Inserted document {}", bson_to_json(&inserted.inserted_id)))
        }
        CommandOp::InsertMany { ref documents } => {
            let inserted = collection()?.insert_many(documents.clone()).await.map_err(query_error)?;
            QueryResult::affected(inserted.inserted_ids.len() as u64)
        }
        CommandOp::UpdateOne { ref filter, ref update } => {
            let updated = collection()?.update_one(filter.clone(), update.clone()).await.map_err(query_error)?;
            QueryResult::affected(updated.modified_count)
        }
        CommandOp::UpdateMany { ref filter, ref update } => {
            let updated = collection()?.update_many(filter.clone(), update.clone()).await.map_err(query_error)?;
            QueryResult::affected(updated.modified_count)
        }
        CommandOp::DeleteOne { ref filter } => {
            let deleted = collection()?.delete_one(filter.clone()).await.map_err(query_error)?;
            QueryResult::affected(deleted.deleted_count)
        }
        CommandOp::DeleteMany { ref filter } => {
            let deleted = collection()?.delete_many(filter.clone()).await.map_err(query_error)?;
            QueryResult::affected(deleted.deleted_count)
        }
        CommandOp::Drop => {
            collection()?.drop().await.map_err(query_error)?;
            QueryResult::affected(0).with_message("Collection dropped")
        }
        CommandOp::CreateCollection => {
            let name = command.collection.as_deref().unwrap_or_default();
            db.create_collection(name).await.map_err(query_error)?;
            QueryResult::affected(0).with_message(format!("Collection '{name}' created"))
        }
    })
}

/// `MongoDB` driver
#[derive(Default)]
pub struct MongoDriver {
    registry: ConnectionRegistry<MongoHandle>,
    cancels: Arc<CancellationRegistry>,
}

impl MongoDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lease(&self, connection_id: &str) -> Result<Lease<MongoHandle>> {
        self.registry.lease(connection_id)
    }

    fn writable_lease(&self, connection_id: &str, category: QueryCategory) -> Result<Lease<MongoHandle>> {
        let lease = self.lease(connection_id)?;
        if lease.read_only {
            ensure_read_only(category)?;
        }
        Ok(lease)
    }
}

#[async_trait]
impl Driver for MongoDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MongoDb
    }

    async fn connect(&self, config: &ConnectionConfig, connection_id: &str) -> Result<ConnectionInfo> {
        if self.registry.contains(connection_id) {
            return self.registry.info(connection_id);
        }
        if config.database_type != DatabaseType::MongoDb {
            return Err(OmniDbError::invalid_input(format!(
                "Expected mongodb configuration, got {}",
                config.database_type
            )));
        }

        config.validate()?;
        let mut config = config.clone();
        config.resolve_password()?;
        let timeout = config.timeout_duration();

        debug!(connection_id, "opening MongoDB client");
        let options = with_timeout(timeout, client_options(&config)).await?;
        let database = config
            .database
            .clone()
            .filter(|d| !d.is_empty())
            .or_else(|| options.default_database.clone())
            .unwrap_or_else(|| FALLBACK_DATABASE.to_string());

        let client = Client::with_options(options)
            .map_err(|e| OmniDbError::connection_failed(format!("Failed to create MongoDB client: {e}")))?;
        let handle = MongoHandle { client, database };

        let probe = async {
            let admin = handle.client.database("admin");
            admin.run_command(doc! { "ping": 1 }).await.map_err(|e| OmniDbError::connection_failed(e.to_string()))?;
            let info = admin.run_command(doc! { "buildInfo": 1 }).await.ok();
            Ok(info.and_then(|i| i.get_str("version").ok().map(str::to_string)))
        };
        let version = match with_timeout(timeout, probe).await {
            Ok(version) => version,
            Err(err) => {
                handle.client.shutdown().await;
                return Err(match err {
                    OmniDbError::Timeout(_) => err,
                    other => OmniDbError::connection_failed(format!("Failed to reach MongoDB: {}", other.message())),
                });
            }
        };

        if let Some(previous) = self.registry.insert(connection_id, RegistryEntry::new(handle, config, version)) {
            previous.handle.client.shutdown().await;
        }
        debug!(connection_id, "connection registered");
        self.registry.info(connection_id)
    }

    async fn disconnect(&self, connection_id: &str) -> Result<()> {
        let entry = self.registry.remove(connection_id)?;
        entry.handle.client.shutdown().await;
        debug!(connection_id, "connection closed");
        Ok(())
    }

    async fn query(&self, connection_id: &str, query: &str, session_id: Option<&str>) -> Result<QueryResult> {
        let lease = self.lease(connection_id)?;
        let command = MongoCommand::parse(query)?;
        let category = command.category();
        if lease.read_only {
            ensure_read_only(category)?;
        }

        debug!(connection_id, method = command.op.method(), %category, "executing command");
        let start = Instant::now();
        let run = with_timeout(lease.timeout, execute_command(&lease.handle, command));

        let result = match session_id {
            Some(session_id) => {
                let token = self.cancels.register(session_id)?;
                let outcome = tokio::select! {
                    result = run => result,
                    () = token.notified() => Err(OmniDbError::cancelled(format!("Query '{session_id}' was cancelled"))),
                };
                self.cancels.release(session_id, &token);
                outcome
            }
            None => run.await,
        }?;

        Ok(result.with_category(category).with_elapsed(elapsed_ms(start)))
    }

    async fn query_table(
        &self,
        connection_id: &str,
        options: &TableQueryOptions,
        _session_id: Option<&str>,
    ) -> Result<QueryResult> {
        if options.table.trim().is_empty() {
            return Err(OmniDbError::invalid_input("Collection name cannot be empty"));
        }
        let lease = self.lease(connection_id)?;
        let filter = build_filter(&options.filters)?;
        let collection = lease.handle.collection(&options.table, options.database.as_deref());

        let start = Instant::now();
        let read = async {
            let mut find = collection.find(filter.clone());
            if !options.order_by.is_empty() {
                find = find.sort(build_sort(&options.order_by));
            }
            if let Some(offset) = options.offset.filter(|o| *o > 0) {
                find = find.skip(offset);
            }
            if let Some(limit) = options.limit {
                find = find.limit(i64::try_from(limit).unwrap_or(i64::MAX));
            }
            let docs: Vec<Document> = find.await.map_err(query_error)?.try_collect().await.map_err(query_error)?;
            let mut result = documents_to_result(&docs);

            if options.is_paginated() {
                let total = collection.count_documents(filter.clone()).await.map_err(query_error)?;
                result = result.with_total(total, options.offset.unwrap_or(0));
            }
            Ok(result)
        };

        let result = with_timeout(lease.timeout, read).await?;
        Ok(result.with_category(QueryCategory::Read).with_elapsed(elapsed_ms(start)))
    }

    async fn insert_row(
        &self,
        connection_id: &str,
        table: &str,
        data: &ValueMap,
        database: Option<&str>,
    ) -> Result<QueryResult> {
        let lease = self.writable_lease(connection_id, QueryCategory::Insert)?;
        if data.is_empty() {
            return Err(OmniDbError::invalid_input("Insert data cannot be empty"));
        }
        let document = row_document(data)?;
        let collection = lease.handle.collection(table, database);

        let start = Instant::now();
        let inserted = with_timeout(lease.timeout, async {
            collection.insert_one(document).await.map_err(query_error)
        })
        .await?;

        Ok(QueryResult::affected(1)
            .with_message(format!("Inserted document {}", bson_to_json(&inserted.inserted_id)))
            .with_category(QueryCategory::Insert)
            .with_elapsed(elapsed_ms(start)))
    }

    async fn update_row(
        &self,
        connection_id: &str,
        table: &str,
        primary_key: &ValueMap,
        data: &ValueMap,
        database: Option<&str>,
    ) -> Result<QueryResult> {
        let lease = self.writable_lease(connection_id, QueryCategory::Update)?;
        if data.is_empty() {
            return Err(OmniDbError::invalid_input("Update data cannot be empty"));
        }
        let filter = key_filter(primary_key)?;
        let update = doc! { "$set": row_document(data)? };
        let collection = lease.handle.collection(table, database);

        let start = Instant::now();
        let updated =
            with_timeout(lease.timeout, async { collection.update_one(filter, update).await.map_err(query_error) })
                .await?;

        Ok(QueryResult::affected(updated.matched_count)
            .with_category(QueryCategory::Update)
            .with_elapsed(elapsed_ms(start)))
    }

    async fn delete_row(
        &self,
        connection_id: &str,
        table: &str,
        primary_key: &ValueMap,
        database: Option<&str>,
    ) -> Result<QueryResult> {
        let lease = self.writable_lease(connection_id, QueryCategory::Delete)?;
        let filter = key_filter(primary_key)?;
        let collection = lease.handle.collection(table, database);

        let start = Instant::now();
        let deleted =
            with_timeout(lease.timeout, async { collection.delete_one(filter).await.map_err(query_error) }).await?;

        Ok(QueryResult::affected(deleted.deleted_count)
            .with_category(QueryCategory::Delete)
            .with_elapsed(elapsed_ms(start)))
    }

    async fn get_databases(&self, connection_id: &str) -> Result<Vec<String>> {
        let lease = self.lease(connection_id)?;
        let mut names = with_timeout(lease.timeout, async {
            lease.handle.client.list_database_names().await.map_err(engine_error)
        })
        .await?;
        names.sort();
        Ok(names)
    }

    async fn get_tables(&self, connection_id: &str, database: Option<&str>) -> Result<Vec<String>> {
        let lease = self.lease(connection_id)?;
        let db = lease.handle.database(database);
        let mut names =
            with_timeout(lease.timeout, async { db.list_collection_names().await.map_err(engine_error) }).await?;
        names.sort();
        Ok(names)
    }

    async fn get_table_full_schema(
        &self,
        connection_id: &str,
        table: &str,
        database: Option<&str>,
    ) -> Result<TableSchema> {
        if table.trim().is_empty() {
            return Err(OmniDbError::invalid_input("Collection name cannot be empty"));
        }
        let lease = self.lease(connection_id)?;
        let collection = lease.handle.collection(table, database);

        let sample = async {
            let cursor = collection.find(Document::new()).limit(schema::SAMPLE_SIZE).await.map_err(engine_error)?;
            cursor.try_collect::<Vec<Document>>().await.map_err(engine_error)
        };
        let docs = with_timeout(lease.timeout, sample).await?;
        Ok(schema::infer_schema(table, &docs))
    }

    async fn cancel_query(&self, connection_id: &str, query_id: &str) -> Result<()> {
        self.lease(connection_id)?;
        self.cancels.cancel(query_id)?;
        debug!(connection_id, query_id, "cancellation requested");
        Ok(())
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
            entry.handle.client.shutdown().await;
        }
    }
}
