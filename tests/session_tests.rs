//! Session Manager Integration Tests
//!
//! End-to-end behaviour of the session layer against temporary `SQLite`
//! databases:
//! - Single active connection routing
//! - Read-only enforcement
//! - Bulk atomicity on a transactional backend
//! - Filter translation and pagination on fixture tables
//! - Connection listing across drivers

#![cfg(feature = "sqlite")]

use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use serde_json::json;

use omnidb::{
    BulkOperation, ConnectionConfig, DatabaseType, Filter, FilterOperator, QueryCategory, SessionManager, SortSpec,
    TableQueryOptions, ValueMap,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// Create a fresh database file with a `people` table of `rows` rows
///
/// Ages run 10, 11, 12, ... so `age >= 18` matches `rows - 8` rows.
fn create_fixture(rows: usize) -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let path = std::env::temp_dir().join(format!("omnidb_session_{}_{id}.db", std::process::id()));
    let _ = std::fs::remove_file(&path);

    let conn = rusqlite::Connection::open(&path).expect("Failed to create temp database");
    conn.execute_batch(
        "CREATE TABLE people (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT UNIQUE,
            age INTEGER
        )",
    )
    .expect("Failed to create table");
    for i in 0..rows {
        conn.execute(
            "INSERT INTO people (id, name, email, age) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![i as i64 + 1, format!("person{i}"), format!("p{i}@example.com"), i as i64 + 10],
        )
        .expect("Failed to insert");
    }
    path
}

fn cleanup(path: &Path) {
    let _ = std::fs::remove_file(path);
}

fn values(pairs: &[(&str, serde_json::Value)]) -> ValueMap {
    pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
}

async fn count(session: &SessionManager, id: &str, sql: &str) -> i64 {
    let result = session.query(id, sql, None).await;
    assert!(result.success, "{result:?}");
    result.data.unwrap()[0].values().next().unwrap().as_i64().unwrap()
}

// ============================================================================
// Single Active Connection
// ============================================================================

#[tokio::test]
async fn test_second_connect_replaces_active_connection() {
    let a = create_fixture(3);
    let b = create_fixture(5);
    let session = SessionManager::new();

    assert!(session.connect(&ConnectionConfig::sqlite(&a), "a").await.success);
    assert!(session.connect(&ConnectionConfig::sqlite(&b), "b").await.success);

    assert_eq!(session.get_active_connection().as_deref(), Some("b"));

    let stale = session.query("a", "SELECT COUNT(*) FROM people", None).await;
    assert!(!stale.success);
    assert!(stale.data.is_none());
    assert!(stale.error.unwrap().contains("a"));

    assert_eq!(count(&session, "b", "SELECT COUNT(*) FROM people").await, 5);

    // The previous connection was closed in its driver too
    assert_eq!(session.get_all_connections(), vec!["b".to_string()]);
    assert_eq!(session.get_connection_info("a").unwrap_err().error_code(), "CONNECTION_NOT_FOUND");

    session.cleanup().await;
    cleanup(&a);
    cleanup(&b);
}

#[tokio::test]
async fn test_concurrent_connects_leave_one_connection_open() {
    let a = create_fixture(1);
    let b = create_fixture(2);
    let session = SessionManager::new();

    let config_a = ConnectionConfig::sqlite(&a);
    let config_b = ConnectionConfig::sqlite(&b);
    let (ra, rb) = tokio::join!(session.connect(&config_a, "a"), session.connect(&config_b, "b"));
    assert!(ra.success);
    assert!(rb.success);

    let active = session.get_active_connection().expect("one connection must be active");
    assert_eq!(session.get_all_connections(), vec![active.clone()]);
    assert!(session.query(&active, "SELECT 1", None).await.success);

    session.cleanup().await;
    cleanup(&a);
    cleanup(&b);
}

#[tokio::test]
async fn test_all_connections_include_driver_level_connections() {
    let main = create_fixture(1);
    let side = create_fixture(1);
    let session = SessionManager::new();

    assert!(session.connect(&ConnectionConfig::sqlite(&main), "main").await.success);

    // Opened directly on the shared driver, bypassing the session
    let driver = session.factory().get_driver(DatabaseType::SQLite).unwrap();
    driver.connect(&ConnectionConfig::sqlite(&side), "side").await.unwrap();

    assert_eq!(session.get_all_connections(), vec!["main".to_string(), "side".to_string()]);
    assert_eq!(session.get_active_connection().as_deref(), Some("main"));

    // Listed, but not routable through the session
    let result = session.query("side", "SELECT 1", None).await;
    assert!(!result.success);

    session.cleanup().await;
    assert!(session.get_all_connections().is_empty());
    cleanup(&main);
    cleanup(&side);
}

#[tokio::test]
async fn test_connection_info_and_capabilities() {
    let path = create_fixture(1);
    let session = SessionManager::new();
    session.connect(&ConnectionConfig::sqlite(&path).read_only(true), "ro").await;

    let info = session.get_connection_info("ro").unwrap();
    assert_eq!(info.database_type, DatabaseType::SQLite);
    assert!(info.read_only);
    assert!(info.server_version.is_some());

    let caps = session.get_capabilities("ro").unwrap();
    assert!(caps.supports_transactions);
    assert!(session.supports_transactions("ro"));
    assert!(session.get_supported_database_types().contains(&DatabaseType::SQLite));

    session.cleanup().await;
    cleanup(&path);
}

// ============================================================================
// Read-only Enforcement
// ============================================================================

#[tokio::test]
async fn test_read_only_rejects_writes_and_leaves_table_unchanged() {
    let path = create_fixture(4);
    let session = SessionManager::new();
    session.connect(&ConnectionConfig::sqlite(&path).read_only(true), "ro").await;

    for sql in [
        "INSERT INTO people (name) VALUES ('x')",
        "UPDATE people SET age = 0",
        "DELETE FROM people",
        "DROP TABLE people",
        "CREATE TABLE other (id INTEGER)",
    ] {
        let result = session.query("ro", sql, None).await;
        assert!(!result.success, "{sql} should be rejected");
        assert_eq!(result.message, "Operation not allowed on a read-only connection", "{sql}");
    }

    let insert = session.insert_row("ro", "people", &values(&[("name", json!("x"))]), None).await;
    assert!(!insert.success);
    let update =
        session.update_row("ro", "people", &values(&[("id", json!(1))]), &values(&[("age", json!(1))]), None).await;
    assert!(!update.success);
    let delete = session.delete_row("ro", "people", &values(&[("id", json!(1))]), None).await;
    assert!(!delete.success);

    let bulk = session
        .execute_bulk_operations(
            "ro",
            &[BulkOperation::Delete { table: "people".into(), database: None, primary_key: values(&[("id", json!(1))]) }],
        )
        .await;
    assert!(!bulk.success);
    assert!(bulk.results.is_empty());

    assert!(session.begin_transaction("ro").await.is_err());

    // Reads and system statements still pass
    assert_eq!(count(&session, "ro", "SELECT COUNT(*) FROM people").await, 4);
    let explain = session.query("ro", "EXPLAIN QUERY PLAN SELECT * FROM people", None).await;
    assert!(explain.success, "{explain:?}");
    assert_eq!(explain.query_type, Some(QueryCategory::System));

    let ages = session.query("ro", "SELECT SUM(age) AS total FROM people", None).await;
    assert_eq!(ages.data.unwrap()[0]["total"], json!(10 + 11 + 12 + 13));

    session.cleanup().await;
    cleanup(&path);
}

// ============================================================================
// Row Operations
// ============================================================================

#[tokio::test]
async fn test_row_crud_round_trip() {
    let path = create_fixture(0);
    let session = SessionManager::new();
    session.connect(&ConnectionConfig::sqlite(&path), "rw").await;

    let insert = session
        .insert_row("rw", "people", &values(&[("id", json!(7)), ("name", json!("O'Brien")), ("age", json!(40))]), None)
        .await;
    assert!(insert.success, "{insert:?}");
    assert_eq!(insert.affected_rows, Some(1));
    assert!(insert.is_dml);

    let key = values(&[("id", json!(7))]);
    let update = session.update_row("rw", "people", &key, &values(&[("age", json!(41))]), None).await;
    assert_eq!(update.affected_rows, Some(1));

    let row = session.query("rw", "SELECT name, age FROM people WHERE id = 7", None).await;
    let data = row.data.unwrap();
    assert_eq!(data[0]["name"], json!("O'Brien"));
    assert_eq!(data[0]["age"], json!(41));

    let delete = session.delete_row("rw", "people", &key, None).await;
    assert_eq!(delete.affected_rows, Some(1));
    assert_eq!(count(&session, "rw", "SELECT COUNT(*) FROM people").await, 0);

    // Missing key or data is rejected before execution
    assert!(!session.update_row("rw", "people", &ValueMap::new(), &values(&[("age", json!(1))]), None).await.success);
    assert!(!session.insert_row("rw", "people", &ValueMap::new(), None).await.success);

    session.cleanup().await;
    cleanup(&path);
}

// ============================================================================
// Bulk Atomicity
// ============================================================================

#[tokio::test]
async fn test_bulk_failure_rolls_back_earlier_operations() {
    let path = create_fixture(2);
    let session = SessionManager::new();
    session.connect(&ConnectionConfig::sqlite(&path), "rw").await;

    let operations = vec![
        BulkOperation::Insert {
            table: "people".into(),
            database: None,
            data: values(&[("id", json!(100)), ("name", json!("new")), ("age", json!(50))]),
        },
        // Duplicate primary key
        BulkOperation::Insert {
            table: "people".into(),
            database: None,
            data: values(&[("id", json!(1)), ("name", json!("dup"))]),
        },
        BulkOperation::Delete { table: "people".into(), database: None, primary_key: values(&[("id", json!(2))]) },
    ];

    let result = session.execute_bulk_operations("rw", &operations).await;
    assert!(!result.success);
    assert!(result.transactional);
    assert_eq!(result.results.len(), 2);
    assert!(result.results[0].success);
    assert!(!result.results[1].success);
    assert!(result.error.unwrap().starts_with("Operation 2 failed"));

    // Operation 1 was undone, operation 3 never ran
    assert_eq!(count(&session, "rw", "SELECT COUNT(*) FROM people WHERE id = 100").await, 0);
    assert_eq!(count(&session, "rw", "SELECT COUNT(*) FROM people").await, 2);

    session.cleanup().await;
    cleanup(&path);
}

#[tokio::test]
async fn test_bulk_success_commits() {
    let path = create_fixture(2);
    let session = SessionManager::new();
    session.connect(&ConnectionConfig::sqlite(&path), "rw").await;

    let operations = vec![
        BulkOperation::Insert { table: "people".into(), database: None, data: values(&[("name", json!("c"))]) },
        BulkOperation::Update {
            table: "people".into(),
            database: None,
            primary_key: values(&[("id", json!(1))]),
            data: values(&[("age", json!(99))]),
        },
        BulkOperation::Delete { table: "people".into(), database: None, primary_key: values(&[("id", json!(2))]) },
    ];

    let result = session.execute_bulk_operations("rw", &operations).await;
    assert!(result.success, "{result:?}");
    assert!(result.transactional);
    assert_eq!(result.warning, None);
    assert_eq!(result.results.iter().map(|r| r.affected_rows).collect::<Vec<_>>(), vec![Some(1); 3]);

    assert_eq!(count(&session, "rw", "SELECT age FROM people WHERE id = 1").await, 99);
    assert_eq!(count(&session, "rw", "SELECT COUNT(*) FROM people").await, 2);

    session.cleanup().await;
    cleanup(&path);
}

// ============================================================================
// Filter Translation and Pagination
// ============================================================================

#[tokio::test]
async fn test_filter_matches_raw_where_clause() {
    let path = create_fixture(23);
    let session = SessionManager::new();
    session.connect(&ConnectionConfig::sqlite(&path), "f").await;

    let options = TableQueryOptions {
        filters: vec![Filter::new("age", FilterOperator::Gte, 18)],
        ..TableQueryOptions::new("people")
    };
    let filtered = session.query_table("f", &options, None).await;
    assert!(filtered.success, "{filtered:?}");

    let raw = count(&session, "f", "SELECT COUNT(*) FROM people WHERE age >= 18").await;
    assert_eq!(filtered.row_count() as i64, raw);
    assert_eq!(raw, 15);

    // Unpaginated reads carry no totals
    assert_eq!(filtered.total_rows, None);
    assert_eq!(filtered.has_more, None);

    session.cleanup().await;
    cleanup(&path);
}

#[tokio::test]
async fn test_pagination_totals() {
    let path = create_fixture(23);
    let session = SessionManager::new();
    session.connect(&ConnectionConfig::sqlite(&path), "p").await;

    let page = |limit, offset| TableQueryOptions {
        order_by: vec![SortSpec::asc("id")],
        limit: Some(limit),
        offset: Some(offset),
        ..TableQueryOptions::new("people")
    };

    let middle = session.query_table("p", &page(10, 5), None).await;
    assert_eq!(middle.row_count(), 10);
    assert_eq!(middle.total_rows, Some(23));
    assert_eq!(middle.has_more, Some(true));
    assert_eq!(middle.data.as_ref().unwrap()[0]["id"], json!(6));

    let last = session.query_table("p", &page(10, 20), None).await;
    assert_eq!(last.row_count(), 3);
    assert_eq!(last.total_rows, Some(23));
    assert_eq!(last.has_more, Some(false));

    // Offset without limit
    let tail = session
        .query_table(
            "p",
            &TableQueryOptions { offset: Some(21), ..TableQueryOptions::new("people") },
            None,
        )
        .await;
    assert_eq!(tail.row_count(), 2);
    assert_eq!(tail.has_more, Some(false));

    session.cleanup().await;
    cleanup(&path);
}

#[tokio::test]
async fn test_combined_filters_and_sort() {
    let path = create_fixture(23);
    let session = SessionManager::new();
    session.connect(&ConnectionConfig::sqlite(&path), "c").await;

    let options = TableQueryOptions {
        filters: vec![
            Filter::new("age", FilterOperator::Between, json!([20, 25])),
            Filter::new("name", FilterOperator::NotLike, "person1"),
            Filter::null_check("email", FilterOperator::IsNotNull),
        ],
        order_by: vec![SortSpec::desc("age")],
        ..TableQueryOptions::new("people")
    };
    let result = session.query_table("c", &options, None).await;
    assert!(result.success, "{result:?}");

    // Ages 20..=25 are person10..person15, all containing "person1"
    assert_eq!(result.row_count(), 0);

    let options = TableQueryOptions {
        filters: vec![Filter::new("id", FilterOperator::In, json!([3, 1, 2]))],
        order_by: vec![SortSpec::desc("id")],
        ..TableQueryOptions::new("people")
    };
    let result = session.query_table("c", &options, None).await;
    let ids: Vec<_> = result.data.unwrap().iter().map(|r| r["id"].clone()).collect();
    assert_eq!(ids, vec![json!(3), json!(2), json!(1)]);

    // Malformed filters never reach the database
    let bad = TableQueryOptions {
        filters: vec![Filter::new("id", FilterOperator::In, json!([]))],
        ..TableQueryOptions::new("people")
    };
    let result = session.query_table("c", &bad, None).await;
    assert!(!result.success);
    assert_eq!(result.message, "Invalid request");

    session.cleanup().await;
    cleanup(&path);
}

// ============================================================================
// Metadata
// ============================================================================

#[tokio::test]
async fn test_metadata_calls() {
    let path = create_fixture(1);
    let session = SessionManager::new();
    session.connect(&ConnectionConfig::sqlite(&path), "m").await;

    assert!(session.get_databases("m").await.unwrap().contains(&"main".to_string()));
    assert_eq!(session.get_tables("m", None).await.unwrap(), vec!["people".to_string()]);

    let columns = session.get_table_schema("m", "people", None).await.unwrap();
    let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name", "email", "age"]);

    let schema = session.get_table_full_schema("m", "people", None).await.unwrap();
    assert_eq!(schema.primary_keys, vec!["id"]);
    assert_eq!(schema.unique_keys, vec![vec!["email".to_string()]]);
    assert!(!schema.inferred);

    assert_eq!(session.get_primary_keys("m", "people", None).await.unwrap(), vec!["id"]);
    assert!(session.get_table_full_schema("m", "missing", None).await.is_err());

    session.cleanup().await;
    cleanup(&path);
}
