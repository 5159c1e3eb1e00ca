//! Query Execution Performance Benchmarks
//!
//! End-to-end timings through [`SessionManager`] on `SQLite`:
//! - Raw SELECT with and without a WHERE clause
//! - Paginated table reads (page + total count)
//! - Large result set conversion to JSON rows
//! - Bulk operations inside one transaction

use criterion::{black_box, criterion_group, criterion_main, Criterion};

#[cfg(feature = "sqlite")]
use omnidb::{BulkOperation, ConnectionConfig, Filter, FilterOperator, SessionManager, SortSpec, TableQueryOptions};

#[cfg(feature = "sqlite")]
fn setup(name: &str, rows: usize) -> (tokio::runtime::Runtime, SessionManager, std::path::PathBuf) {
    let temp_file = std::env::temp_dir().join(format!("omnidb_bench_{name}.db"));
    let _ = std::fs::remove_file(&temp_file);

    {
        let mut conn = rusqlite::Connection::open(&temp_file).expect("Failed to create database");
        conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)", [])
            .expect("Failed to create table");
        let tx = conn.transaction().expect("Failed to begin");
        for i in 1..=rows {
            tx.execute("INSERT INTO users (name, age) VALUES (?1, ?2)", rusqlite::params![format!("User {i}"), i % 100])
                .expect("Failed to insert");
        }
        tx.commit().expect("Failed to commit");
    }

    let runtime = tokio::runtime::Runtime::new().expect("Failed to start runtime");
    let session = SessionManager::new();
    let connected = runtime.block_on(session.connect(&ConnectionConfig::sqlite(&temp_file), "bench"));
    assert!(connected.success);
    (runtime, session, temp_file)
}

#[cfg(feature = "sqlite")]
fn teardown(runtime: &tokio::runtime::Runtime, session: &SessionManager, path: &std::path::Path) {
    runtime.block_on(session.cleanup());
    let _ = std::fs::remove_file(path);
}

#[cfg(feature = "sqlite")]
fn bench_sqlite_select(c: &mut Criterion) {
    let (runtime, session, path) = setup("select", 1000);

    c.bench_function("sqlite_select_all", |b| {
        b.iter(|| {
            let result = runtime.block_on(session.query("bench", black_box("SELECT * FROM users"), None));
            assert!(result.success);
            result
        });
    });

    c.bench_function("sqlite_select_where", |b| {
        b.iter(|| {
            let result = runtime.block_on(session.query("bench", black_box("SELECT * FROM users WHERE age > 50"), None));
            assert!(result.success);
            result
        });
    });

    teardown(&runtime, &session, &path);
}

#[cfg(feature = "sqlite")]
fn bench_sqlite_paginated_read(c: &mut Criterion) {
    let (runtime, session, path) = setup("paginated", 10_000);
    let options = TableQueryOptions {
        filters: vec![Filter::new("age", FilterOperator::Gte, 18)],
        order_by: vec![SortSpec::desc("id")],
        limit: Some(50),
        offset: Some(500),
        ..TableQueryOptions::new("users")
    };

    c.bench_function("sqlite_query_table_page", |b| {
        b.iter(|| {
            let result = runtime.block_on(session.query_table("bench", black_box(&options), None));
            assert_eq!(result.row_count(), 50);
            result
        });
    });

    c.bench_function("sqlite_select_10000_rows", |b| {
        b.iter(|| {
            let result = runtime.block_on(session.query("bench", black_box("SELECT * FROM users"), None));
            assert_eq!(result.row_count(), 10_000);
            result
        });
    });

    teardown(&runtime, &session, &path);
}

#[cfg(feature = "sqlite")]
fn bench_sqlite_bulk(c: &mut Criterion) {
    let (runtime, session, path) = setup("bulk", 0);
    let operations: Vec<BulkOperation> = (0..100)
        .map(|i| BulkOperation::Insert {
            table: "users".into(),
            database: None,
            data: [("name".to_string(), serde_json::json!(format!("Bulk {i}")))].into_iter().collect(),
        })
        .collect();

    c.bench_function("sqlite_bulk_insert_100", |b| {
        b.iter(|| {
            let result = runtime.block_on(session.execute_bulk_operations("bench", black_box(&operations)));
            assert!(result.success);
            result
        });
    });

    teardown(&runtime, &session, &path);
}

#[cfg(feature = "sqlite")]
criterion_group!(benches, bench_sqlite_select, bench_sqlite_paginated_read, bench_sqlite_bulk);

#[cfg(not(feature = "sqlite"))]
criterion_group!(benches,);

criterion_main!(benches);
