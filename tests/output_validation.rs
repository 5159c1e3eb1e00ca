//! Output Validation Tests
//!
//! Validates the JSON shape of everything omnidb hands to callers:
//! - Success and error envelopes printed by the CLI
//! - `QueryResult`, `ConnectionResult` and `BulkOperationResult` field names
//! - Stable error codes and summaries
//!
//! Uses `insta` inline snapshots to detect unintended output changes.

#![cfg(feature = "sqlite")]

use std::path::PathBuf;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use omnidb::{
    BulkOperation, ConnectionConfig, ErrorEnvelope, ErrorInfo, Metadata, OmniDbError, QueryCategory, QueryResult,
    SessionManager, SuccessEnvelope, TableQueryOptions,
};

// ============================================================================
// Envelope Structure Tests
// ============================================================================

#[test]
fn test_success_envelope_snapshot() {
    let envelope = SuccessEnvelope::new("sqlite", "tables", json!(["orders", "users"]), Metadata::with_rows(12, 2));
    let json_str = serde_json::to_string_pretty(&envelope).expect("Should serialize");

    insta::assert_snapshot!(json_str, @r#"
    {
      "ok": true,
      "backend": "sqlite",
      "command": "tables",
      "data": [
        "orders",
        "users"
      ],
      "meta": {
        "execution_ms": 12,
        "rows_returned": 2
      }
    }
    "#);
}

#[test]
fn test_error_envelope_snapshot() {
    let err = OmniDbError::read_only_violation("DELETE statements are not allowed");
    let envelope = ErrorEnvelope::from_error("postgres", "query", &err);
    let json_str = serde_json::to_string_pretty(&envelope).expect("Should serialize");

    insta::assert_snapshot!(json_str, @r#"
    {
      "ok": false,
      "backend": "postgres",
      "command": "query",
      "error": {
        "code": "READ_ONLY_VIOLATION",
        "message": "Operation not allowed on a read-only connection",
        "detail": "Read-only violation: DELETE statements are not allowed"
      }
    }
    "#);
}

#[test]
fn test_envelopes_have_exactly_one_payload() {
    let success: Value =
        serde_json::to_value(SuccessEnvelope::new("mysql", "databases", json!([]), Metadata::new(1))).unwrap();
    let error: Value =
        serde_json::to_value(ErrorEnvelope::new("mysql", "databases", ErrorInfo::new("TIMEOUT", "timed out")))
            .unwrap();

    assert_eq!(success["ok"], json!(true));
    assert!(success.get("error").is_none());
    assert!(success["meta"].get("rows_returned").is_none());

    assert_eq!(error["ok"], json!(false));
    assert!(error.get("data").is_none());
    assert!(error.get("meta").is_none());
}

#[test]
fn test_error_codes_are_stable() {
    let cases = [
        (OmniDbError::connection_failed("refused"), "CONNECTION_FAILED"),
        (OmniDbError::connection_not_found("c1"), "CONNECTION_NOT_FOUND"),
        (OmniDbError::read_only_violation("INSERT"), "READ_ONLY_VIOLATION"),
        (OmniDbError::invalid_input("empty table"), "INVALID_INPUT"),
        (OmniDbError::query_failed("syntax"), "QUERY_FAILED"),
        (OmniDbError::engine_error("mongodb", "boom"), "ENGINE_ERROR"),
        (OmniDbError::unsupported("cancel"), "UNSUPPORTED"),
        (OmniDbError::cancelled("q1"), "QUERY_CANCELLED"),
        (OmniDbError::Timeout(10), "TIMEOUT"),
        (OmniDbError::config_error("missing"), "CONFIG_ERROR"),
    ];

    for (err, code) in cases {
        let info = ErrorInfo::from(&err);
        assert_eq!(info.code, code);
        assert_eq!(info.message, err.summary());
        assert_eq!(info.detail, Some(err.message()));
    }
}

// ============================================================================
// Result Model Shape
// ============================================================================

#[test]
fn test_query_result_snapshot() {
    let mut row = omnidb::Row::new();
    row.insert("id".into(), json!(1));
    row.insert("name".into(), json!("Ada"));
    let result = QueryResult::rows(vec!["id".into(), "name".into()], vec![row])
        .with_category(QueryCategory::Read)
        .with_total(41, 0)
        .with_elapsed(3);

    let json_str = serde_json::to_string_pretty(&result).expect("Should serialize");
    insta::assert_snapshot!(json_str, @r#"
    {
      "success": true,
      "data": [
        {
          "id": 1,
          "name": "Ada"
        }
      ],
      "fields": [
        "id",
        "name"
      ],
      "message": "1 row(s) returned",
      "queryType": "READ",
      "isDdl": false,
      "isDml": false,
      "totalRows": 41,
      "hasMore": true,
      "executionMs": 3
    }
    "#);
}

#[test]
fn test_failed_query_result_carries_no_data() {
    let result = QueryResult::failure(&OmniDbError::query_failed("no such table: ghosts"));
    let value = serde_json::to_value(&result).unwrap();

    assert_eq!(value["success"], json!(false));
    assert_eq!(value["message"], json!("Query failed"));
    assert_eq!(value["error"], json!("Query execution failed: no such table: ghosts"));
    assert!(value.get("data").is_none());
    assert!(value.get("affectedRows").is_none());
}

#[test]
fn test_bulk_operation_wire_format() {
    let ops: Vec<BulkOperation> = serde_json::from_value(json!([
        {"type": "insert", "table": "users", "data": {"name": "a"}},
        {"type": "update", "table": "users", "primaryKey": {"id": 1}, "data": {"name": "b"}},
        {"type": "delete", "table": "users", "database": "main", "primaryKey": {"id": 2}}
    ]))
    .expect("Should deserialize");

    assert_eq!(ops.len(), 3);
    assert_eq!(ops[2].database(), Some("main"));
    assert!(ops.iter().all(|op| op.table() == "users"));

    let unknown: Result<Vec<BulkOperation>, _> =
        serde_json::from_value(json!([{"type": "upsert", "table": "users", "data": {}}]));
    assert!(unknown.is_err());
}

// ============================================================================
// Real-World Output Tests
// ============================================================================

fn create_test_db() -> PathBuf {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let temp_file = std::env::temp_dir().join(format!("omnidb_output_{timestamp}.db"));
    let _ = std::fs::remove_file(&temp_file);

    let conn = rusqlite::Connection::open(&temp_file).expect("Failed to create temp database");
    conn.execute_batch(
        "CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT NOT NULL, price REAL);
         INSERT INTO products (name, price) VALUES ('Widget', 9.5);
         INSERT INTO products (name, price) VALUES ('Gadget', 19.25);",
    )
    .expect("Failed to create fixture");

    temp_file
}

#[tokio::test]
async fn test_real_query_output_is_valid_json() {
    let temp_file = create_test_db();
    let session = SessionManager::new();
    let connected = session.connect(&ConnectionConfig::sqlite(&temp_file).read_only(true), "out").await;
    assert!(connected.success);

    let result = session.query("out", "SELECT id, name, price FROM products ORDER BY id", None).await;
    let envelope = SuccessEnvelope::new("sqlite", "query", &result, Metadata::with_rows(0, result.row_count()));
    let json_str = serde_json::to_string(&envelope).expect("Should serialize");
    let parsed: Value = serde_json::from_str(&json_str).expect("Output must be valid JSON");

    assert_eq!(parsed["data"]["fields"], json!(["id", "name", "price"]));
    assert_eq!(parsed["data"]["data"][1], json!({"id": 2, "name": "Gadget", "price": 19.25}));
    assert_eq!(parsed["data"]["queryType"], json!("READ"));
    assert_eq!(parsed["meta"]["rows_returned"], json!(2));

    let page = session
        .query_table("out", &TableQueryOptions { limit: Some(1), ..TableQueryOptions::new("products") }, None)
        .await;
    let value = serde_json::to_value(&page).unwrap();
    assert_eq!(value["totalRows"], json!(2));
    assert_eq!(value["hasMore"], json!(true));

    session.cleanup().await;
    let _ = std::fs::remove_file(&temp_file);
}

#[tokio::test]
async fn test_connection_result_never_contains_password() {
    let temp_file = create_test_db();
    let session = SessionManager::new();
    let mut config = ConnectionConfig::sqlite(&temp_file);
    config.password = Some("hunter2".into());

    let result = session.connect(&config, "secret").await;
    assert!(result.success);
    let json_str = serde_json::to_string(&result).unwrap();
    assert!(!json_str.contains("hunter2"));
    assert!(json_str.contains(r#""databaseType":"sqlite""#));

    let failed = session.connect(&ConnectionConfig::sqlite("/nonexistent/dir/x.db").read_only(true), "bad").await;
    assert!(!failed.success);
    assert!(!serde_json::to_string(&failed).unwrap().contains("connection\":"));

    session.cleanup().await;
    let _ = std::fs::remove_file(&temp_file);
}
