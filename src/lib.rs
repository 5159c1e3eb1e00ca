//! omnidb - Uniform Database Access Layer
//!
//! omnidb exposes one interface for connecting to, querying, mutating and
//! introspecting PostgreSQL, MySQL, ClickHouse, MongoDB and SQLite.
//!
//! # Core Principles
//! - One driver instance per backend type, many connections per driver
//! - Backend-native query text (no query language abstraction), with a
//!   closed, parsed command language for MongoDB
//! - Read-only connections reject writes before the backend is touched
//! - Failures are results, not panics
//!
//! # Module Organization
//! - [`error`] - Error types and stable error codes
//! - [`model`] - Result, schema, filter and bulk types
//! - [`capability`] - Query classification and backend capability flags
//! - [`filter`] - SQL and BSON filter translation
//! - [`registry`] - Per-driver connection and cancellation registries
//! - [`driver`] - The [`Driver`] trait and backend implementations
//! - [`factory`] - Shared driver instances per backend type
//! - [`session`] - Single-active-connection entry point
//! - [`config`] - Connection configuration and profiles
//! - [`logging`] - `tracing` subscriber setup for binaries
//! - [`output`] - JSON output envelopes
//!
//! # Example
//! ```no_run
//! use omnidb::{ConnectionConfig, SessionManager};
//!
//! # async fn run() {
//! let session = SessionManager::new();
//! let connected = session.connect(&ConnectionConfig::sqlite("app.db").read_only(true), "main").await;
//! assert!(connected.success);
//!
//! let result = session.query("main", "SELECT name FROM users", None).await;
//! println!("{} rows", result.row_count());
//! session.cleanup().await;
//! # }
//! ```

pub mod capability;
pub mod config;
pub mod driver;
pub mod error;
pub mod factory;
pub mod filter;
pub mod logging;
pub mod model;
pub mod output;
pub mod registry;
pub mod session;

// Re-export commonly used types for convenience
pub use capability::{classify_query, validate_read_only, BackendCapabilities, QueryCategory};
pub use config::ConnectionConfig;
pub use driver::{DatabaseType, Driver, Transaction};
pub use error::{OmniDbError, Result};
pub use factory::DriverFactory;
pub use model::{
    BulkOperation, BulkOperationResult, ColumnInfo, ConnectionInfo, ConnectionResult, Filter, FilterOperator,
    OperationResult, QueryResult, Row, SortDirection, SortSpec, TableQueryOptions, TableSchema, ValueMap,
};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use session::SessionManager;
