//! omnidb CLI Entry Point
//!
//! A thin harness over [`omnidb::SessionManager`]. The connection comes from
//! `--config <file>` or a named profile; every invocation opens it, runs one
//! subcommand and prints exactly one JSON envelope on stdout. Logs go to
//! stderr (`OMNIDB_LOG`).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;

use omnidb::config::{load_config_file, load_profiles, profiles_path};
use omnidb::{
    BulkOperation, ConnectionConfig, ErrorEnvelope, ErrorInfo, Filter, FilterOperator, Metadata, OmniDbError,
    QueryResult, SessionManager, SortSpec, SuccessEnvelope, TableQueryOptions,
};

const CONNECTION_ID: &str = "cli";

/// omnidb - uniform access to PostgreSQL, MySQL, ClickHouse, MongoDB and SQLite
#[derive(Parser)]
#[command(name = "omnidb")]
#[command(about = "Uniform connection, query and schema access across database backends")]
#[command(version)]
struct Cli {
    /// Connection config JSON file
    #[arg(long, global = true, conflicts_with = "profile")]
    config: Option<PathBuf>,

    /// Named connection profile (default profile when neither option is given)
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Force a read-only connection
    #[arg(long, global = true)]
    readonly: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the connection, probe it and close it again
    Test,

    /// List databases
    Databases,

    /// List tables (collections for MongoDB)
    Tables {
        #[arg(long)]
        database: Option<String>,
    },

    /// Describe a table
    Schema {
        table: String,

        #[arg(long)]
        database: Option<String>,

        /// Include primary and unique keys
        #[arg(long)]
        full: bool,
    },

    /// Execute backend-native query text
    Query { text: String },

    /// Filtered, sorted, paginated table read
    Select {
        table: String,

        #[arg(long)]
        database: Option<String>,

        /// Filter as `column:operator[:value]`, e.g. `age:>=:18` (repeatable, AND-joined)
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// Sort as `column[:desc]` (repeatable)
        #[arg(long = "order")]
        order_by: Vec<String>,

        #[arg(long)]
        limit: Option<u64>,

        #[arg(long)]
        offset: Option<u64>,
    },

    /// Apply a JSON array of insert/update/delete operations
    Bulk { operations: PathBuf },
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Test => "test",
            Self::Databases => "databases",
            Self::Tables { .. } => "tables",
            Self::Schema { .. } => "schema",
            Self::Query { .. } => "query",
            Self::Select { .. } => "select",
            Self::Bulk { .. } => "bulk",
        }
    }
}

/// Parse `column:operator[:value]`; the value is JSON when it parses as JSON
fn parse_filter(spec: &str) -> Result<Filter, OmniDbError> {
    let mut parts = spec.splitn(3, ':');
    let column = parts.next().unwrap_or_default().trim();
    let operator: FilterOperator = parts
        .next()
        .ok_or_else(|| OmniDbError::invalid_input(format!("Filter '{spec}' must be column:operator[:value]")))?
        .parse()?;

    let value = parts.next().map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())));
    Ok(match value {
        Some(value) if !operator.is_null_check() => Filter::new(column, operator, value),
        _ => Filter::null_check(column, operator),
    })
}

fn parse_sort(spec: &str) -> Result<SortSpec, OmniDbError> {
    match spec.rsplit_once(':') {
        Some((column, dir)) if dir.eq_ignore_ascii_case("desc") => Ok(SortSpec::desc(column)),
        Some((column, dir)) if dir.eq_ignore_ascii_case("asc") => Ok(SortSpec::asc(column)),
        Some((_, dir)) => Err(OmniDbError::invalid_input(format!("Unknown sort direction '{dir}'"))),
        None => Ok(SortSpec::asc(spec)),
    }
}

fn resolve_config(cli: &Cli) -> Result<ConnectionConfig, OmniDbError> {
    let mut config = match &cli.config {
        Some(path) => load_config_file(path)?,
        None => load_profiles(&profiles_path()?)?.resolve(cli.profile.as_deref())?,
    };
    if cli.readonly {
        config.readonly = true;
    }
    Ok(config)
}

fn read_operations(path: &Path) -> anyhow::Result<Vec<BulkOperation>> {
    let contents = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing operations in {}", path.display()))
}

/// A result envelope that came back with `success: false`
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
struct CommandFailure {
    code: &'static str,
    message: String,
    detail: Option<String>,
}

/// JSON data of a command plus the row count for the metadata block
type CommandOutput = (Value, Option<usize>);

fn rows_output<T: Serialize>(items: &[T]) -> anyhow::Result<CommandOutput> {
    Ok((serde_json::to_value(items)?, Some(items.len())))
}

fn query_output(result: QueryResult) -> anyhow::Result<CommandOutput> {
    if !result.success {
        return Err(CommandFailure { code: "QUERY_FAILED", message: result.message, detail: result.error }.into());
    }
    let rows = result.row_count();
    Ok((serde_json::to_value(&result)?, Some(rows)))
}

/// Run one subcommand; every command but `test` works on the active connection
async fn run_command(
    session: &SessionManager,
    config: &ConnectionConfig,
    command: &Commands,
) -> anyhow::Result<CommandOutput> {
    if matches!(command, Commands::Test) {
        let result = session.test_connection(config).await;
        if !result.success {
            let failure = CommandFailure { code: "CONNECTION_FAILED", message: result.message, detail: result.error };
            return Err(failure.into());
        }
        return Ok((serde_json::to_value(&result)?, None));
    }

    let connected = session.connect(config, CONNECTION_ID).await;
    if !connected.success {
        let failure = CommandFailure { code: "CONNECTION_FAILED", message: connected.message, detail: connected.error };
        return Err(failure.into());
    }

    let id = CONNECTION_ID;
    match command {
        Commands::Test => Ok((Value::Null, None)),
        Commands::Databases => rows_output(&session.get_databases(id).await?),
        Commands::Tables { database } => rows_output(&session.get_tables(id, database.as_deref()).await?),
        Commands::Schema { table, database, full: true } => {
            Ok((serde_json::to_value(session.get_table_full_schema(id, table, database.as_deref()).await?)?, None))
        }
        Commands::Schema { table, database, full: false } => {
            rows_output(&session.get_table_schema(id, table, database.as_deref()).await?)
        }
        Commands::Query { text } => query_output(session.query(id, text, None).await),
        Commands::Select { table, database, filters, order_by, limit, offset } => {
            let options = TableQueryOptions {
                database: database.clone(),
                filters: filters.iter().map(|f| parse_filter(f)).collect::<Result<_, _>>()?,
                order_by: order_by.iter().map(|s| parse_sort(s)).collect::<Result<_, _>>()?,
                limit: *limit,
                offset: *offset,
                ..TableQueryOptions::new(table.clone())
            };
            query_output(session.query_table(id, &options, None).await)
        }
        Commands::Bulk { operations } => {
            let operations = read_operations(operations)?;
            let result = session.execute_bulk_operations(id, &operations).await;
            if !result.success {
                return Err(CommandFailure {
                    code: "BULK_FAILED",
                    message: result.error.clone().unwrap_or_else(|| "Bulk operations failed".into()),
                    detail: Some(serde_json::to_string(&result)?),
                }
                .into());
            }
            let applied = result.results.len();
            Ok((serde_json::to_value(&result)?, Some(applied)))
        }
    }
}

fn error_info(err: &anyhow::Error) -> ErrorInfo {
    if let Some(err) = err.downcast_ref::<OmniDbError>() {
        return ErrorInfo::from(err);
    }
    if let Some(failure) = err.downcast_ref::<CommandFailure>() {
        return ErrorInfo { code: failure.code.into(), message: failure.message.clone(), detail: failure.detail.clone() };
    }
    ErrorInfo::new("INVALID_INPUT", format!("{err:#}"))
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("failed to serialise output: {err}"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    omnidb::logging::init();
    let cli = Cli::parse();
    let command = cli.command.name();

    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            print_json(&ErrorEnvelope::from_error("", command, &err));
            return ExitCode::FAILURE;
        }
    };
    let backend = config.database_type.to_string();

    let session = SessionManager::new();
    let start = Instant::now();
    let outcome = run_command(&session, &config, &cli.command).await;
    session.cleanup().await;
    let execution_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match outcome {
        Ok((data, rows)) => {
            let meta = rows.map_or(Metadata::new(execution_ms), |n| Metadata::with_rows(execution_ms, n));
            print_json(&SuccessEnvelope::new(backend, command, data, meta));
            ExitCode::SUCCESS
        }
        Err(err) => {
            print_json(&ErrorEnvelope::new(backend, command, error_info(&err)));
            ExitCode::FAILURE
        }
    }
}
