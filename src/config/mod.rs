//! Configuration Management
//!
//! This module defines the explicit connection configuration accepted by every
//! driver and the connection profiles file used by the CLI.
//!
//! # Connection Configuration
//! A [`ConnectionConfig`] is a closed, typed struct: unknown fields are
//! rejected when it is deserialized, and [`ConnectionConfig::validate`] checks
//! the per-backend requirements before any native client is created.
//!
//! # Profiles
//! Named profiles live in `~/.config/omnidb/connections.json`:
//! ```json
//! {
//!   "default": "local",
//!   "connections": {
//!     "local": { "type": "sqlite", "file": "/tmp/app.db" },
//!     "prod": { "type": "postgres", "host": "db", "username": "app",
//!               "passwordEnv": "PROD_DB_PASSWORD", "readonly": true }
//!   }
//! }
//! ```
//! Passwords can be stored directly or referenced by environment variable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::driver::DatabaseType;
use crate::error::{OmniDbError, Result};

/// Connection configuration for all backends
///
/// Fields are backend-specific (e.g., `file` only applies to `SQLite`,
/// `authSource` and `tls` only to `MongoDB`).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Backend type
    #[serde(rename = "type")]
    pub database_type: DatabaseType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Port; the backend default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Database name (for `PostgreSQL` this is the catalog, schemas are separate)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    #[serde(default, alias = "user", skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable holding the password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// Reject every statement that is not READ or SYSTEM
    #[serde(default)]
    pub readonly: bool,

    /// Use TLS (HTTPS for `ClickHouse`)
    #[serde(default, alias = "ssl")]
    pub secure: bool,

    /// Connect/statement timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Database file path (for sqlite; `:memory:` for an in-memory database)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Full connection string (`mongodb://` or `mongodb+srv://`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// `MongoDB` authentication database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_source: Option<String>,

    /// `MongoDB` TLS override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<bool>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("database_type", &self.database_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("password_env", &self.password_env)
            .field("readonly", &self.readonly)
            .field("secure", &self.secure)
            .field("timeout", &self.timeout)
            .field("file", &self.file)
            .field("uri", &self.uri.as_ref().map(|_| "***"))
            .field("auth_source", &self.auth_source)
            .field("tls", &self.tls)
            .finish()
    }
}

impl ConnectionConfig {
    /// Empty configuration for a backend type
    #[must_use]
    pub const fn new(database_type: DatabaseType) -> Self {
        Self {
            database_type,
            host: None,
            port: None,
            database: None,
            username: None,
            password: None,
            password_env: None,
            readonly: false,
            secure: false,
            timeout: None,
            file: None,
            uri: None,
            auth_source: None,
            tls: None,
        }
    }

    fn server(
        database_type: DatabaseType,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port),
            username: Some(username.into()),
            password: Some(password.into()),
            database: Some(database.into()),
            ..Self::new(database_type)
        }
    }

    /// Create a new `PostgreSQL` connection config
    pub fn postgres(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self::server(DatabaseType::Postgres, host, port, username, password, database)
    }

    /// Create a new `MySQL` connection config
    pub fn mysql(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self::server(DatabaseType::MySql, host, port, username, password, database)
    }

    /// Create a new `ClickHouse` connection config (HTTP interface)
    pub fn clickhouse(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self::server(DatabaseType::ClickHouse, host, port, username, password, database)
    }

    /// Create a new `MongoDB` connection config from a connection string
    pub fn mongodb(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self { uri: Some(uri.into()), database: Some(database.into()), ..Self::new(DatabaseType::MongoDb) }
    }

    /// Create a new `SQLite` connection config
    pub fn sqlite(file: impl Into<PathBuf>) -> Self {
        Self { file: Some(file.into()), ..Self::new(DatabaseType::SQLite) }
    }

    /// Builder-style read-only flag
    #[must_use]
    pub fn read_only(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Builder-style timeout in milliseconds
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Some(timeout_ms);
        self
    }

    /// Host, defaulting to `localhost`
    #[must_use]
    pub fn effective_host(&self) -> &str {
        self.host.as_deref().filter(|h| !h.is_empty()).unwrap_or("localhost")
    }

    /// Port, defaulting to the backend's standard port
    #[must_use]
    pub fn effective_port(&self) -> Option<u16> {
        self.port.or_else(|| self.database_type.default_port())
    }

    #[must_use]
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    /// Resolve `passwordEnv` into `password`
    ///
    /// An explicit password wins over the environment variable.
    pub fn resolve_password(&mut self) -> Result<()> {
        if self.password.is_some() {
            return Ok(());
        }
        if let Some(env_var) = &self.password_env {
            let password = std::env::var(env_var).map_err(|_| {
                OmniDbError::config_error(format!("Environment variable {env_var} not found for password"))
            })?;
            self.password = Some(password);
        }
        Ok(())
    }

    /// Check the per-backend requirements
    pub fn validate(&self) -> Result<()> {
        if self.timeout == Some(0) {
            return Err(OmniDbError::invalid_input("timeout must be greater than 0 milliseconds"));
        }
        if self.port == Some(0) {
            return Err(OmniDbError::invalid_input("port must be greater than 0"));
        }

        match self.database_type {
            DatabaseType::SQLite => {
                if self.file.as_ref().map_or(true, |f| f.as_os_str().is_empty()) {
                    return Err(OmniDbError::invalid_input("SQLite requires 'file' parameter"));
                }
            }
            DatabaseType::Postgres | DatabaseType::MySql => {
                if self.username.as_deref().map_or(true, str::is_empty) {
                    return Err(OmniDbError::invalid_input(format!(
                        "{} requires 'username' parameter",
                        self.database_type.display_name()
                    )));
                }
                if self.database_type == DatabaseType::Postgres && self.secure {
                    return Err(OmniDbError::invalid_input(
                        "TLS connections are not supported for PostgreSQL",
                    ));
                }
            }
            DatabaseType::ClickHouse => {}
            DatabaseType::MongoDb => {
                if let Some(uri) = &self.uri {
                    if !(uri.starts_with("mongodb://") || uri.starts_with("mongodb+srv://")) {
                        return Err(OmniDbError::invalid_input(
                            "MongoDB uri must start with mongodb:// or mongodb+srv://",
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Connection profiles file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFile {
    /// Name of the profile used when none is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
}

impl ProfileFile {
    /// Resolve a profile (or the default one) into a ready-to-use config
    pub fn resolve(&self, name: Option<&str>) -> Result<ConnectionConfig> {
        let name = name.or(self.default.as_deref()).ok_or_else(|| {
            OmniDbError::config_error("No profile name given and no default profile configured")
        })?;
        let mut config = self
            .connections
            .get(name)
            .cloned()
            .ok_or_else(|| OmniDbError::config_error(format!("Profile '{name}' not found")))?;
        config.resolve_password()?;
        Ok(config)
    }
}

/// Get path to the profiles file (`~/.config/omnidb/connections.json`)
pub fn profiles_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| OmniDbError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("omnidb").join("connections.json"))
}

/// Load the profiles file; a missing file is an empty profile set
pub fn load_profiles(path: &Path) -> Result<ProfileFile> {
    if !path.exists() {
        return Ok(ProfileFile::default());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| OmniDbError::config_error(format!("Could not read profiles file: {e}")))?;

    serde_json::from_str(&contents)
        .map_err(|e| OmniDbError::config_error(format!("Invalid profiles file format: {e}")))
}

/// Load a single connection config from a JSON file
pub fn load_config_file(path: &Path) -> Result<ConnectionConfig> {
    let contents = fs::read_to_string(path).map_err(|e| {
        OmniDbError::config_error(format!("Could not read config file {}: {e}", path.display()))
    })?;

    let mut config: ConnectionConfig = serde_json::from_str(&contents)
        .map_err(|e| OmniDbError::config_error(format!("Invalid connection config: {e}")))?;
    config.resolve_password()?;
    Ok(config)
}
