//! Backend Factory
//!
//! Maps a [`DatabaseType`] to the shared driver serving it. Drivers are built
//! on first use and live for the lifetime of the factory, so every connection
//! of one backend type goes through the same instance.
//!
//! Backends compiled out via cargo features report `UnsupportedBackend`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::driver::{DatabaseType, Driver};
use crate::error::{OmniDbError, Result};

/// Lazily constructed, shared driver instances
#[derive(Default)]
pub struct DriverFactory {
    drivers: Mutex<HashMap<DatabaseType, Arc<dyn Driver>>>,
}

impl std::fmt::Debug for DriverFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut built: Vec<_> = self.drivers.lock().keys().copied().collect();
        built.sort();
        f.debug_struct("DriverFactory").field("built", &built).finish()
    }
}

impl DriverFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared driver for a backend type, building it on first request
    pub fn get_driver(&self, database_type: DatabaseType) -> Result<Arc<dyn Driver>> {
        let mut drivers = self.drivers.lock();
        if let Some(driver) = drivers.get(&database_type) {
            return Ok(Arc::clone(driver));
        }

        let driver = build_driver(database_type)?;
        debug!(backend = %database_type, "driver created");
        drivers.insert(database_type, Arc::clone(&driver));
        Ok(driver)
    }

    /// Driver by backend name (`"postgres"`, `"mongo"`, ...)
    pub fn driver_for(&self, name: &str) -> Result<Arc<dyn Driver>> {
        self.get_driver(name.parse()?)
    }

    /// Backend types compiled into this build
    #[must_use]
    pub fn supported_types() -> Vec<DatabaseType> {
        DatabaseType::ALL.into_iter().filter(|ty| is_compiled_in(*ty)).collect()
    }

    /// Drivers built so far
    #[must_use]
    pub fn all_drivers(&self) -> Vec<Arc<dyn Driver>> {
        let drivers = self.drivers.lock();
        let mut types: Vec<_> = drivers.keys().copied().collect();
        types.sort();
        types.iter().filter_map(|ty| drivers.get(ty).cloned()).collect()
    }
}

const fn is_compiled_in(database_type: DatabaseType) -> bool {
    match database_type {
        DatabaseType::Postgres => cfg!(feature = "postgres"),
        DatabaseType::MySql => cfg!(feature = "mysql"),
        DatabaseType::ClickHouse => cfg!(feature = "clickhouse"),
        DatabaseType::MongoDb => cfg!(feature = "mongodb"),
        DatabaseType::SQLite => cfg!(feature = "sqlite"),
    }
}

fn build_driver(database_type: DatabaseType) -> Result<Arc<dyn Driver>> {
    match database_type {
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => {
            Ok(Arc::new(crate::driver::sql::SqlDriver::new(crate::driver::postgres::PostgresEngine)))
        }
        #[cfg(feature = "mysql")]
        DatabaseType::MySql => Ok(Arc::new(crate::driver::sql::SqlDriver::new(crate::driver::mysql::MySqlEngine))),
        #[cfg(feature = "clickhouse")]
        DatabaseType::ClickHouse => {
            Ok(Arc::new(crate::driver::sql::SqlDriver::new(crate::driver::clickhouse::ClickHouseEngine)))
        }
        #[cfg(feature = "sqlite")]
        DatabaseType::SQLite => Ok(Arc::new(crate::driver::sql::SqlDriver::new(crate::driver::sqlite::SqliteEngine))),
        #[cfg(feature = "mongodb")]
        DatabaseType::MongoDb => Ok(Arc::new(crate::driver::mongodb::MongoDriver::new())),
        #[allow(unreachable_patterns)]
        other => Err(OmniDbError::UnsupportedBackend(format!("{other} (not compiled into this build)"))),
    }
}
