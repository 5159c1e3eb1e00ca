//! Connection Registry
//!
//! Each driver owns one [`ConnectionRegistry`] mapping connection ids to live
//! native handles. Handles are cheap clones (`Arc`s, pools, HTTP clients), so
//! lookups clone them out and the map lock is never held across an `.await`.
//!
//! [`CancellationRegistry`] holds cooperative cancellation tokens keyed by
//! query/session id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::config::ConnectionConfig;
use crate::error::{OmniDbError, Result};
use crate::model::ConnectionInfo;

/// One live connection
#[derive(Debug, Clone)]
pub struct RegistryEntry<H> {
    pub handle: H,
    pub config: ConnectionConfig,
    pub read_only: bool,
    pub connected_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub server_version: Option<String>,
}

impl<H> RegistryEntry<H> {
    pub fn new(handle: H, config: ConnectionConfig, server_version: Option<String>) -> Self {
        let now = Utc::now();
        let read_only = config.readonly;
        Self { handle, config, read_only, connected_at: now, last_used: now, server_version }
    }

    /// Public description of this entry (no password)
    #[must_use]
    pub fn info(&self, id: &str) -> ConnectionInfo {
        ConnectionInfo {
            id: id.to_string(),
            database_type: self.config.database_type,
            host: self.config.host.clone(),
            port: self.config.effective_port(),
            database: self.config.database.clone(),
            username: self.config.username.clone(),
            read_only: self.read_only,
            connected_at: self.connected_at,
            last_used: self.last_used,
            server_version: self.server_version.clone(),
        }
    }
}

/// Handle cloned out of the registry for one operation
#[derive(Debug, Clone)]
pub struct Lease<H> {
    pub handle: H,
    pub read_only: bool,
    pub timeout: Option<Duration>,
}

/// Connection id -> live handle map owned by one driver
#[derive(Debug)]
pub struct ConnectionRegistry<H> {
    entries: RwLock<HashMap<String, RegistryEntry<H>>>,
}

impl<H> Default for ConnectionRegistry<H> {
    fn default() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }
}

impl<H: Clone> ConnectionRegistry<H> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new entry, returning the previous one under the same id
    pub fn insert(&self, id: impl Into<String>, entry: RegistryEntry<H>) -> Option<RegistryEntry<H>> {
        self.entries.write().insert(id.into(), entry)
    }

    /// Remove an entry; `ConnectionNotFound` when absent
    pub fn remove(&self, id: &str) -> Result<RegistryEntry<H>> {
        self.entries.write().remove(id).ok_or_else(|| OmniDbError::connection_not_found(id))
    }

    /// Clone out the handle and its per-connection settings, refreshing `last_used`
    pub fn lease(&self, id: &str) -> Result<Lease<H>> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(id).ok_or_else(|| OmniDbError::connection_not_found(id))?;
        entry.last_used = Utc::now();
        Ok(Lease {
            handle: entry.handle.clone(),
            read_only: entry.read_only,
            timeout: entry.config.timeout_duration(),
        })
    }

    pub fn is_read_only(&self, id: &str) -> Result<bool> {
        self.entries.read().get(id).map(|e| e.read_only).ok_or_else(|| OmniDbError::connection_not_found(id))
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn info(&self, id: &str) -> Result<ConnectionInfo> {
        self.entries.read().get(id).map(|e| e.info(id)).ok_or_else(|| OmniDbError::connection_not_found(id))
    }

    /// Registered ids, sorted
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove and return every entry
    pub fn drain(&self) -> Vec<(String, RegistryEntry<H>)> {
        self.entries.write().drain().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Cooperative cancellation tokens keyed by query id
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: RwLock<HashMap<String, Arc<Notify>>>,
}

impl CancellationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for an in-flight operation
    ///
    /// An id can belong to one running operation at a time.
    pub fn register(&self, query_id: &str) -> Result<Arc<Notify>> {
        let mut tokens = self.tokens.write();
        if tokens.contains_key(query_id) {
            return Err(OmniDbError::invalid_input(format!("A query with id '{query_id}' is already running")));
        }
        let token = Arc::new(Notify::new());
        tokens.insert(query_id.to_string(), Arc::clone(&token));
        Ok(token)
    }

    /// Drop `token` once its operation has finished
    ///
    /// A newer registration under the same id is left in place.
    pub fn release(&self, query_id: &str, token: &Arc<Notify>) {
        let mut tokens = self.tokens.write();
        if tokens.get(query_id).is_some_and(|current| Arc::ptr_eq(current, token)) {
            tokens.remove(query_id);
        }
    }

    /// Signal the in-flight operation registered under `query_id`
    pub fn cancel(&self, query_id: &str) -> Result<()> {
        let token = self
            .tokens
            .write()
            .remove(query_id)
            .ok_or_else(|| OmniDbError::invalid_input(format!("No running query with id '{query_id}'")))?;
        // notify_one stores a permit, so a cancel that races ahead of the select still lands
        token.notify_one();
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self, query_id: &str) -> bool {
        self.tokens.read().contains_key(query_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DatabaseType;

    fn entry(readonly: bool) -> RegistryEntry<u32> {
        let mut config = ConnectionConfig::sqlite(":memory:");
        config.readonly = readonly;
        RegistryEntry::new(7, config, Some("3.45.0".into()))
    }

    #[test]
    fn test_insert_and_lookup() {
        let registry = ConnectionRegistry::new();
        assert!(registry.insert("a", entry(false)).is_none());
        assert!(registry.contains("a"));

        let lease = registry.lease("a").unwrap();
        assert_eq!(lease.handle, 7);
        assert!(!lease.read_only);
        assert_eq!(lease.timeout, None);

        let info = registry.info("a").unwrap();
        assert_eq!(info.id, "a");
        assert_eq!(info.database_type, DatabaseType::SQLite);
        assert_eq!(info.server_version.as_deref(), Some("3.45.0"));
    }

    #[test]
    fn test_lookup_refreshes_last_used() {
        let registry = ConnectionRegistry::new();
        registry.insert("a", entry(true));
        let before = registry.info("a").unwrap().last_used;
        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.lease("a").unwrap();
        assert!(registry.info("a").unwrap().last_used > before);
        assert!(registry.is_read_only("a").unwrap());
    }

    #[test]
    fn test_unknown_id() {
        let registry: ConnectionRegistry<u32> = ConnectionRegistry::new();
        assert_eq!(registry.lease("nope").unwrap_err().error_code(), "CONNECTION_NOT_FOUND");
        assert_eq!(registry.remove("nope").unwrap_err().error_code(), "CONNECTION_NOT_FOUND");
    }

    #[test]
    fn test_remove_twice() {
        let registry = ConnectionRegistry::new();
        registry.insert("a", entry(false));
        assert!(registry.remove("a").is_ok());
        assert!(registry.remove("a").is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_ids_sorted_and_drain() {
        let registry = ConnectionRegistry::new();
        registry.insert("b", entry(false));
        registry.insert("a", entry(false));
        assert_eq!(registry.ids(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.drain().len(), 2);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_token() {
        let cancels = CancellationRegistry::new();
        let token = cancels.register("q1").unwrap();
        assert!(cancels.is_running("q1"));

        cancels.cancel("q1").unwrap();
        // The stored permit resolves immediately
        tokio::time::timeout(std::time::Duration::from_secs(1), token.notified()).await.unwrap();

        assert!(!cancels.is_running("q1"));
        assert!(cancels.cancel("q1").is_err());
    }

    #[test]
    fn test_duplicate_id_keeps_first_token() {
        let cancels = CancellationRegistry::new();
        let first = cancels.register("q1").unwrap();

        let err = cancels.register("q1").unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
        assert!(cancels.is_running("q1"));

        cancels.release("q1", &first);
        assert!(!cancels.is_running("q1"));
    }

    #[test]
    fn test_stale_release_leaves_newer_token() {
        let cancels = CancellationRegistry::new();
        let first = cancels.register("q1").unwrap();
        cancels.cancel("q1").unwrap();

        let second = cancels.register("q1").unwrap();
        // The cancelled operation finishes after the id was reused
        cancels.release("q1", &first);
        assert!(cancels.is_running("q1"));

        cancels.cancel("q1").unwrap();
        cancels.release("q1", &second);
        assert!(!cancels.is_running("q1"));
    }
}
