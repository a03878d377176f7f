//! In-memory log store.

use std::{
    collections::{BTreeMap, HashMap},
    ops::RangeInclusive,
    sync::{
        RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use relay_core::{LogStore, StoreError};

/// In-memory log store implementation.
///
/// Useful for development, tests and single-process deployments.
/// Data is lost on restart.
pub struct MemoryLogStore {
    counters: RwLock<HashMap<String, u64>>,
    tables: RwLock<HashMap<String, BTreeMap<u64, Bytes>>>,
    available: AtomicBool,
}

impl MemoryLogStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            tables: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store becoming unreachable, or reachable again.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Overwrite a counter or marker.
    ///
    /// # Errors
    /// Returns error if the store is unavailable.
    pub fn set_counter(&self, key: &str, value: u64) -> Result<(), StoreError> {
        self.check()?;
        self.counters
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .insert(key.to_string(), value);
        Ok(())
    }

    /// Drop a stored body, as retention would.
    ///
    /// # Errors
    /// Returns error if the store is unavailable.
    pub fn evict(&self, table: &str, version: u64) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self
            .tables
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .get_mut(table)
            .and_then(|t| t.remove(&version))
            .is_some())
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        self.check()?;
        let mut counters = self
            .counters
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let counter = counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn get_counter(&self, key: &str) -> Result<u64, StoreError> {
        self.check()?;
        Ok(self
            .counters
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .get(key)
            .copied()
            .unwrap_or(0))
    }

    async fn put_body(&self, table: &str, version: u64, body: Bytes) -> Result<(), StoreError> {
        self.check()?;
        self.tables
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .entry(table.to_string())
            .or_default()
            .insert(version, body);
        Ok(())
    }

    async fn get_bodies(
        &self,
        table: &str,
        versions: RangeInclusive<u64>,
    ) -> Result<Vec<Option<Bytes>>, StoreError> {
        self.check()?;
        let tables = self
            .tables
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let table = tables.get(table);
        Ok(versions
            .map(|version| table.and_then(|t| t.get(&version).cloned()))
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        let in_counters = self
            .counters
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .contains_key(key);
        let in_tables = self
            .tables
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .contains_key(key);
        Ok(in_counters || in_tables)
    }
}
