//! Persisted key table and the storage interface behind it.
//!
//! The table is always handled as a whole: [`KeyStore::load`] returns a full snapshot and
//! [`KeyStore::save`] replaces the full table. Records are provisioned out-of-band; the gate only
//! ever increments `used`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::StoreError;

pub mod file;
pub use file::JsonFileKeyStore;

/// Usage accounting for a single API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Successful requests charged so far.
    pub used: u64,
    /// Ceiling on `used`.
    pub limit: u64,
}

impl KeyRecord {
    pub fn new(used: u64, limit: u64) -> Self {
        Self { used, limit }
    }

    /// Requests left before the quota is exhausted.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.limit
    }
}

/// Full key → record mapping as persisted. Keys are case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyTable(BTreeMap<String, KeyRecord>);

impl KeyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&KeyRecord> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut KeyRecord> {
        self.0.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Provision or replace a record. The gate itself never calls this.
    pub fn insert(&mut self, key: impl Into<String>, record: KeyRecord) -> Option<KeyRecord> {
        self.0.insert(key.into(), record)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &KeyRecord)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>> FromIterator<(K, KeyRecord)> for KeyTable {
    fn from_iter<I: IntoIterator<Item = (K, KeyRecord)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Durable read/write of the whole [`KeyTable`].
///
/// `save` must be atomic from the caller's perspective: after it returns (or fails) storage holds
/// either the previous table or the new one, never a mix.
#[async_trait]
pub trait KeyStore: Send + Sync + std::fmt::Debug {
    /// Read the full persisted table.
    async fn load(&self) -> Result<KeyTable, StoreError>;

    /// Replace the full persisted table.
    async fn save(&self, table: &KeyTable) -> Result<(), StoreError>;
}

/// Simple in-memory key store.
#[derive(Default, Clone, Debug)]
pub struct InMemoryKeyStore {
    data: Arc<Mutex<KeyTable>>,
    loads: Arc<std::sync::atomic::AtomicUsize>,
}

impl InMemoryKeyStore {
    pub fn new(table: KeyTable) -> Self {
        Self { data: Arc::new(Mutex::new(table)), loads: Default::default() }
    }

    /// Current table without counting as a load.
    pub fn snapshot(&self) -> KeyTable {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of `load` calls served so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn load(&self) -> Result<KeyTable, StoreError> {
        self.loads.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.snapshot())
    }

    async fn save(&self, table: &KeyTable) -> Result<(), StoreError> {
        let mut guard = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = table.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_remaining_saturates() {
        assert_eq!(KeyRecord::new(2, 5).remaining(), 3);
        assert_eq!(KeyRecord::new(7, 5).remaining(), 0);
        assert!(KeyRecord::new(5, 5).is_exhausted());
        assert!(!KeyRecord::new(4, 5).is_exhausted());
    }

    #[test]
    fn table_parses_plain_json_object() {
        let raw = r#"{ "abc": { "used": 0, "limit": 1 }, "ABC": { "used": 3, "limit": 10 } }"#;
        let table: KeyTable = serde_json::from_str(raw).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("abc"), Some(&KeyRecord::new(0, 1)));
        assert_eq!(table.get("ABC"), Some(&KeyRecord::new(3, 10)));
        assert!(table.get("Abc").is_none(), "keys are case-sensitive");
    }

    #[test]
    fn table_rejects_negative_counters() {
        let raw = r#"{ "abc": { "used": -1, "limit": 1 } }"#;
        assert!(serde_json::from_str::<KeyTable>(raw).is_err());
    }

    #[tokio::test]
    async fn in_memory_store_round_trips_and_counts_loads() {
        let store = InMemoryKeyStore::new(KeyTable::from_iter([("k", KeyRecord::new(0, 2))]));
        let mut table = store.load().await.unwrap();
        table.get_mut("k").unwrap().used = 1;
        store.save(&table).await.unwrap();

        assert_eq!(store.snapshot().get("k"), Some(&KeyRecord::new(1, 2)));
        assert_eq!(store.load_count(), 1);
    }
}
