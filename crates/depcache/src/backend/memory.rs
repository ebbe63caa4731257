//! In-memory backend

use std::collections::HashMap;
use std::time::SystemTime;

use parking_lot::RwLock;

use super::StorageBackend;
use crate::{Result, Ttl};

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Option<SystemTime>,
}

impl StoredValue {
    fn new(bytes: &[u8], ttl: Ttl, now: SystemTime) -> Self {
        Self {
            bytes: bytes.to_vec(),
            expires_at: ttl.expires_at(now),
        }
    }

    fn is_live(&self, now: SystemTime) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Process-local backend backed by a hash map.
///
/// Expired entries are dropped lazily on write paths or by
/// [`purge_expired`](MemoryBackend::purge_expired).
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: RwLock<HashMap<String, StoredValue>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = SystemTime::now();
        let mut data = self.data.write();
        let before = data.len();
        data.retain(|_, stored| stored.is_live(now));
        before - data.len()
    }
}

impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = SystemTime::now();
        let data = self.data.read();
        Ok(data
            .get(key)
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.bytes.clone()))
    }

    fn set_value(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<bool> {
        let stored = StoredValue::new(value, ttl, SystemTime::now());
        self.data.write().insert(key.to_string(), stored);
        Ok(true)
    }

    fn add_value(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<bool> {
        let now = SystemTime::now();
        let mut data = self.data.write();
        if data.get(key).is_some_and(|stored| stored.is_live(now)) {
            return Ok(false);
        }
        data.insert(key.to_string(), StoredValue::new(value, ttl, now));
        Ok(true)
    }

    fn delete_value(&self, key: &str) -> Result<bool> {
        Ok(self.data.write().remove(key).is_some())
    }

    fn flush_values(&self) -> Result<bool> {
        self.data.write().clear();
        Ok(true)
    }

    fn get_values(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let now = SystemTime::now();
        let data = self.data.read();
        Ok(keys
            .iter()
            .filter_map(|key| {
                data.get(key)
                    .filter(|stored| stored.is_live(now))
                    .map(|stored| (key.clone(), stored.bytes.clone()))
            })
            .collect())
    }

    fn set_values(&self, items: &[(String, Vec<u8>)], ttl: Ttl) -> Result<Vec<String>> {
        let now = SystemTime::now();
        let mut data = self.data.write();
        for (key, value) in items {
            data.insert(key.clone(), StoredValue::new(value, ttl, now));
        }
        Ok(Vec::new())
    }
}
