//! Storage backends
//!
//! A backend only moves bytes. Key normalization, encoding and dependency
//! checks all happen in the [`Cache`](crate::Cache) façade before a backend
//! is called.

use std::collections::HashMap;

use tracing::warn;

use crate::{Result, Ttl};

pub mod file;
pub mod memory;
pub mod null;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use null::NullBackend;

/// Physical storage contract.
///
/// `Err` is reserved for failures talking to the medium; a write the medium
/// declines (for example `add_value` on a live key) is `Ok(false)`. Backends
/// with native multi-key support should override [`get_values`] and
/// [`set_values`]; the defaults loop over the single-key primitives with the
/// same observable result.
///
/// [`get_values`]: StorageBackend::get_values
/// [`set_values`]: StorageBackend::set_values
pub trait StorageBackend: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Fetch the bytes for a key, `None` when absent or expired
    fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store bytes, replacing any existing entry
    fn set_value(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<bool>;

    /// Store bytes only if no live entry exists for the key
    fn add_value(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<bool>;

    /// Remove one key
    fn delete_value(&self, key: &str) -> Result<bool>;

    /// Remove everything this backend can see.
    ///
    /// This is backend-wide: entries written by other caches that share the
    /// medium under a different prefix are removed as well.
    fn flush_values(&self) -> Result<bool>;

    /// Fetch several keys; absent keys are simply missing from the map.
    fn get_values(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            match self.get_value(key) {
                Ok(Some(value)) => {
                    found.insert(key.clone(), value);
                }
                Ok(None) => {}
                Err(e) => warn!("{} backend failed to read {}: {}", self.name(), key, e),
            }
        }
        Ok(found)
    }

    /// Store several entries, returning the keys that were not written.
    fn set_values(&self, items: &[(String, Vec<u8>)], ttl: Ttl) -> Result<Vec<String>> {
        Ok(collect_failures(self.name(), items, |key, value| {
            self.set_value(key, value, ttl)
        }))
    }

    /// Add several entries, returning the keys that were not written.
    fn add_values(&self, items: &[(String, Vec<u8>)], ttl: Ttl) -> Result<Vec<String>> {
        Ok(collect_failures(self.name(), items, |key, value| {
            self.add_value(key, value, ttl)
        }))
    }
}

fn collect_failures<F>(backend: &str, items: &[(String, Vec<u8>)], mut write: F) -> Vec<String>
where
    F: FnMut(&str, &[u8]) -> Result<bool>,
{
    let mut failed = Vec::new();
    for (key, value) in items {
        match write(key, value) {
            Ok(true) => {}
            Ok(false) => failed.push(key.clone()),
            Err(e) => {
                warn!("{} backend failed to write {}: {}", backend, key, e);
                failed.push(key.clone());
            }
        }
    }
    failed
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::*;
    use crate::CacheError;

    /// Backend with only the single-key primitives, one key always failing.
    pub(crate) struct FlakyBackend {
        data: Mutex<HashMap<String, Vec<u8>>>,
        broken_key: String,
    }

    impl FlakyBackend {
        pub(crate) fn new(broken_key: impl Into<String>) -> Self {
            Self {
                data: Mutex::new(HashMap::new()),
                broken_key: broken_key.into(),
            }
        }
    }

    impl StorageBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>> {
            if key == self.broken_key {
                return Err(CacheError::storage("connection reset"));
            }
            Ok(self.data.lock().get(key).cloned())
        }

        fn set_value(&self, key: &str, value: &[u8], _ttl: Ttl) -> Result<bool> {
            if key == self.broken_key {
                return Err(CacheError::storage("connection reset"));
            }
            self.data.lock().insert(key.to_string(), value.to_vec());
            Ok(true)
        }

        fn add_value(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<bool> {
            if self.data.lock().contains_key(key) {
                return Ok(false);
            }
            self.set_value(key, value, ttl)
        }

        fn delete_value(&self, key: &str) -> Result<bool> {
            Ok(self.data.lock().remove(key).is_some())
        }

        fn flush_values(&self) -> Result<bool> {
            self.data.lock().clear();
            Ok(true)
        }
    }
}
