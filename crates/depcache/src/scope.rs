//! Unit-of-work scoped memoization for reusable dependencies

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::Result;

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// One logical unit of work (an incoming request, a batch job).
///
/// Dependencies created with `reuse = true` look up their payload here by a
/// hash of their own configuration, so an expensive payload (a query, a
/// directory walk) is computed at most once per unit of work. The table lives
/// exactly as long as this value: start one with [`UnitOfWork::begin`] and
/// finish it with [`UnitOfWork::end`].
#[derive(Debug)]
pub struct UnitOfWork {
    id: u64,
    payloads: Mutex<HashMap<String, Value>>,
}

impl UnitOfWork {
    /// Start a new unit of work with an empty memo table
    pub fn begin() -> Self {
        let id = NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed);
        debug!("Unit of work {} started", id);
        Self {
            id,
            payloads: Mutex::new(HashMap::new()),
        }
    }

    /// Finish the unit of work, returning how many payloads were dropped
    pub fn end(self) -> usize {
        let cleared = self.clear();
        debug!("Unit of work {} ended, {} payloads cleared", self.id, cleared);
        cleared
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Drop every memoized payload but keep the unit of work open
    pub fn clear(&self) -> usize {
        let mut payloads = self.payloads.lock();
        let cleared = payloads.len();
        payloads.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        self.payloads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lookup(&self, hash: &str) -> Option<Value> {
        self.payloads.lock().get(hash).cloned()
    }

    pub fn remember(&self, hash: impl Into<String>, payload: Value) {
        self.payloads.lock().insert(hash.into(), payload);
    }

    /// Return the memoized payload for `hash`, computing it once if absent.
    ///
    /// The lock is not held while `compute` runs. Failed computations are
    /// not memoized.
    pub fn get_or_compute<F>(&self, hash: &str, compute: F) -> Result<Value>
    where
        F: FnOnce() -> Result<Value>,
    {
        if let Some(payload) = self.lookup(hash) {
            return Ok(payload);
        }
        let payload = compute()?;
        self.remember(hash, payload.clone());
        Ok(payload)
    }
}

impl Default for UnitOfWork {
    fn default() -> Self {
        Self::begin()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use serde_json::json;

    use super::*;
    use crate::CacheError;

    #[test]
    fn test_compute_runs_once_per_hash() {
        let unit = UnitOfWork::begin();
        let calls = Cell::new(0);

        for _ in 0..3 {
            let payload = unit
                .get_or_compute("h1", || {
                    calls.set(calls.get() + 1);
                    Ok(json!(7))
                })
                .unwrap();
            assert_eq!(payload, json!(7));
        }

        assert_eq!(calls.get(), 1);
        assert_eq!(unit.len(), 1);
    }

    #[test]
    fn test_failures_are_not_memoized() {
        let unit = UnitOfWork::begin();
        let result = unit.get_or_compute("h1", || Err(CacheError::storage("down")));
        assert!(result.is_err());
        assert!(unit.is_empty());
    }

    #[test]
    fn test_end_clears_payloads() {
        let unit = UnitOfWork::begin();
        unit.remember("a", json!(1));
        unit.remember("b", json!(2));
        assert_eq!(unit.end(), 2);
    }

    #[test]
    fn test_units_are_isolated() {
        let first = UnitOfWork::begin();
        let second = UnitOfWork::begin();
        first.remember("shared", json!("first"));

        assert_ne!(first.id(), second.id());
        assert_eq!(second.lookup("shared"), None);
    }
}
