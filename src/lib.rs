//! Shared fixtures for the end-to-end tests in `tests/`

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use depcache::{Cache, Result, Ttl};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A fake table with a version column and a query counter.
#[derive(Debug, Default)]
pub struct FakeTable {
    version: AtomicI64,
    queries: AtomicUsize,
}

impl FakeTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulate a write to the table
    pub fn touch(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn query(&self, _sql: &str, _params: &[Value]) -> Result<Value> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(json!(self.version.load(Ordering::SeqCst)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub price_cents: u64,
}

/// Build a cache with `table` registered as the `products` query source
pub fn catalog_cache(table: Arc<FakeTable>, key_prefix: &str) -> Result<Cache> {
    Cache::builder()
        .key_prefix(key_prefix)
        .default_ttl(Ttl::hours(1))
        .query_source("products", move |sql: &str, params: &[Value]| table.query(sql, params))
        .build()
}

pub fn product(id: i64) -> Product {
    Product {
        id,
        name: format!("product {}", id),
        price_cents: 100 * id as u64,
    }
}
