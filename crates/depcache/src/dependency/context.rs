//! What a dependency may touch while it computes its payload

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::scope::UnitOfWork;
use crate::{Cache, CacheError, Result};

/// An external data source a query dependency reads from.
///
/// The result of the query is the comparison payload, so it should be small
/// and cheap to compare (a row count, a max timestamp).
pub trait QuerySource: Send + Sync {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Value>;
}

impl<F> QuerySource for F
where
    F: Fn(&str, &[Value]) -> Result<Value> + Send + Sync,
{
    fn query(&self, sql: &str, params: &[Value]) -> Result<Value> {
        self(sql, params)
    }
}

/// An injected computation producing a comparison payload from its arguments.
pub type CallbackFn = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// Named query sources and callbacks a cache instance can resolve.
///
/// Dependencies only carry names, so they stay plain serializable values;
/// the live resources are looked up here when a payload is computed.
#[derive(Clone, Default)]
pub struct DependencyRegistry {
    queries: HashMap<String, Arc<dyn QuerySource>>,
    callbacks: HashMap<String, CallbackFn>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_query_source(&mut self, name: impl Into<String>, source: Arc<dyn QuerySource>) {
        self.queries.insert(name.into(), source);
    }

    pub fn register_callback(&mut self, name: impl Into<String>, callback: CallbackFn) {
        self.callbacks.insert(name.into(), callback);
    }

    pub fn query_source(&self, name: &str) -> Result<&Arc<dyn QuerySource>> {
        self.queries.get(name).ok_or_else(|| {
            CacheError::configuration("query.source", format!("unknown query source '{}'", name))
        })
    }

    pub fn callback(&self, name: &str) -> Result<&CallbackFn> {
        self.callbacks.get(name).ok_or_else(|| {
            CacheError::configuration("callback.name", format!("unknown callback '{}'", name))
        })
    }
}

impl fmt::Debug for DependencyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut queries: Vec<_> = self.queries.keys().collect();
        let mut callbacks: Vec<_> = self.callbacks.keys().collect();
        queries.sort();
        callbacks.sort();
        f.debug_struct("DependencyRegistry")
            .field("queries", &queries)
            .field("callbacks", &callbacks)
            .finish()
    }
}

/// Passed to [`Dependency::evaluate`](super::Dependency::evaluate) and
/// [`Dependency::changed`](super::Dependency::changed).
///
/// Carries the cache (tag and group stamps are stored in it), the registry of
/// named sources, and the current unit of work, if any.
#[derive(Clone, Copy)]
pub struct DependencyContext<'a> {
    cache: &'a Cache,
    unit: Option<&'a UnitOfWork>,
}

impl<'a> DependencyContext<'a> {
    pub fn new(cache: &'a Cache, unit: Option<&'a UnitOfWork>) -> Self {
        Self { cache, unit }
    }

    pub fn cache(&self) -> &'a Cache {
        self.cache
    }

    pub fn unit(&self) -> Option<&'a UnitOfWork> {
        self.unit
    }

    pub fn registry(&self) -> &'a DependencyRegistry {
        self.cache.registry()
    }
}
