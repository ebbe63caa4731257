//! The cache façade

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{FileBackend, MemoryBackend, NullBackend, StorageBackend};
use crate::codec::{Codec, CompressedJsonCodec, Envelope, JsonCodec, RawCodec};
use crate::config::{BackendKind, CacheConfig, SerializerKind};
use crate::dependency::{tag, Dependency, DependencyContext, DependencyRegistry, QuerySource};
use crate::error::{CacheError, Result};
use crate::key::{CacheKey, KeyNormalizer};
use crate::metrics::{CacheMetrics, CacheStats, OperationTimer};
use crate::scope::UnitOfWork;
use crate::ttl::Ttl;

/// What a `get_or_set` generator produced.
///
/// Any plain value converts into [`Generated::Persist`], so generators
/// normally just return `Ok(value)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generated<T> {
    /// Cache the value, then return it
    Persist(T),
    /// Return the value without caching it
    Transient(T),
}

impl<T> Generated<T> {
    pub fn into_inner(self) -> T {
        match self {
            Generated::Persist(value) | Generated::Transient(value) => value,
        }
    }

    pub fn should_persist(&self) -> bool {
        matches!(self, Generated::Persist(_))
    }
}

impl<T> From<T> for Generated<T> {
    fn from(value: T) -> Self {
        Generated::Persist(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Set,
    Add,
}

/// Split configuration errors, which are returned, from operation failures,
/// which are logged and become `None`.
fn degrade<T>(result: Result<T>, context: &str) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_configuration() => Err(e),
        Err(e) => {
            warn!("{}: {}", context, e);
            Ok(None)
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| CacheError::serialization(e.to_string()))
}

/// Dependency-aware cache over a pluggable storage backend.
///
/// Every operation normalizes the logical key, evaluates or checks the
/// attached dependency, wraps the value in an [`Envelope`] and hands bytes
/// to the backend. A miss is `Ok(None)`; a rejected write is `Ok(false)` or
/// an entry in the returned failed-keys list. `Err` is reserved for
/// configuration problems, values that cannot be serialized, and errors
/// raised by a `get_or_set` generator.
///
/// Operations on `Cache` itself run outside any unit of work, so reusable
/// dependencies recompute their payload every time. Use [`Cache::scoped`] to
/// share payloads within one unit of work.
pub struct Cache {
    backend: Arc<dyn StorageBackend>,
    codec: Arc<dyn Codec>,
    keys: KeyNormalizer,
    config: CacheConfig,
    registry: DependencyRegistry,
    metrics: CacheMetrics,
}

impl Cache {
    /// Create a cache over `backend` with default configuration
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            codec: Arc::new(JsonCodec),
            keys: KeyNormalizer::default(),
            config: CacheConfig::default(),
            registry: DependencyRegistry::new(),
            metrics: CacheMetrics::new(),
        }
    }

    /// Create a process-local cache with default configuration
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn builder() -> CacheBuilder {
        CacheBuilder::new()
    }

    /// Build a cache exactly as described by `config`
    pub fn from_config(config: CacheConfig) -> Result<Self> {
        CacheBuilder::from_config(config).build()
    }

    /// Settings this cache was built with.
    ///
    /// The `backend` and `file` fields only describe the storage when the
    /// cache created it from configuration. A cache given a backend instance
    /// ([`Cache::new`], [`CacheBuilder::backend`]) keeps the defaults there;
    /// ask [`backend`](Self::backend) instead.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn registry(&self) -> &DependencyRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    /// Storage key a logical key is written under
    pub fn build_key(&self, key: impl Into<CacheKey>) -> String {
        self.keys.build_key(&key.into())
    }

    pub fn dependency_context<'a>(&'a self, unit: Option<&'a UnitOfWork>) -> DependencyContext<'a> {
        DependencyContext::new(self, unit)
    }

    /// Operations that share reusable dependency payloads through `unit`
    pub fn scoped<'a>(&'a self, unit: &'a UnitOfWork) -> ScopedCache<'a> {
        ScopedCache { cache: self, unit }
    }

    /// Fetch a value; `None` when absent, expired, invalidated or unreadable
    pub fn get<T, K>(&self, key: K) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        K: Into<CacheKey>,
    {
        self.get_in(&key.into(), None)
    }

    /// Whether a live entry with an unchanged dependency exists
    pub fn exists<K: Into<CacheKey>>(&self, key: K) -> Result<bool> {
        Ok(self.get_in::<Value>(&key.into(), None)?.is_some())
    }

    /// Fetch several values in one backend round trip.
    ///
    /// Every distinct requested key is present in the result; duplicates are
    /// looked up once.
    pub fn get_multiple<T, K, I>(&self, keys: I) -> Result<HashMap<CacheKey, Option<T>>>
    where
        T: DeserializeOwned,
        K: Into<CacheKey>,
        I: IntoIterator<Item = K>,
    {
        self.get_multiple_in(keys, None)
    }

    /// Store a value, replacing any existing entry
    pub fn set<K, T>(&self, key: K, value: &T, ttl: Ttl) -> Result<bool>
    where
        K: Into<CacheKey>,
        T: Serialize + ?Sized,
    {
        self.write_in(key.into(), value, ttl, None, None, WriteMode::Set)
    }

    /// Store a value guarded by `dependency`
    pub fn set_with_dependency<K, T>(
        &self,
        key: K,
        value: &T,
        ttl: Ttl,
        dependency: Dependency,
    ) -> Result<bool>
    where
        K: Into<CacheKey>,
        T: Serialize + ?Sized,
    {
        self.write_in(key.into(), value, ttl, Some(dependency), None, WriteMode::Set)
    }

    /// Store a value only if no live entry exists for the key
    pub fn add<K, T>(&self, key: K, value: &T, ttl: Ttl) -> Result<bool>
    where
        K: Into<CacheKey>,
        T: Serialize + ?Sized,
    {
        self.write_in(key.into(), value, ttl, None, None, WriteMode::Add)
    }

    pub fn add_with_dependency<K, T>(
        &self,
        key: K,
        value: &T,
        ttl: Ttl,
        dependency: Dependency,
    ) -> Result<bool>
    where
        K: Into<CacheKey>,
        T: Serialize + ?Sized,
    {
        self.write_in(key.into(), value, ttl, Some(dependency), None, WriteMode::Add)
    }

    /// Store several values, returning the keys that were not written
    pub fn set_multiple<K, T, I>(&self, items: I, ttl: Ttl) -> Result<Vec<CacheKey>>
    where
        K: Into<CacheKey>,
        T: Serialize,
        I: IntoIterator<Item = (K, T)>,
    {
        self.write_multiple_in(items, ttl, None, None, WriteMode::Set)
    }

    /// Store several values guarded by one dependency, evaluated once
    pub fn set_multiple_with_dependency<K, T, I>(
        &self,
        items: I,
        ttl: Ttl,
        dependency: Dependency,
    ) -> Result<Vec<CacheKey>>
    where
        K: Into<CacheKey>,
        T: Serialize,
        I: IntoIterator<Item = (K, T)>,
    {
        self.write_multiple_in(items, ttl, Some(dependency), None, WriteMode::Set)
    }

    /// Add several values; keys that already held a live entry are reported
    /// as failed. Successful writes are not rolled back.
    pub fn add_multiple<K, T, I>(&self, items: I, ttl: Ttl) -> Result<Vec<CacheKey>>
    where
        K: Into<CacheKey>,
        T: Serialize,
        I: IntoIterator<Item = (K, T)>,
    {
        self.write_multiple_in(items, ttl, None, None, WriteMode::Add)
    }

    pub fn delete<K: Into<CacheKey>>(&self, key: K) -> Result<bool> {
        let storage_key = self.keys.build_key(&key.into());
        match self.backend.delete_value(&storage_key) {
            Ok(deleted) => {
                debug!("Deleted cache entry: {}", storage_key);
                Ok(deleted)
            }
            Err(e) => {
                warn!("{} backend failed to delete {}: {}", self.backend.name(), storage_key, e);
                Ok(false)
            }
        }
    }

    /// Remove everything the backend holds.
    ///
    /// This is not limited to this cache's key prefix: other caches sharing
    /// the backend lose their entries too.
    pub fn flush(&self) -> Result<bool> {
        match self.backend.flush_values() {
            Ok(flushed) => {
                debug!("Flushed {} backend", self.backend.name());
                Ok(flushed)
            }
            Err(e) => {
                warn!("{} backend failed to flush: {}", self.backend.name(), e);
                Ok(false)
            }
        }
    }

    /// Return the cached value, or run `generator` once and cache its result.
    ///
    /// The generated value is returned even when writing it fails.
    /// Concurrent callers that miss together each run the generator.
    pub fn get_or_set<T, K, F, G>(&self, key: K, ttl: Ttl, generator: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        K: Into<CacheKey>,
        F: FnOnce() -> Result<G>,
        G: Into<Generated<T>>,
    {
        self.get_or_set_in(key.into(), ttl, None, generator, None)
    }

    pub fn get_or_set_with_dependency<T, K, F, G>(
        &self,
        key: K,
        ttl: Ttl,
        dependency: Dependency,
        generator: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        K: Into<CacheKey>,
        F: FnOnce() -> Result<G>,
        G: Into<Generated<T>>,
    {
        self.get_or_set_in(key.into(), ttl, Some(dependency), generator, None)
    }

    /// Bump the stamps of `tags`; every entry depending on one of them
    /// becomes a miss. Returns whether every stamp was written.
    pub fn invalidate_tags<I, S>(&self, tags: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = tags.into_iter().map(|t| t.as_ref().to_string()).collect();
        if names.iter().any(String::is_empty) {
            return Err(CacheError::configuration("tags", "tags must not be empty"));
        }
        tag::invalidate(self, tag::TAG_MARKER, &names)
    }

    /// Bump the stamp of `group`
    pub fn invalidate_group(&self, group: &str) -> Result<bool> {
        if group.is_empty() {
            return Err(CacheError::configuration("group", "group name is required"));
        }
        tag::invalidate(self, tag::GROUP_MARKER, &[group.to_string()])
    }

    fn resolve_ttl(&self, ttl: Ttl) -> Ttl {
        ttl.or_default(self.config.default_ttl())
    }

    fn evaluate_dependency(
        &self,
        dependency: Option<Dependency>,
        unit: Option<&UnitOfWork>,
    ) -> Result<Option<Dependency>> {
        let Some(mut dependency) = dependency else {
            return Ok(None);
        };
        if !self.config.track_dependencies {
            return Err(CacheError::DependenciesDisabled);
        }
        dependency.evaluate(&self.dependency_context(unit))?;
        Ok(Some(dependency))
    }

    fn encode_entry(&self, value: Value, dependency: Option<Dependency>) -> Result<Vec<u8>> {
        if self.config.track_dependencies {
            Envelope::new(value, dependency).encode(self.codec.as_ref())
        } else {
            self.codec.encode(&value)
        }
    }

    fn decode_entry(&self, bytes: &[u8]) -> Result<Envelope> {
        if self.config.track_dependencies {
            Envelope::decode(self.codec.as_ref(), bytes)
        } else {
            Ok(Envelope::new(self.codec.decode(bytes)?, None))
        }
    }

    /// Turn fetched bytes into a value, applying the dependency check
    fn resolve<T: DeserializeOwned>(
        &self,
        storage_key: &str,
        bytes: Option<&[u8]>,
        unit: Option<&UnitOfWork>,
        timer: &OperationTimer,
    ) -> Result<Option<T>> {
        let Some(bytes) = bytes else {
            debug!("Cache miss: {}", storage_key);
            self.metrics.record_miss(timer);
            return Ok(None);
        };

        let envelope = match self.decode_entry(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Ignoring undecodable cache entry {}: {}", storage_key, e);
                self.metrics.record_miss(timer);
                return Ok(None);
            }
        };

        if let Some(dependency) = &envelope.dependency {
            let changed = degrade(
                dependency.changed(&self.dependency_context(unit)),
                "Dependency check failed",
            )?;
            match changed {
                Some(false) => {}
                Some(true) => {
                    debug!("Dependency changed, treating as miss: {}", storage_key);
                    self.metrics.record_invalidation(timer);
                    return Ok(None);
                }
                None => {
                    self.metrics.record_miss(timer);
                    return Ok(None);
                }
            }
        }

        match serde_json::from_value(envelope.value) {
            Ok(value) => {
                debug!("Cache hit: {}", storage_key);
                self.metrics.record_hit(timer);
                Ok(Some(value))
            }
            Err(e) => {
                warn!("Cached value for {} has an unexpected shape: {}", storage_key, e);
                self.metrics.record_miss(timer);
                Ok(None)
            }
        }
    }

    fn get_in<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        unit: Option<&UnitOfWork>,
    ) -> Result<Option<T>> {
        let timer = OperationTimer::start();
        let storage_key = self.keys.build_key(key);
        let bytes = match self.backend.get_value(&storage_key) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("{} backend failed to read {}: {}", self.backend.name(), storage_key, e);
                None
            }
        };
        self.resolve(&storage_key, bytes.as_deref(), unit, &timer)
    }

    fn get_multiple_in<T, K, I>(
        &self,
        keys: I,
        unit: Option<&UnitOfWork>,
    ) -> Result<HashMap<CacheKey, Option<T>>>
    where
        T: DeserializeOwned,
        K: Into<CacheKey>,
        I: IntoIterator<Item = K>,
    {
        let timer = OperationTimer::start();

        let mut seen = HashSet::new();
        let mut requested = Vec::new();
        for key in keys {
            let key = key.into();
            if seen.insert(key.clone()) {
                let storage_key = self.keys.build_key(&key);
                requested.push((key, storage_key));
            }
        }

        let mut storage_keys: Vec<String> = requested.iter().map(|(_, sk)| sk.clone()).collect();
        storage_keys.sort();
        storage_keys.dedup();

        let found = match self.backend.get_values(&storage_keys) {
            Ok(found) => found,
            Err(e) => {
                warn!("{} backend failed a multi-key read: {}", self.backend.name(), e);
                HashMap::new()
            }
        };

        let mut results = HashMap::with_capacity(requested.len());
        for (key, storage_key) in requested {
            let bytes = found.get(&storage_key).map(Vec::as_slice);
            let value = self.resolve(&storage_key, bytes, unit, &timer)?;
            results.insert(key, value);
        }
        Ok(results)
    }

    fn write_in<T: Serialize + ?Sized>(
        &self,
        key: CacheKey,
        value: &T,
        ttl: Ttl,
        dependency: Option<Dependency>,
        unit: Option<&UnitOfWork>,
        mode: WriteMode,
    ) -> Result<bool> {
        let storage_key = self.keys.build_key(&key);

        // The snapshot must exist before the envelope is encoded.
        let Some(dependency) = degrade(
            self.evaluate_dependency(dependency, unit),
            "Dependency evaluation failed",
        )?
        else {
            self.metrics.record_write(false);
            return Ok(false);
        };

        let bytes = self.encode_entry(to_json(value)?, dependency)?;
        let ttl = self.resolve_ttl(ttl);

        let result = match mode {
            WriteMode::Set => self.backend.set_value(&storage_key, &bytes, ttl),
            WriteMode::Add => self.backend.add_value(&storage_key, &bytes, ttl),
        };
        let accepted = match result {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("{} backend failed to write {}: {}", self.backend.name(), storage_key, e);
                false
            }
        };

        self.metrics.record_write(accepted);
        if accepted {
            debug!("Cached {} ({} bytes)", storage_key, bytes.len());
        } else {
            debug!("Cache write not applied: {}", storage_key);
        }
        Ok(accepted)
    }

    fn write_multiple_in<K, T, I>(
        &self,
        items: I,
        ttl: Ttl,
        dependency: Option<Dependency>,
        unit: Option<&UnitOfWork>,
        mode: WriteMode,
    ) -> Result<Vec<CacheKey>>
    where
        K: Into<CacheKey>,
        T: Serialize,
        I: IntoIterator<Item = (K, T)>,
    {
        let items: Vec<(CacheKey, T)> = items.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let evaluated = degrade(
            self.evaluate_dependency(dependency, unit),
            "Dependency evaluation failed",
        )?;
        let Some(dependency) = evaluated else {
            let mut reported = HashSet::new();
            let failed: Vec<CacheKey> = items
                .into_iter()
                .map(|(key, _)| key)
                .filter(|key| reported.insert(key.clone()))
                .collect();
            for _ in &failed {
                self.metrics.record_write(false);
            }
            return Ok(failed);
        };

        // One physical write per storage key: the last value wins for `set`,
        // the first for `add`.
        let mut batch: Vec<(String, Vec<u8>)> = Vec::with_capacity(items.len());
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(items.len());
        let mut owners: Vec<(CacheKey, String)> = Vec::with_capacity(items.len());
        for (key, value) in items {
            let storage_key = self.keys.build_key(&key);
            let bytes = self.encode_entry(to_json(&value)?, dependency.clone())?;
            match positions.get(&storage_key) {
                Some(&position) => {
                    if mode == WriteMode::Set {
                        batch[position].1 = bytes;
                    }
                }
                None => {
                    positions.insert(storage_key.clone(), batch.len());
                    batch.push((storage_key.clone(), bytes));
                }
            }
            owners.push((key, storage_key));
        }

        let ttl = self.resolve_ttl(ttl);
        let result = match mode {
            WriteMode::Set => self.backend.set_values(&batch, ttl),
            WriteMode::Add => self.backend.add_values(&batch, ttl),
        };
        let failed: HashSet<String> = match result {
            Ok(failed) => failed.into_iter().collect(),
            Err(e) => {
                warn!("{} backend failed a multi-key write: {}", self.backend.name(), e);
                batch.iter().map(|(sk, _)| sk.clone()).collect()
            }
        };

        for (storage_key, _) in &batch {
            self.metrics.record_write(!failed.contains(storage_key));
        }
        if !failed.is_empty() {
            warn!("{} of {} cache writes failed", failed.len(), batch.len());
        }
        debug!("Cached {} of {} entries", batch.len() - failed.len(), batch.len());

        let mut reported = HashSet::new();
        Ok(owners
            .into_iter()
            .filter(|(_, storage_key)| failed.contains(storage_key))
            .map(|(key, _)| key)
            .filter(|key| reported.insert(key.clone()))
            .collect())
    }

    fn get_or_set_in<T, F, G>(
        &self,
        key: CacheKey,
        ttl: Ttl,
        dependency: Option<Dependency>,
        generator: F,
        unit: Option<&UnitOfWork>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<G>,
        G: Into<Generated<T>>,
    {
        if let Some(value) = self.get_in(&key, unit)? {
            return Ok(value);
        }

        let generated: Generated<T> = generator()?.into();
        if !generated.should_persist() {
            debug!("Generated value for {} is not persisted", key);
            return Ok(generated.into_inner());
        }

        let value = generated.into_inner();
        self.write_in(key, &value, ttl, dependency, unit, WriteMode::Set)?;
        Ok(value)
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.backend.name())
            .field("codec", &self.codec.name())
            .field("key_prefix", &self.keys.prefix())
            .field("track_dependencies", &self.config.track_dependencies)
            .field("registry", &self.registry)
            .finish()
    }
}

/// Cache operations bound to one [`UnitOfWork`].
///
/// Reusable dependencies evaluated or checked through this handle compute
/// their payload at most once for the lifetime of the unit of work.
#[derive(Clone, Copy)]
pub struct ScopedCache<'a> {
    cache: &'a Cache,
    unit: &'a UnitOfWork,
}

impl<'a> ScopedCache<'a> {
    pub fn cache(&self) -> &'a Cache {
        self.cache
    }

    pub fn unit(&self) -> &'a UnitOfWork {
        self.unit
    }

    pub fn get<T, K>(&self, key: K) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        K: Into<CacheKey>,
    {
        self.cache.get_in(&key.into(), Some(self.unit))
    }

    pub fn exists<K: Into<CacheKey>>(&self, key: K) -> Result<bool> {
        Ok(self
            .cache
            .get_in::<Value>(&key.into(), Some(self.unit))?
            .is_some())
    }

    pub fn get_multiple<T, K, I>(&self, keys: I) -> Result<HashMap<CacheKey, Option<T>>>
    where
        T: DeserializeOwned,
        K: Into<CacheKey>,
        I: IntoIterator<Item = K>,
    {
        self.cache.get_multiple_in(keys, Some(self.unit))
    }

    pub fn set<K, T>(&self, key: K, value: &T, ttl: Ttl) -> Result<bool>
    where
        K: Into<CacheKey>,
        T: Serialize + ?Sized,
    {
        self.cache.set(key, value, ttl)
    }

    pub fn set_with_dependency<K, T>(
        &self,
        key: K,
        value: &T,
        ttl: Ttl,
        dependency: Dependency,
    ) -> Result<bool>
    where
        K: Into<CacheKey>,
        T: Serialize + ?Sized,
    {
        self.cache.write_in(
            key.into(),
            value,
            ttl,
            Some(dependency),
            Some(self.unit),
            WriteMode::Set,
        )
    }

    pub fn add<K, T>(&self, key: K, value: &T, ttl: Ttl) -> Result<bool>
    where
        K: Into<CacheKey>,
        T: Serialize + ?Sized,
    {
        self.cache.add(key, value, ttl)
    }

    pub fn add_with_dependency<K, T>(
        &self,
        key: K,
        value: &T,
        ttl: Ttl,
        dependency: Dependency,
    ) -> Result<bool>
    where
        K: Into<CacheKey>,
        T: Serialize + ?Sized,
    {
        self.cache.write_in(
            key.into(),
            value,
            ttl,
            Some(dependency),
            Some(self.unit),
            WriteMode::Add,
        )
    }

    pub fn set_multiple<K, T, I>(&self, items: I, ttl: Ttl) -> Result<Vec<CacheKey>>
    where
        K: Into<CacheKey>,
        T: Serialize,
        I: IntoIterator<Item = (K, T)>,
    {
        self.cache.set_multiple(items, ttl)
    }

    pub fn set_multiple_with_dependency<K, T, I>(
        &self,
        items: I,
        ttl: Ttl,
        dependency: Dependency,
    ) -> Result<Vec<CacheKey>>
    where
        K: Into<CacheKey>,
        T: Serialize,
        I: IntoIterator<Item = (K, T)>,
    {
        self.cache
            .write_multiple_in(items, ttl, Some(dependency), Some(self.unit), WriteMode::Set)
    }

    pub fn add_multiple<K, T, I>(&self, items: I, ttl: Ttl) -> Result<Vec<CacheKey>>
    where
        K: Into<CacheKey>,
        T: Serialize,
        I: IntoIterator<Item = (K, T)>,
    {
        self.cache.add_multiple(items, ttl)
    }

    pub fn delete<K: Into<CacheKey>>(&self, key: K) -> Result<bool> {
        self.cache.delete(key)
    }

    pub fn get_or_set<T, K, F, G>(&self, key: K, ttl: Ttl, generator: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        K: Into<CacheKey>,
        F: FnOnce() -> Result<G>,
        G: Into<Generated<T>>,
    {
        self.cache
            .get_or_set_in(key.into(), ttl, None, generator, Some(self.unit))
    }

    pub fn get_or_set_with_dependency<T, K, F, G>(
        &self,
        key: K,
        ttl: Ttl,
        dependency: Dependency,
        generator: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        K: Into<CacheKey>,
        F: FnOnce() -> Result<G>,
        G: Into<Generated<T>>,
    {
        self.cache
            .get_or_set_in(key.into(), ttl, Some(dependency), generator, Some(self.unit))
    }
}

/// Builder for [`Cache`]
pub struct CacheBuilder {
    config: CacheConfig,
    backend: Option<Arc<dyn StorageBackend>>,
    codec: Option<Arc<dyn Codec>>,
    registry: DependencyRegistry,
}

impl CacheBuilder {
    pub fn new() -> Self {
        Self::from_config(CacheConfig::default())
    }

    /// Start from a loaded configuration; the backend and codec it names are
    /// created by [`build`](Self::build) unless overridden.
    pub fn from_config(config: CacheConfig) -> Self {
        Self {
            config,
            backend: None,
            codec: None,
            registry: DependencyRegistry::new(),
        }
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    /// Ttl applied when an operation is given [`Ttl::DEFAULT`]
    pub fn default_ttl(mut self, ttl: impl Into<Ttl>) -> Self {
        self.config.default_ttl = ttl.into().as_secs();
        self
    }

    pub fn serializer(mut self, serializer: SerializerKind) -> Self {
        self.config.serializer = serializer;
        self
    }

    pub fn track_dependencies(mut self, enabled: bool) -> Self {
        self.config.track_dependencies = enabled;
        self
    }

    /// Use this backend instead of the one named in the configuration
    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use this codec instead of the one named in the configuration
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Register a source query dependencies can name
    pub fn query_source<Q>(mut self, name: impl Into<String>, source: Q) -> Self
    where
        Q: QuerySource + 'static,
    {
        self.registry.register_query_source(name, Arc::new(source));
        self
    }

    /// Register a function callback dependencies can name
    pub fn callback<F>(mut self, name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.registry.register_callback(name, Arc::new(callback));
        self
    }

    /// Build the cache
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the settings are inconsistent or
    /// the backend cannot be initialized
    pub fn build(self) -> Result<Cache> {
        let codec = match self.codec {
            Some(codec) => codec,
            None => {
                self.config.validate()?;
                codec_for(self.config.serializer)
            }
        };
        if self.config.track_dependencies && !codec.is_structured() {
            return Err(CacheError::configuration(
                "codec",
                format!(
                    "the {} codec cannot carry dependencies; disable track_dependencies",
                    codec.name()
                ),
            ));
        }
        if self.config.default_ttl < 0 {
            return Err(CacheError::configuration(
                "default_ttl",
                "must be zero (never expire) or positive",
            ));
        }

        let backend = match self.backend {
            Some(backend) => backend,
            None => backend_for(&self.config)?,
        };

        debug!(
            "Built cache: backend={}, codec={}, prefix={:?}",
            backend.name(),
            codec.name(),
            self.config.key_prefix
        );

        Ok(Cache {
            backend,
            codec,
            keys: KeyNormalizer::new(self.config.key_prefix.clone()),
            config: self.config,
            registry: self.registry,
            metrics: CacheMetrics::new(),
        })
    }
}

impl Default for CacheBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn codec_for(serializer: SerializerKind) -> Arc<dyn Codec> {
    match serializer {
        SerializerKind::Json => Arc::new(JsonCodec),
        SerializerKind::CompressedJson => Arc::new(CompressedJsonCodec::default()),
        SerializerKind::Raw => Arc::new(RawCodec),
    }
}

fn backend_for(config: &CacheConfig) -> Result<Arc<dyn StorageBackend>> {
    Ok(match config.backend {
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::Null => Arc::new(NullBackend),
        BackendKind::File => {
            let backend = FileBackend::with_config(&config.file).map_err(|e| {
                if e.is_configuration() {
                    e
                } else {
                    CacheError::configuration(
                        "file.cache_path",
                        format!("cache directory is not usable: {}", e),
                    )
                }
            })?;
            Arc::new(backend)
        }
    })
}
