//! # depcache
//!
//! Dependency-aware caching over pluggable storage backends.
//!
//! ## Features
//!
//! - **Logical keys**: strings, integers and composite keys normalized into
//!   namespaced storage keys
//! - **Dependencies**: tags, groups, external queries, callbacks, file and
//!   directory timestamps, and chains of those, invalidating entries without
//!   touching the stored bytes
//! - **Unit-of-work reuse**: expensive dependency payloads computed once per
//!   request or batch job
//! - **Degrading failures**: misses and rejected writes are values, not errors
//! - **Backends**: in-memory, file system, and a null backend
//!
//! ```
//! use depcache::{Cache, Dependency, Ttl};
//!
//! let cache = Cache::in_memory();
//! cache
//!     .set_with_dependency("user42", &"alice", Ttl::NEVER, Dependency::tag(["users"]))
//!     .unwrap();
//! assert_eq!(cache.get::<String, _>("user42").unwrap().as_deref(), Some("alice"));
//!
//! cache.invalidate_tags(&["users"]).unwrap();
//! assert_eq!(cache.get::<String, _>("user42").unwrap(), None);
//! ```

pub mod backend;
pub mod cache;
pub mod codec;
pub mod config;
pub mod dependency;
pub mod error;
pub mod key;
pub mod metrics;
pub mod scope;
pub mod ttl;

pub use backend::{FileBackend, MemoryBackend, NullBackend, StorageBackend};
pub use cache::{Cache, CacheBuilder, Generated, ScopedCache};
pub use codec::{Codec, CompressedJsonCodec, Envelope, JsonCodec, RawCodec};
pub use config::{BackendKind, CacheConfig, FileBackendConfig, SerializerKind};
pub use dependency::{
    CallbackFn, Dependency, DependencyContext, DependencyKind, DependencyRegistry, QuerySource,
    Snapshot,
};
pub use error::{CacheError, Result};
pub use key::{CacheKey, KeyNormalizer};
pub use metrics::{CacheMetrics, CacheStats};
pub use scope::UnitOfWork;
pub use ttl::Ttl;
