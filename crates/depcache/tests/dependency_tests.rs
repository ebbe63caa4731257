//! Dependency invalidation through the cache façade

use std::fs;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use depcache::{Cache, CacheError, Dependency, Result, Ttl, UnitOfWork};
use serde_json::{json, Value};
use tempfile::TempDir;

/// A cache whose "db" source returns the shared version and counts calls
fn versioned_cache(version: Arc<AtomicI64>, calls: Arc<AtomicUsize>) -> Cache {
    Cache::builder()
        .query_source("db", move |_sql: &str, _params: &[Value]| -> Result<Value> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!(version.load(Ordering::SeqCst)))
        })
        .build()
        .unwrap()
}

#[test]
fn test_tag_invalidation() {
    let cache = Cache::in_memory();
    cache
        .set_with_dependency("k", &"v", Ttl::NEVER, Dependency::tag(["t"]))
        .unwrap();
    assert_eq!(cache.get::<String, _>("k").unwrap().as_deref(), Some("v"));

    cache.invalidate_tags(&["t"]).unwrap();
    assert_eq!(cache.get::<String, _>("k").unwrap(), None);
}

#[test]
fn test_multi_tag_entry_invalidated_by_any_tag() {
    let cache = Cache::in_memory();
    cache
        .set_with_dependency("a", &1, Ttl::NEVER, Dependency::tag(["users", "posts"]))
        .unwrap();
    cache
        .set_with_dependency("b", &2, Ttl::NEVER, Dependency::tag(["users"]))
        .unwrap();

    cache.invalidate_tags(&["posts"]).unwrap();
    assert_eq!(cache.get::<i32, _>("a").unwrap(), None);
    assert_eq!(cache.get::<i32, _>("b").unwrap(), Some(2));
}

#[test]
fn test_rewriting_after_invalidation_captures_new_stamp() {
    let cache = Cache::in_memory();
    let dependency = Dependency::tag(["t"]);

    cache
        .set_with_dependency("k", &1, Ttl::NEVER, dependency.clone())
        .unwrap();
    cache.invalidate_tags(&["t"]).unwrap();
    cache
        .set_with_dependency("k", &2, Ttl::NEVER, dependency)
        .unwrap();
    assert_eq!(cache.get::<i32, _>("k").unwrap(), Some(2));
}

#[test]
fn test_group_invalidation() {
    let cache = Cache::in_memory();
    cache
        .set_with_dependency("k", &1, Ttl::NEVER, Dependency::group("catalog"))
        .unwrap();
    cache.invalidate_group("catalog").unwrap();
    assert_eq!(cache.get::<i32, _>("k").unwrap(), None);
}

#[test]
fn test_chained_or_semantics() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("settings.toml");
    fs::write(&path, "a = 1").unwrap();

    let cache = Cache::in_memory();
    let dependency = Dependency::chained(vec![Dependency::file(&path), Dependency::tag(["settings"])]);
    cache
        .set_with_dependency("settings", &json!({"a": 1}), Ttl::NEVER, dependency)
        .unwrap();
    assert!(cache.exists("settings").unwrap());

    // The file is untouched; only the tag changes.
    cache.invalidate_tags(&["settings"]).unwrap();
    assert!(!cache.exists("settings").unwrap());
}

#[test]
fn test_query_dependency_follows_source() {
    let version = Arc::new(AtomicI64::new(1));
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = versioned_cache(version.clone(), calls);

    let dependency = Dependency::query("db", "SELECT MAX(version) FROM prices", vec![]);
    cache
        .set_with_dependency("prices", &vec![10, 20], Ttl::NEVER, dependency)
        .unwrap();
    assert!(cache.exists("prices").unwrap());

    version.store(2, Ordering::SeqCst);
    assert!(!cache.exists("prices").unwrap());
}

#[test]
fn test_reuse_memoization_is_scoped_to_unit_of_work() {
    let version = Arc::new(AtomicI64::new(1));
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = versioned_cache(version, calls.clone());
    let dependency = Dependency::query("db", "SELECT COUNT(*) FROM users", vec![json!(1)]).reusable();

    let request = UnitOfWork::begin();
    let scoped = cache.scoped(&request);
    scoped
        .set_with_dependency("page1", &"a", Ttl::NEVER, dependency.clone())
        .unwrap();
    assert_eq!(scoped.get::<String, _>("page1").unwrap().as_deref(), Some("a"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    request.end();

    let next_request = UnitOfWork::begin();
    let scoped = cache.scoped(&next_request);
    assert_eq!(scoped.get::<String, _>("page1").unwrap().as_deref(), Some("a"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    next_request.end();
}

#[test]
fn test_reuse_sees_stale_payload_within_unit_of_work() {
    let version = Arc::new(AtomicI64::new(1));
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = versioned_cache(version.clone(), calls);
    let dependency = Dependency::query("db", "SELECT 1", vec![]).reusable();

    let unit = UnitOfWork::begin();
    let scoped = cache.scoped(&unit);
    scoped
        .set_with_dependency("k", &1, Ttl::NEVER, dependency)
        .unwrap();

    version.store(2, Ordering::SeqCst);
    // Memoized for the rest of this unit of work.
    assert!(scoped.exists("k").unwrap());

    unit.clear();
    assert!(!scoped.exists("k").unwrap());
}

#[test]
fn test_unscoped_operations_do_not_memoize() {
    let version = Arc::new(AtomicI64::new(1));
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = versioned_cache(version, calls.clone());
    let dependency = Dependency::query("db", "SELECT 1", vec![]).reusable();

    cache
        .set_with_dependency("k", &1, Ttl::NEVER, dependency)
        .unwrap();
    cache.get::<i32, _>("k").unwrap();
    cache.get::<i32, _>("k").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_callback_dependency() {
    let generation = Arc::new(AtomicI64::new(0));
    let current = generation.clone();
    let cache = Cache::builder()
        .callback("generation", move |args: &Value| {
            let scope = args["scope"].as_str().unwrap_or_default().to_string();
            Ok(json!({"scope": scope, "generation": current.load(Ordering::SeqCst)}))
        })
        .build()
        .unwrap();

    cache
        .set_with_dependency(
            "report",
            &"rendered",
            Ttl::NEVER,
            Dependency::callback("generation", json!({"scope": "reports"})),
        )
        .unwrap();
    assert!(cache.exists("report").unwrap());

    generation.fetch_add(1, Ordering::SeqCst);
    assert!(!cache.exists("report").unwrap());
}

#[test]
fn test_directory_dependency() {
    let temp_dir = TempDir::new().unwrap();
    fs::create_dir(temp_dir.path().join("templates")).unwrap();
    fs::write(temp_dir.path().join("templates/index.html"), "<p>").unwrap();

    let cache = Cache::in_memory();
    cache
        .set_with_dependency(
            "compiled",
            &"index",
            Ttl::NEVER,
            Dependency::directory(temp_dir.path(), Some(1), Some("*.html")),
        )
        .unwrap();
    assert!(cache.exists("compiled").unwrap());

    fs::write(temp_dir.path().join("templates/about.html"), "<p>").unwrap();
    assert!(!cache.exists("compiled").unwrap());
}

#[test]
fn test_missing_group_name_fails_fast() {
    let cache = Cache::in_memory();
    let err = cache
        .set_with_dependency("k", &1, Ttl::NEVER, Dependency::group(""))
        .unwrap_err();
    assert!(matches!(err, CacheError::Configuration { .. }));
}

#[test]
fn test_dependency_survives_compressed_codec() {
    let cache = Cache::builder()
        .serializer(depcache::SerializerKind::CompressedJson)
        .build()
        .unwrap();
    cache
        .set_with_dependency("k", &"v".repeat(500), Ttl::NEVER, Dependency::tag(["t"]))
        .unwrap();
    assert_eq!(cache.get::<String, _>("k").unwrap(), Some("v".repeat(500)));

    cache.invalidate_tags(&["t"]).unwrap();
    assert_eq!(cache.get::<String, _>("k").unwrap(), None);
}
