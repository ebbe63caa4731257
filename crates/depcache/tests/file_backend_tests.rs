//! The cache façade over the file backend

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use depcache::{
    BackendKind, Cache, CacheConfig, Dependency, FileBackend, FileBackendConfig, SerializerKind,
    StorageBackend, Ttl,
};
use tempfile::TempDir;

fn file_config(temp_dir: &TempDir, directory_level: usize) -> CacheConfig {
    CacheConfig {
        backend: BackendKind::File,
        file: FileBackendConfig {
            cache_path: Some(temp_dir.path().join("cache")),
            directory_level,
            ..FileBackendConfig::default()
        },
        ..CacheConfig::default()
    }
}

#[test]
fn test_entries_survive_a_new_cache_instance() {
    let temp_dir = TempDir::new().unwrap();

    let first = Cache::from_config(file_config(&temp_dir, 2)).unwrap();
    first
        .set_with_dependency("greeting", &"hello", Ttl::NEVER, Dependency::tag(["i18n"]))
        .unwrap();
    drop(first);

    let second = Cache::from_config(file_config(&temp_dir, 2)).unwrap();
    assert_eq!(
        second.get::<String, _>("greeting").unwrap().as_deref(),
        Some("hello")
    );

    // Stamps live in the same backend, so invalidation is visible too.
    second.invalidate_tags(&["i18n"]).unwrap();
    assert_eq!(second.get::<String, _>("greeting").unwrap(), None);
}

#[test]
fn test_file_ttl_and_cleanup() {
    let temp_dir = TempDir::new().unwrap();
    let backend = Arc::new(FileBackend::new(temp_dir.path()).unwrap());
    let cache = Cache::new(backend.clone());

    cache.set("short", &1, Ttl::seconds(1)).unwrap();
    cache.set("long", &2, Ttl::NEVER).unwrap();
    assert_eq!(cache.get::<i32, _>("short").unwrap(), Some(1));

    thread::sleep(Duration::from_millis(1100));
    assert_eq!(cache.get::<i32, _>("short").unwrap(), None);
    assert_eq!(backend.cleanup_expired().unwrap(), 1);
    assert_eq!(cache.get::<i32, _>("long").unwrap(), Some(2));
}

#[test]
fn test_add_respects_live_files() {
    let temp_dir = TempDir::new().unwrap();
    let cache = Cache::from_config(file_config(&temp_dir, 1)).unwrap();

    assert!(cache.add(("user", 1), &"first", Ttl::NEVER).unwrap());
    assert!(!cache.add(("user", 1), &"second", Ttl::NEVER).unwrap());
    assert_eq!(
        cache.get::<String, _>(("user", 1)).unwrap().as_deref(),
        Some("first")
    );
}

#[test]
fn test_flush_clears_directory() {
    let temp_dir = TempDir::new().unwrap();
    let cache = Cache::from_config(file_config(&temp_dir, 1)).unwrap();

    let failed = cache
        .set_multiple((0..20).map(|i| (i, i * 10)), Ttl::NEVER)
        .unwrap();
    assert!(failed.is_empty());
    assert!(cache.flush().unwrap());
    for i in 0..20 {
        assert_eq!(cache.get::<i32, _>(i).unwrap(), None);
    }
    assert!(temp_dir.path().join("cache").exists());
}

#[test]
fn test_corrupt_entry_is_a_miss() {
    let temp_dir = TempDir::new().unwrap();
    let backend = Arc::new(FileBackend::new(temp_dir.path()).unwrap());
    let cache = Cache::new(backend.clone());

    let storage_key = cache.build_key("k");
    backend
        .set_value(&storage_key, b"not an envelope", Ttl::NEVER)
        .unwrap();
    assert_eq!(cache.get::<String, _>("k").unwrap(), None);
}

#[test]
fn test_compressed_values_on_disk() {
    let temp_dir = TempDir::new().unwrap();
    let config = CacheConfig {
        serializer: SerializerKind::CompressedJson,
        ..file_config(&temp_dir, 0)
    };
    let cache = Cache::from_config(config).unwrap();

    let rows: Vec<String> = (0..200).map(|i| format!("row {}", i)).collect();
    cache.set("rows", &rows, Ttl::NEVER).unwrap();
    assert_eq!(cache.get::<Vec<String>, _>("rows").unwrap(), Some(rows));
}

#[test]
fn test_bad_file_settings_fail_at_build() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = file_config(&temp_dir, 1);
    config.file.file_suffix.clear();

    let err = Cache::from_config(config).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_overlong_and_most_negative_ttls() {
    let temp_dir = TempDir::new().unwrap();
    let cache = Cache::from_config(file_config(&temp_dir, 1)).unwrap();

    assert!(cache.set("forever", &1, Ttl::seconds(i64::MAX)).unwrap());
    cache.set("gone", &2, Ttl::seconds(i64::MIN)).unwrap();

    assert_eq!(cache.get::<i32, _>("forever").unwrap(), Some(1));
    assert_eq!(cache.get::<i32, _>("gone").unwrap(), None);
}
