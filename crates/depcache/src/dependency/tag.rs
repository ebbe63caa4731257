//! Version stamps for tag and group dependencies

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{Cache, CacheKey, Result, Ttl};

/// Marker for tag stamp keys
pub const TAG_MARKER: &str = "depcache.tag";

/// Marker for group stamp keys
pub const GROUP_MARKER: &str = "depcache.group";

static STAMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Synthetic key the stamp for `name` lives under.
pub fn stamp_key(marker: &str, name: &str) -> CacheKey {
    CacheKey::from((marker, name))
}

/// A new stamp: `<unix nanos>.<sequence>`.
///
/// The sequence keeps stamps distinct even when the clock does not move
/// between two invalidations.
pub fn fresh_stamp() -> String {
    let nanos = Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| Utc::now().timestamp_micros() * 1000);
    format!("{}.{}", nanos, STAMP_SEQUENCE.fetch_add(1, Ordering::Relaxed))
}

/// Current stamps for `names`, creating and storing the missing ones.
///
/// Missing stamps are created with `add`, so when two evaluations race in one
/// process the loser re-reads the winner's stamp instead of overwriting it.
pub fn current_stamps(cache: &Cache, marker: &str, names: &[String]) -> Result<Value> {
    let keys: Vec<CacheKey> = names.iter().map(|name| stamp_key(marker, name)).collect();
    let mut found = cache.get_multiple::<String, _, _>(keys.iter())?;

    let mut stamps = BTreeMap::new();
    for (name, key) in names.iter().zip(&keys) {
        let stamp = match found.remove(key).flatten() {
            Some(stamp) => stamp,
            None => create_stamp(cache, key)?,
        };
        stamps.insert(name.clone(), Value::String(stamp));
    }
    Ok(Value::Object(stamps.into_iter().collect()))
}

fn create_stamp(cache: &Cache, key: &CacheKey) -> Result<String> {
    let stamp = fresh_stamp();
    if cache.add(key, &stamp, Ttl::NEVER)? {
        debug!("Created stamp for {}", key);
        return Ok(stamp);
    }
    match cache.get::<String, _>(key)? {
        Some(existing) => Ok(existing),
        None => {
            // The backend refused the stamp; dependents will compare as changed.
            warn!("Could not persist stamp for {}", key);
            Ok(stamp)
        }
    }
}

/// Write fresh stamps for `names`, invalidating every entry that captured
/// the old ones. Returns whether every stamp was written.
pub fn invalidate(cache: &Cache, marker: &str, names: &[String]) -> Result<bool> {
    let items: Vec<(CacheKey, String)> = names
        .iter()
        .map(|name| (stamp_key(marker, name), fresh_stamp()))
        .collect();
    let failed = cache.set_multiple(items, Ttl::NEVER)?;
    if !failed.is_empty() {
        warn!("Failed to write {} {} stamps", failed.len(), marker);
    }
    debug!("Invalidated {} {} stamps", names.len() - failed.len(), marker);
    Ok(failed.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_stamps_are_distinct() {
        let a = fresh_stamp();
        let b = fresh_stamp();
        assert_ne!(a, b);
    }

    #[test]
    fn test_stamps_are_created_once() {
        let cache = Cache::in_memory();
        let names = vec!["users".to_string(), "posts".to_string()];

        let first = current_stamps(&cache, TAG_MARKER, &names).unwrap();
        let second = current_stamps(&cache, TAG_MARKER, &names).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_invalidate_replaces_stamps() {
        let cache = Cache::in_memory();
        let names = vec!["users".to_string()];

        let before = current_stamps(&cache, TAG_MARKER, &names).unwrap();
        assert!(invalidate(&cache, TAG_MARKER, &names).unwrap());
        let after = current_stamps(&cache, TAG_MARKER, &names).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_tag_and_group_namespaces_are_separate() {
        let cache = Cache::in_memory();
        let names = vec!["shared".to_string()];

        let tag = current_stamps(&cache, TAG_MARKER, &names).unwrap();
        invalidate(&cache, GROUP_MARKER, &names).unwrap();
        assert_eq!(current_stamps(&cache, TAG_MARKER, &names).unwrap(), tag);
    }
}
