//! Modification-time payloads for file and directory dependencies

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use globset::{Glob, GlobMatcher};
use serde_json::Value;
use tracing::warn;
use walkdir::WalkDir;

use crate::{CacheError, Result};

fn mtime_nanos(modified: SystemTime) -> u64 {
    modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Modification time of `path` in nanoseconds, `null` when it does not exist.
pub fn file_payload(path: &Path) -> Result<Value> {
    match fs::metadata(path) {
        Ok(metadata) => {
            let modified = metadata.modified().map_err(|e| CacheError::path(path, e))?;
            Ok(Value::from(mtime_nanos(modified)))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Value::Null),
        Err(e) => Err(CacheError::path(path, e)),
    }
}

/// Compile a file name filter
pub fn name_matcher(pattern: &str) -> Result<GlobMatcher> {
    Glob::new(pattern)
        .map(|glob| glob.compile_matcher())
        .map_err(|e| CacheError::configuration("directory.name_filter", e.to_string()))
}

/// Modification times of every file under `root`, keyed by path.
///
/// `max_depth` counts directory levels below `root` (`Some(0)` only looks at
/// `root`'s own files). `null` when `root` does not exist.
pub fn directory_payload(
    root: &Path,
    max_depth: Option<usize>,
    name_filter: Option<&str>,
) -> Result<Value> {
    if !root.exists() {
        return Ok(Value::Null);
    }
    let matcher = name_filter.map(name_matcher).transpose()?;

    let mut walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
    if let Some(depth) = max_depth {
        walker = walker.max_depth(depth + 1);
    }

    let mut mtimes = BTreeMap::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(matcher) = &matcher {
            if !matcher.is_match(entry.file_name()) {
                continue;
            }
        }
        let modified = entry
            .metadata()
            .map_err(|e| metadata_error(entry.path(), e))?
            .modified()
            .map_err(|e| CacheError::path(entry.path(), e))?;
        mtimes.insert(
            entry.path().to_string_lossy().into_owned(),
            Value::from(mtime_nanos(modified)),
        );
    }

    Ok(Value::Object(mtimes.into_iter().collect()))
}

fn metadata_error(path: &Path, error: walkdir::Error) -> CacheError {
    CacheError::path(path, error.into())
}
