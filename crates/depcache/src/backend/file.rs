//! File-per-key backend
//!
//! Each entry is one file: an 8-byte big-endian expiry (unix milliseconds,
//! `0` for never) followed by the payload. Files are written to a temporary
//! name and renamed into place, so readers see a whole entry or none.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::StorageBackend;
use crate::config::FileBackendConfig;
use crate::ttl::epoch_expired;
use crate::{CacheError, Result, Ttl};

const HEADER_LEN: usize = 8;

static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Stores entries as files under a cache directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    cache_dir: PathBuf,
    directory_level: usize,
    file_suffix: String,
}

impl FileBackend {
    /// Create a file backend rooted at `cache_dir`
    ///
    /// # Errors
    ///
    /// Returns error if the cache directory cannot be created
    pub fn new(cache_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(&FileBackendConfig {
            cache_path: Some(cache_dir.as_ref().to_path_buf()),
            ..FileBackendConfig::default()
        })
    }

    /// Create a file backend from configuration
    pub fn with_config(config: &FileBackendConfig) -> Result<Self> {
        config.validate()?;
        let cache_dir = config.resolved_path()?;

        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).map_err(|e| CacheError::path(&cache_dir, e))?;
            debug!("Created cache directory: {}", cache_dir.display());
        }

        Ok(Self {
            cache_dir,
            directory_level: config.directory_level,
            file_suffix: config.file_suffix.clone(),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Remove expired entries, returning how many files were deleted
    pub fn cleanup_expired(&self) -> Result<usize> {
        let now = SystemTime::now();
        let mut cleaned = 0;

        for path in self.entry_files() {
            match read_header(&path) {
                Ok(Some(expire_at)) if epoch_expired(expire_at, now) => {
                    if let Err(e) = fs::remove_file(&path) {
                        warn!("Failed to remove expired cache entry: {}", e);
                    } else {
                        cleaned += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable cache entry {}: {}", path.display(), e),
            }
        }

        debug!("Cleaned up {} expired cache entries", cleaned);
        Ok(cleaned)
    }

    fn entry_files(&self) -> impl Iterator<Item = PathBuf> + '_ {
        WalkDir::new(&self.cache_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.ends_with(&self.file_suffix))
            })
    }

    /// Convert a storage key to a file path
    fn key_to_path(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));

        let sanitized: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        // Sanitizing can merge distinct keys, and long keys overflow file name limits.
        let file_stem = if sanitized == key && key.len() <= 128 {
            sanitized
        } else {
            let mut stem: String = sanitized.chars().take(64).collect();
            stem.push('-');
            stem.push_str(&digest[..16]);
            stem
        };

        let mut path = self.cache_dir.clone();
        for level in 0..self.directory_level {
            path.push(&digest[level * 2..level * 2 + 2]);
        }
        path.push(format!("{}{}", file_stem, self.file_suffix));
        path
    }

    fn read_entry(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::path(path, e)),
        };
        if bytes.len() < HEADER_LEN {
            return Err(CacheError::storage(format!(
                "truncated cache entry {}",
                path.display()
            )));
        }

        let (header, payload) = bytes.split_at(HEADER_LEN);
        if epoch_expired(decode_header(header), SystemTime::now()) {
            return Ok(None);
        }
        Ok(Some(payload.to_vec()))
    }

    fn write_entry(&self, path: &Path, value: &[u8], ttl: Ttl) -> Result<bool> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| CacheError::path(parent, e))?;
            }
        }

        let expire_at = ttl.expire_epoch_millis(SystemTime::now());
        let mut contents = Vec::with_capacity(HEADER_LEN + value.len());
        contents.extend_from_slice(&expire_at.to_be_bytes());
        contents.extend_from_slice(value);

        let temp = path.with_extension(format!(
            "tmp{}.{}",
            std::process::id(),
            TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&temp, contents).map_err(|e| CacheError::path(&temp, e))?;
        if let Err(e) = fs::rename(&temp, path) {
            let _ = fs::remove_file(&temp);
            return Err(CacheError::path(path, e));
        }
        Ok(true)
    }
}

fn decode_header(header: &[u8]) -> u64 {
    let mut raw = [0u8; HEADER_LEN];
    raw.copy_from_slice(&header[..HEADER_LEN]);
    u64::from_be_bytes(raw)
}

fn read_header(path: &Path) -> std::io::Result<Option<u64>> {
    use std::io::Read;

    let mut header = [0u8; HEADER_LEN];
    let mut file = fs::File::open(path)?;
    match file.read_exact(&mut header) {
        Ok(()) => Ok(Some(u64::from_be_bytes(header))),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

impl StorageBackend for FileBackend {
    fn name(&self) -> &str {
        "file"
    }

    fn get_value(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.read_entry(&self.key_to_path(key))
    }

    fn set_value(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<bool> {
        let path = self.key_to_path(key);
        self.write_entry(&path, value, ttl)
    }

    fn add_value(&self, key: &str, value: &[u8], ttl: Ttl) -> Result<bool> {
        let path = self.key_to_path(key);
        if self.read_entry(&path)?.is_some() {
            return Ok(false);
        }
        self.write_entry(&path, value, ttl)
    }

    fn delete_value(&self, key: &str) -> Result<bool> {
        let path = self.key_to_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::path(path, e)),
        }
    }

    fn flush_values(&self) -> Result<bool> {
        if self.cache_dir.exists() {
            fs::remove_dir_all(&self.cache_dir)
                .map_err(|e| CacheError::path(&self.cache_dir, e))?;
        }
        fs::create_dir_all(&self.cache_dir).map_err(|e| CacheError::path(&self.cache_dir, e))?;

        debug!("Cleared all cache entries in {}", self.cache_dir.display());
        Ok(true)
    }
}
