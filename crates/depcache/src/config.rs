//! Cache configuration

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::{CacheError, Result, Ttl};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "DEPCACHE";

/// Deepest fan-out the file backend accepts
pub const MAX_DIRECTORY_LEVEL: usize = 8;

/// Value codec selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializerKind {
    #[default]
    Json,
    CompressedJson,
    /// Strings stored as-is; cannot carry dependencies
    Raw,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Memory,
    File,
    Null,
}

/// File backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileBackendConfig {
    /// Cache directory; defaults to the platform cache dir
    pub cache_path: Option<PathBuf>,
    /// Number of fan-out subdirectory levels
    pub directory_level: usize,
    /// Suffix of every cache file
    pub file_suffix: String,
}

impl Default for FileBackendConfig {
    fn default() -> Self {
        Self {
            cache_path: None,
            directory_level: 1,
            file_suffix: ".bin".to_string(),
        }
    }
}

impl FileBackendConfig {
    pub fn validate(&self) -> Result<()> {
        if self.file_suffix.is_empty() {
            return Err(CacheError::configuration(
                "file.file_suffix",
                "must not be empty",
            ));
        }
        if self.directory_level > MAX_DIRECTORY_LEVEL {
            return Err(CacheError::configuration(
                "file.directory_level",
                format!("must be at most {}", MAX_DIRECTORY_LEVEL),
            ));
        }
        Ok(())
    }

    /// The configured cache path, or `<platform cache dir>/depcache`
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match &self.cache_path {
            Some(path) => Ok(path.clone()),
            None => dirs::cache_dir()
                .map(|dir| dir.join("depcache"))
                .ok_or_else(|| {
                    CacheError::configuration(
                        "file.cache_path",
                        "no platform cache directory; set a cache path",
                    )
                }),
        }
    }
}

/// Cache instance configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Namespace prepended to every storage key
    pub key_prefix: String,
    /// Ttl in seconds used when an operation asks for the default
    pub default_ttl: i64,
    pub serializer: SerializerKind,
    /// Wrap values in an envelope so dependencies can be attached
    pub track_dependencies: bool,
    pub backend: BackendKind,
    pub file: FileBackendConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            default_ttl: 0,
            serializer: SerializerKind::Json,
            track_dependencies: true,
            backend: BackendKind::Memory,
            file: FileBackendConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from an optional file layered under
    /// `DEPCACHE_*` environment variables (nested fields use `__`, e.g.
    /// `DEPCACHE_FILE__DIRECTORY_LEVEL`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(false));
        }
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| CacheError::configuration("config", e.to_string()))?;

        let loaded: CacheConfig = config
            .try_deserialize()
            .map_err(|e| CacheError::configuration("config", e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn default_ttl(&self) -> Ttl {
        Ttl::seconds(self.default_ttl)
    }

    /// Reject combinations that cannot work at runtime
    pub fn validate(&self) -> Result<()> {
        if self.serializer == SerializerKind::Raw && self.track_dependencies {
            return Err(CacheError::configuration(
                "serializer",
                "the raw serializer cannot carry dependencies; disable track_dependencies",
            ));
        }
        if self.default_ttl < 0 {
            return Err(CacheError::configuration(
                "default_ttl",
                "must be zero (never expire) or positive",
            ));
        }
        if self.backend == BackendKind::File {
            self.file.validate()?;
        }
        Ok(())
    }
}
