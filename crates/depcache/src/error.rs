//! Cache-related error types

use std::path::PathBuf;

use thiserror::Error;

/// Cache operation errors
///
/// Misses are never errors: they are `Ok(None)`. Rejected writes are
/// `Ok(false)`. What remains here is either a configuration problem, which is
/// surfaced to the caller, or a lower level failure that the façade degrades
/// into a miss or a failed write.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid cache configuration for {field}: {message}")]
    Configuration { field: String, message: String },

    #[error("Dependencies are disabled for this cache instance")]
    DependenciesDisabled,

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Deserialization error: {message}")]
    Deserialization { message: String },

    #[error("Compression error: {message}")]
    Compression { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Query source '{source_name}' failed: {message}")]
    Query {
        source_name: String,
        message: String,
    },

    #[error("Callback '{name}' failed: {message}")]
    Callback { name: String, message: String },

    #[error("IO error on {path}: {source}")]
    Path {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    /// Create a configuration error
    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        CacheError::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        CacheError::Serialization {
            message: message.into(),
        }
    }

    /// Create a deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        CacheError::Deserialization {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        CacheError::Storage {
            message: message.into(),
        }
    }

    /// Create a query failure for a named source
    pub fn query(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        CacheError::Query {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create a callback failure
    pub fn callback(name: impl Into<String>, message: impl Into<String>) -> Self {
        CacheError::Callback {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an IO error bound to a path
    pub fn path(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Path {
            path: path.into(),
            source,
        }
    }

    /// Whether this error comes from setup rather than from a single operation.
    ///
    /// Configuration errors propagate out of the façade; everything else is
    /// reported as a miss or a failed write.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CacheError::Configuration { .. } | CacheError::DependenciesDisabled
        )
    }
}

/// Re-export commonly used Result type
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(CacheError::configuration("group", "empty").is_configuration());
        assert!(CacheError::DependenciesDisabled.is_configuration());
        assert!(!CacheError::storage("disk full").is_configuration());
        assert!(!CacheError::query("db", "timeout").is_configuration());
    }

    #[test]
    fn test_error_messages() {
        let err = CacheError::configuration("file_suffix", "must not be empty");
        assert_eq!(
            err.to_string(),
            "Invalid cache configuration for file_suffix: must not be empty"
        );

        let err = CacheError::callback("user_count", "boom");
        assert_eq!(err.to_string(), "Callback 'user_count' failed: boom");
    }
}
