//! Backend that stores nothing

use super::StorageBackend;
use crate::{Result, Ttl};

/// Accepts every write and never returns anything.
///
/// Useful to switch caching off without touching call sites.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackend;

impl StorageBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn get_value(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn set_value(&self, _key: &str, _value: &[u8], _ttl: Ttl) -> Result<bool> {
        Ok(true)
    }

    fn add_value(&self, _key: &str, _value: &[u8], _ttl: Ttl) -> Result<bool> {
        Ok(true)
    }

    fn delete_value(&self, _key: &str) -> Result<bool> {
        Ok(true)
    }

    fn flush_values(&self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_backend_never_hits() {
        let backend = NullBackend;
        assert!(backend.set_value("k", b"v", Ttl::NEVER).unwrap());
        assert_eq!(backend.get_value("k").unwrap(), None);
        assert!(backend.add_value("k", b"v", Ttl::NEVER).unwrap());
    }
}
