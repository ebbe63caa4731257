//! Logical cache keys and their normalization into storage keys

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{CacheError, Result};

/// Longest raw key that is stored without hashing.
pub const MAX_PLAIN_KEY_LEN: usize = 32;

/// A logical cache key.
///
/// Scalars and ordered, nested structures are both valid keys. Maps keep a
/// stable (sorted) field order so that equal keys always normalize equally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheKey {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<CacheKey>),
    Map(BTreeMap<String, CacheKey>),
}

impl CacheKey {
    /// Convert arbitrary serde data into a key.
    ///
    /// Fails for data with no stable canonical form (floats, maps keyed by
    /// non-strings, integers beyond `i64`).
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let value = serde_json::to_value(value)
            .map_err(|e| CacheError::serialization(format!("unsupported key: {}", e)))?;
        Self::from_json(value)
    }

    fn from_json(value: serde_json::Value) -> Result<Self> {
        use serde_json::Value;

        Ok(match value {
            Value::Null => CacheKey::Null,
            Value::Bool(b) => CacheKey::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => CacheKey::Int(i),
                None => {
                    return Err(CacheError::serialization(format!(
                        "unsupported numeric key component: {}",
                        n
                    )))
                }
            },
            Value::String(s) => CacheKey::Text(s),
            Value::Array(items) => CacheKey::List(
                items
                    .into_iter()
                    .map(Self::from_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Object(fields) => CacheKey::Map(
                fields
                    .into_iter()
                    .map(|(k, v)| Ok((k, Self::from_json(v)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?,
            ),
        })
    }

    /// Canonical byte form used for hashing.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        // Every variant serializes; maps are BTreeMaps, so field order is fixed.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// The raw text when this key qualifies for the unhashed fast path.
    fn plain(&self) -> Option<&str> {
        match self {
            CacheKey::Text(s)
                if !s.is_empty()
                    && s.len() <= MAX_PLAIN_KEY_LEN
                    && s.bytes().all(|b| b.is_ascii_alphanumeric()) =>
            {
                Some(s)
            }
            _ => None,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Text(s) => write!(f, "{}", s),
            other => write!(f, "{}", String::from_utf8_lossy(&other.canonical_bytes())),
        }
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        CacheKey::Text(value.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        CacheKey::Text(value)
    }
}

impl From<&String> for CacheKey {
    fn from(value: &String) -> Self {
        CacheKey::Text(value.clone())
    }
}

impl From<&CacheKey> for CacheKey {
    fn from(value: &CacheKey) -> Self {
        value.clone()
    }
}

impl From<bool> for CacheKey {
    fn from(value: bool) -> Self {
        CacheKey::Bool(value)
    }
}

macro_rules! int_key {
    ($($t:ty),*) => {
        $(impl From<$t> for CacheKey {
            fn from(value: $t) -> Self {
                CacheKey::Int(value as i64)
            }
        })*
    };
}

int_key!(i8, i16, i32, i64, u8, u16, u32);

impl<T: Into<CacheKey>> From<Vec<T>> for CacheKey {
    fn from(items: Vec<T>) -> Self {
        CacheKey::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Clone + Into<CacheKey>> From<&[T]> for CacheKey {
    fn from(items: &[T]) -> Self {
        CacheKey::List(items.iter().cloned().map(Into::into).collect())
    }
}

impl<A: Into<CacheKey>, B: Into<CacheKey>> From<(A, B)> for CacheKey {
    fn from((a, b): (A, B)) -> Self {
        CacheKey::List(vec![a.into(), b.into()])
    }
}

impl<A: Into<CacheKey>, B: Into<CacheKey>, C: Into<CacheKey>> From<(A, B, C)> for CacheKey {
    fn from((a, b, c): (A, B, C)) -> Self {
        CacheKey::List(vec![a.into(), b.into(), c.into()])
    }
}

impl<V: Into<CacheKey>> From<BTreeMap<String, V>> for CacheKey {
    fn from(fields: BTreeMap<String, V>) -> Self {
        CacheKey::Map(fields.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

/// Turns logical keys into storage keys: `prefix + fragment`.
///
/// Two logically different keys map to different storage keys with
/// overwhelming probability (SHA-256); equal keys always map to the same one.
#[derive(Debug, Clone, Default)]
pub struct KeyNormalizer {
    prefix: String,
}

impl KeyNormalizer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the storage key for a logical key.
    pub fn build_key(&self, key: &CacheKey) -> String {
        match key.plain() {
            Some(plain) => format!("{}{}", self.prefix, plain),
            None => format!("{}{}", self.prefix, Self::digest(key)),
        }
    }

    /// Lowercase hex SHA-256 of the key's canonical form.
    pub fn digest(key: &CacheKey) -> String {
        hex::encode(Sha256::digest(key.canonical_bytes()))
    }
}
