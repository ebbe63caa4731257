//! Value codecs and the stored envelope

use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use serde_json::Value;

use crate::dependency::Dependency;
use crate::{CacheError, Result};

/// Turns structured values into the bytes a backend stores.
pub trait Codec: Send + Sync {
    /// Codec name for logging
    fn name(&self) -> &str;

    fn encode(&self, value: &Value) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Value>;

    /// Whether this codec can carry structured data (and so dependencies).
    fn is_structured(&self) -> bool {
        true
    }
}

/// Plain JSON codec, the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CacheError::serialization(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::deserialization(e.to_string()))
    }
}

/// JSON compressed with zlib, for large values on slow backends.
#[derive(Debug, Clone, Copy)]
pub struct CompressedJsonCodec {
    level: u32,
}

impl CompressedJsonCodec {
    pub fn new(level: u32) -> Self {
        Self { level: level.min(9) }
    }
}

impl Default for CompressedJsonCodec {
    fn default() -> Self {
        Self::new(6)
    }
}

impl Codec for CompressedJsonCodec {
    fn name(&self) -> &str {
        "compressed_json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        let json = JsonCodec.encode(value)?;
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(self.level));
        encoder
            .write_all(&json)
            .map_err(|e| CacheError::Compression {
                message: e.to_string(),
            })?;
        encoder.finish().map_err(|e| CacheError::Compression {
            message: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let mut json = Vec::new();
        ZlibDecoder::new(bytes)
            .read_to_end(&mut json)
            .map_err(|e| CacheError::Compression {
                message: e.to_string(),
            })?;
        JsonCodec.decode(&json)
    }
}

/// Pass-through codec: stores UTF-8 strings as-is.
///
/// Only string values can be cached with it, and it cannot carry a
/// dependency envelope. Building a cache that tracks dependencies on top of
/// this codec is rejected as a configuration error.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    fn name(&self) -> &str {
        "raw"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        match value {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            other => Err(CacheError::serialization(format!(
                "raw codec only stores strings, got {}",
                json_kind(other)
            ))),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        String::from_utf8(bytes.to_vec())
            .map(Value::String)
            .map_err(|e| CacheError::deserialization(e.to_string()))
    }

    fn is_structured(&self) -> bool {
        false
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// What is physically written for one key: the value plus the evaluated
/// dependency, if any.
///
/// On the wire this is the two-element array `[value, dependencyOrNull]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub value: Value,
    pub dependency: Option<Dependency>,
}

impl Envelope {
    pub fn new(value: Value, dependency: Option<Dependency>) -> Self {
        Self { value, dependency }
    }

    pub fn into_value(self) -> Result<Value> {
        let dependency = match self.dependency {
            Some(dependency) => serde_json::to_value(dependency)?,
            None => Value::Null,
        };
        Ok(Value::Array(vec![self.value, dependency]))
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let mut items = match value {
            Value::Array(items) if items.len() == 2 => items,
            other => {
                return Err(CacheError::deserialization(format!(
                    "expected a two element envelope, got {}",
                    json_kind(&other)
                )))
            }
        };
        let dependency = match items.pop().unwrap_or(Value::Null) {
            Value::Null => None,
            raw => Some(
                serde_json::from_value(raw)
                    .map_err(|e| CacheError::deserialization(e.to_string()))?,
            ),
        };
        let value = items.pop().unwrap_or(Value::Null);
        Ok(Self { value, dependency })
    }

    pub fn encode(self, codec: &dyn Codec) -> Result<Vec<u8>> {
        codec.encode(&self.into_value()?)
    }

    pub fn decode(codec: &dyn Codec, bytes: &[u8]) -> Result<Self> {
        Self::from_value(codec.decode(bytes)?)
    }
}
