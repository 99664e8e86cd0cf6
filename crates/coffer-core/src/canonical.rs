//! Canonical CBOR encoding for deterministic serialization.
//!
//! This module implements RFC 8949 Core Deterministic Encoding:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats (timestamps are i64 milliseconds)
//!
//! Certificates and manifests are signed over their canonical bytes, so the
//! same content must produce identical bytes on every platform.

use ciborium::value::Value;

use crate::error::CoreError;

/// Encode a CBOR Value to canonical bytes.
pub fn encode_canonical(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value);
    buf
}

/// Build a canonical map from integer-keyed fields.
pub fn encode_fields(fields: Vec<(u64, Value)>) -> Vec<u8> {
    let entries = fields
        .into_iter()
        .map(|(k, v)| (Value::Integer(k.into()), v))
        .collect();
    encode_canonical(&Value::Map(entries))
}

/// Decode bytes produced by [`encode_fields`].
pub fn decode_fields(bytes: &[u8]) -> Result<Fields, CoreError> {
    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?;

    match value {
        Value::Map(entries) => {
            let mut fields = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                let key = match k {
                    Value::Integer(i) => u64::try_from(i128::from(i))
                        .map_err(|_| CoreError::DecodingError("negative map key".into()))?,
                    _ => return Err(CoreError::DecodingError("non-integer map key".into())),
                };
                fields.push((key, v));
            }
            Ok(Fields(fields))
        }
        _ => Err(CoreError::DecodingError("expected map".into())),
    }
}

/// Integer-keyed map fields with typed accessors.
#[derive(Debug, Clone)]
pub struct Fields(Vec<(u64, Value)>);

impl Fields {
    fn get(&self, key: u64) -> Option<&Value> {
        self.0.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    fn require(&self, key: u64) -> Result<&Value, CoreError> {
        self.get(key)
            .ok_or_else(|| CoreError::MalformedCertificate(format!("missing field {}", key)))
    }

    /// Read a signed integer.
    pub fn int(&self, key: u64) -> Result<i64, CoreError> {
        match self.require(key)? {
            Value::Integer(i) => i64::try_from(i128::from(*i))
                .map_err(|_| CoreError::MalformedCertificate(format!("field {} overflow", key))),
            _ => Err(CoreError::MalformedCertificate(format!("field {} not an integer", key))),
        }
    }

    /// Read an unsigned integer.
    pub fn uint(&self, key: u64) -> Result<u64, CoreError> {
        let n = self.int(key)?;
        u64::try_from(n)
            .map_err(|_| CoreError::MalformedCertificate(format!("field {} is negative", key)))
    }

    /// Read a nullable unsigned integer.
    pub fn opt_uint(&self, key: u64) -> Result<Option<u64>, CoreError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.uint(key).map(Some),
        }
    }

    /// Read a text string.
    pub fn text(&self, key: u64) -> Result<&str, CoreError> {
        match self.require(key)? {
            Value::Text(s) => Ok(s),
            _ => Err(CoreError::MalformedCertificate(format!("field {} not text", key))),
        }
    }

    /// Read a nullable text string.
    pub fn opt_text(&self, key: u64) -> Result<Option<&str>, CoreError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Text(s)) => Ok(Some(s)),
            Some(_) => Err(CoreError::MalformedCertificate(format!("field {} not text", key))),
        }
    }

    /// Read a byte string.
    pub fn bytes(&self, key: u64) -> Result<&[u8], CoreError> {
        match self.require(key)? {
            Value::Bytes(b) => Ok(b),
            _ => Err(CoreError::MalformedCertificate(format!("field {} not bytes", key))),
        }
    }

    /// Read a fixed-size byte string.
    pub fn byte_array<const N: usize>(&self, key: u64) -> Result<[u8; N], CoreError> {
        self.bytes(key)?.try_into().map_err(|_| {
            CoreError::MalformedCertificate(format!("field {} must be {} bytes", key, N))
        })
    }
}

/// Text value, or null when absent.
pub fn opt_text_value(s: Option<String>) -> Value {
    match s {
        Some(s) => Value::Text(s),
        None => Value::Null,
    }
}

/// Recursively encode a CBOR value.
fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => {
            encode_integer(buf, *i);
        }
        Value::Bytes(b) => {
            encode_bytes(buf, b);
        }
        Value::Text(s) => {
            encode_text(buf, s);
        }
        Value::Array(arr) => {
            encode_array(buf, arr);
        }
        Value::Map(entries) => {
            encode_map_canonical(buf, entries);
        }
        Value::Bool(b) => {
            buf.push(if *b { 0xf5 } else { 0xf4 });
        }
        Value::Null => {
            buf.push(0xf6);
        }
        Value::Float(_) => {
            panic!("floats not supported in canonical encoding");
        }
        _ => {
            panic!("unsupported CBOR value type");
        }
    }
}

/// Encode a CBOR integer (major types 0 and 1).
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n = i128::from(i);

    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        let abs = (-1 - n) as u64;
        encode_uint(buf, 1, abs);
    }
}

/// Encode an unsigned integer with the given major type.
fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffffffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    encode_uint(buf, 2, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn encode_text(buf: &mut Vec<u8>, s: &str) {
    encode_uint(buf, 3, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

fn encode_array(buf: &mut Vec<u8>, arr: &[Value]) {
    encode_uint(buf, 4, arr.len() as u64);
    for item in arr {
        encode_value_to(buf, item);
    }
}

/// Encode a map canonically (major type 5).
///
/// Keys are sorted by their encoded byte comparison.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut key_value_pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| {
            let mut key_buf = Vec::new();
            encode_value_to(&mut key_buf, k);
            (key_buf, v)
        })
        .collect();

    key_value_pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, key_value_pairs.len() as u64);
    for (key_bytes, value) in key_value_pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}
