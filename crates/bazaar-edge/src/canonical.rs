//! Canonical JSON body encoding.
//!
//! Two bodies that differ only in whitespace or key order must hash
//! identically; two semantically different bodies must not. The canonical
//! form is the JSON value re-emitted with object keys sorted recursively
//! (byte order, which is code-point order for UTF-8) and minimal
//! whitespace. Arrays keep their order. Duplicate keys are rejected at the
//! parse step — last-wins would let an attacker smuggle a second value past
//! the signature.

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum CanonicalError {
    #[error("body is not canonicalizable JSON: {0}")]
    Invalid(String),
}

/// A JSON value parsed with duplicate-key rejection.
struct CheckedValue(Value);

impl<'de> Deserialize<'de> for CheckedValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AnyVisitor;

        impl<'de> Visitor<'de> for AnyVisitor {
            type Value = CheckedValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("any JSON value")
            }

            fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E> {
                Ok(CheckedValue(Value::Bool(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
                Ok(CheckedValue(Value::from(v)))
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
                Ok(CheckedValue(Value::from(v)))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
                Ok(CheckedValue(Value::from(v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(CheckedValue(Value::String(v.to_owned())))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
                Ok(CheckedValue(Value::String(v)))
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(CheckedValue(Value::Null))
            }

            fn visit_none<E>(self) -> Result<Self::Value, E> {
                Ok(CheckedValue(Value::Null))
            }

            fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
                CheckedValue::deserialize(d)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut items = Vec::new();
                while let Some(CheckedValue(item)) = seq.next_element()? {
                    items.push(item);
                }
                Ok(CheckedValue(Value::Array(items)))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut object = serde_json::Map::new();
                while let Some(key) = map.next_key::<String>()? {
                    if object.contains_key(&key) {
                        return Err(de::Error::custom(format!("duplicate key `{key}`")));
                    }
                    let CheckedValue(value) = map.next_value()?;
                    object.insert(key, value);
                }
                Ok(CheckedValue(Value::Object(object)))
            }
        }

        deserializer.deserialize_any(AnyVisitor)
    }
}

/// Emit the canonical byte form: sorted keys, minimal whitespace.
fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<(), CanonicalError> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)
                    .map_err(|e| CanonicalError::Invalid(e.to_string()))?;
                out.push(b':');
                write_canonical(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        other => serde_json::to_writer(&mut *out, other)
            .map_err(|e| CanonicalError::Invalid(e.to_string()))?,
    }
    Ok(())
}

/// Parse a body and produce `(parsed value, canonical bytes)`.
///
/// The parsed value is what the handler must consume — re-reading the raw
/// body would let it see a different structure than the one that was hashed.
pub fn canonicalize(body: &[u8]) -> Result<(Value, Vec<u8>), CanonicalError> {
    let CheckedValue(value) =
        serde_json::from_slice(body).map_err(|e| CanonicalError::Invalid(e.to_string()))?;
    let mut canonical = Vec::with_capacity(body.len());
    write_canonical(&value, &mut canonical)?;
    Ok((value, canonical))
}

/// Lowercase hex SHA-256 of the canonical body; the empty body hashes the
/// empty byte string.
pub fn body_digest(body: &[u8]) -> Result<(Option<Value>, String), CanonicalError> {
    if body.is_empty() {
        return Ok((None, hex::encode(Sha256::digest(b""))));
    }
    let (value, canonical) = canonicalize(body)?;
    Ok((Some(value), hex::encode(Sha256::digest(&canonical))))
}
