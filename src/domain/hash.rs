//! Canonical content hashing.
//!
//! Every idempotency key and audit hash in the pipeline derives from
//! [`hash_of`]: the value is serialized with object keys sorted
//! lexicographically at every level (array order preserved) and the
//! result is hex SHA-256. Two structurally equal values hash equally
//! regardless of field declaration order.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Canonical hex SHA-256 of any serializable value.
///
/// # Errors
///
/// Returns [`crate::error::Error::Json`] if the value cannot be
/// represented as JSON.
pub fn hash_of<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_value(value)?;
    Ok(hash_value(&json))
}

/// Canonical hex SHA-256 of an already-parsed JSON value.
#[must_use]
pub fn hash_value(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde_json escaping for the key itself
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
