//! Content hashing for change detection and request deduplication.
//!
//! Payloads are normalized before hashing so that two logically identical
//! requests produce the same digest:
//! - object keys are sorted
//! - string values are trimmed (the ERP pads fixed-width fields)
//! - `null` object members are dropped

use crate::model::OperationKind;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Normalize a JSON payload into its canonical form.
#[must_use]
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut keys: Vec<&String> = obj.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                match &obj[key.as_str()] {
                    Value::Null => {}
                    v => {
                        out.insert(key.clone(), normalize(v));
                    }
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other.clone(),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// SHA256 of the normalized payload. Stored as a mapping's `snapshot_hash`.
#[must_use]
pub fn content_hash(value: &Value) -> String {
    sha256_hex(normalize(value).to_string().as_bytes())
}

/// Fingerprint of a request: the operation kind plus its normalized payload.
#[must_use]
pub fn request_fingerprint(kind: OperationKind, payload: &Value) -> String {
    let canonical = normalize(payload).to_string();
    sha256_hex(format!("{}\n{canonical}", kind.as_str()).as_bytes())
}

/// Idempotency key used when the caller supplies none: `<kind>:<content hash>`.
#[must_use]
pub fn derive_key(kind: OperationKind, payload: &Value) -> String {
    format!("{kind}:{}", content_hash(payload))
}

/// Check if an entity has changed since it was last synced.
///
/// Returns `true` if there is no stored hash or it differs from `current_hash`.
#[must_use]
pub fn has_changed(current_hash: &str, stored_hash: Option<&str>) -> bool {
    stored_hash.is_none_or(|h| h != current_hash)
}
