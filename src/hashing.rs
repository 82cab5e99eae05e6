//! Hashing System - SHA-256 for Deck Manifests
//!
//! Every packaged file is listed with its digest; the manifest itself is
//! hashed over canonical JSON so reordering keys never changes the hash.

use sha2::{Digest, Sha256};
use serde::Serialize;
use serde_json::{to_string, Value};

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    to_string(&sort_value(&v))
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_value(v)))
                    .collect(),
            )
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Hash of a manifest in canonical form
pub fn compute_manifest_hash<T: Serialize>(manifest: &T) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(manifest)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Fingerprint of what was asked for, independent of what the services returned.
/// request_hash = sha256(theme:count:template_id:template_version:engine_version)
pub fn compute_request_hash(
    theme: &str,
    count: usize,
    template_id: &str,
    template_version: &str,
    engine_version: &str,
) -> String {
    let combined = format!(
        "{}:{}:{}:{}:{}",
        theme, count, template_id, template_version, engine_version
    );
    sha256_hex(combined.as_bytes())
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorted() {
        let obj = json!({"z": 1, "a": 2, "m": {"y": true, "b": null}});
        let canonical = canonical_json(&obj).unwrap();
        assert_eq!(canonical, r#"{"a":2,"m":{"b":null,"y":true},"z":1}"#);
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_request_hash_depends_on_every_input() {
        let base = compute_request_hash("Pirates", 2, "bright_swiss", "1.0.0", "1.0.0");
        assert_eq!(base, compute_request_hash("Pirates", 2, "bright_swiss", "1.0.0", "1.0.0"));
        assert_ne!(base, compute_request_hash("Pirates", 3, "bright_swiss", "1.0.0", "1.0.0"));
        assert_ne!(base, compute_request_hash("Pirates", 2, "detailed", "1.0.0", "1.0.0"));
    }
}
