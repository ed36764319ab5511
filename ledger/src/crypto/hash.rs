//! # Hashing Utilities
//!
//! The ledger uses exactly one hash function: SHA-256. Block digests are
//! rendered as lowercase hex so they can be stored, compared, and shown to
//! auditors without any further encoding.
//!
//! ## Canonical preimages
//!
//! A block hash must be reproducible years later by a verifier that never
//! saw the original in-memory value. Hashing "whatever `serde_json` emits"
//! is not good enough: map ordering depends on crate features, and two
//! logically identical values could then produce different digests (a false
//! tampering alarm). [`canonical_json`] fixes the byte layout:
//!
//! - object keys sorted lexicographically at every depth
//! - no insignificant whitespace
//! - scalars encoded exactly as `serde_json` encodes them
//!
//! [`hash_canonical`] is the adapter every block digest goes through.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of the input data.
///
/// # Example
///
/// ```
/// use medledger::crypto::sha256;
///
/// let hash = sha256(b"medledger");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> Vec<u8> {
    sha256_array(data).to_vec()
}

/// Compute the SHA-256 hash and return a fixed-size array.
pub fn sha256_array(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// SHA-256 of `data`, hex encoded.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256_array(data))
}

/// Serialize `value` into its canonical JSON byte form.
///
/// # Panics
///
/// Panics if `value` cannot be represented as JSON (e.g. a map with
/// non-string keys). Every type the ledger hashes is plain data, so this
/// only fires on a programming error.
pub fn canonical_json<T: Serialize>(value: &T) -> Vec<u8> {
    let value = serde_json::to_value(value)
        .unwrap_or_else(|e| panic!("ledger value is not JSON-representable: {e}"));
    let mut out = Vec::with_capacity(256);
    write_canonical(&value, &mut out);
    out
}

/// Hash the canonical JSON form of `value`, hex encoded.
pub fn hash_canonical<T: Serialize>(value: &T) -> String {
    sha256_hex(&canonical_json(value))
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push(b'{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_scalar(&Value::String(key.clone()), out);
                out.push(b':');
                write_canonical(val, out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        scalar => write_scalar(scalar, out),
    }
}

fn write_scalar(value: &Value, out: &mut Vec<u8>) {
    // Writing a scalar into a Vec cannot fail.
    serde_json::to_writer(&mut *out, value)
        .unwrap_or_else(|e| panic!("failed to encode JSON scalar: {e}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sha256_known_vector() {
        let hash = sha256(b"");
        let expected =
            hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap();
        assert_eq!(hash, expected);
    }

    #[test]
    fn test_sha256_array_matches_vec() {
        let vec_result = sha256(b"test data");
        let arr_result = sha256_array(b"test data");
        assert_eq!(vec_result.as_slice(), arr_result.as_slice());
    }

    #[test]
    fn sha256_hex_is_lowercase_64_chars() {
        let h = sha256_hex(b"record");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn canonical_json_sorts_keys_at_every_depth() {
        let v = json!({ "b": 1, "a": { "z": true, "m": null }, "c": [ { "y": 1, "x": 2 } ] });
        let bytes = canonical_json(&v);
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"m":null,"z":true},"b":1,"c":[{"x":2,"y":1}]}"#
        );
    }

    #[test]
    fn canonical_hash_ignores_construction_order() {
        let mut first = serde_json::Map::new();
        first.insert("diagnosis".into(), json!("flu"));
        first.insert("treatment".into(), json!("rest"));

        let mut second = serde_json::Map::new();
        second.insert("treatment".into(), json!("rest"));
        second.insert("diagnosis".into(), json!("flu"));

        assert_eq!(
            hash_canonical(&Value::Object(first)),
            hash_canonical(&Value::Object(second))
        );
    }

    #[test]
    fn canonical_hash_escapes_strings() {
        let a = hash_canonical(&json!({ "note": "line\"one" }));
        let b = hash_canonical(&json!({ "note": "line'one" }));
        assert_ne!(a, b);
        let bytes = canonical_json(&json!({ "note": "q\"" }));
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"note":"q\""}"#);
    }

    #[test]
    fn canonical_hash_is_value_sensitive() {
        assert_ne!(
            hash_canonical(&json!({ "diagnosis": "flu" })),
            hash_canonical(&json!({ "diagnosis": "Flu" }))
        );
    }
}
