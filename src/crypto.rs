//! Hashing and canonical encoding for ConsentChain
//!
//! Every digest in the system is SHA-256 over a deterministic byte string.
//! Structured records are canonicalized to stable-key JSON before hashing so
//! that two honest nodes always derive identical leaf and block hashes.

use crate::error::Result;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

pub type Sha256Hash = [u8; 32];

/// Sentinel `previous_hash` carried by the genesis block.
pub const GENESIS_PREVIOUS_HASH: Sha256Hash = [0u8; 32];

pub fn sha256(bytes: &[u8]) -> Sha256Hash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Hash of the empty byte string; the Merkle root of a zero-record tree.
pub fn empty_hash() -> Sha256Hash {
    sha256(b"")
}

/// Combine two tree nodes: `H(left || right)` over the raw 32-byte digests.
pub fn hash_pair(left: &Sha256Hash, right: &Sha256Hash) -> Sha256Hash {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Canonical JSON: object keys sorted lexicographically at every depth,
/// compact separators. This is the only encoding ever hashed.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
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

pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let tree = serde_json::to_value(value)?;
    let mut out = String::new();
    write_canonical(&tree, &mut out);
    Ok(out.into_bytes())
}

/// Hash a structured record through its canonical encoding.
pub fn hash_record<T: Serialize>(record: &T) -> Result<Sha256Hash> {
    Ok(sha256(&canonical_bytes(record)?))
}

/// Serde helper rendering 32-byte digests as hex strings in JSON/TOML.
pub mod hex_hash {
    use super::Sha256Hash;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Sha256Hash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Sha256Hash, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected a 32-byte hex digest"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn canonical_encoding_sorts_keys() {
        let mut map = HashMap::new();
        map.insert("zebra", 1);
        map.insert("apple", 2);
        map.insert("mango", 3);

        let bytes = canonical_bytes(&map).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"apple":2,"mango":3,"zebra":1}"#
        );
    }

    #[test]
    fn canonical_encoding_is_stable_across_insertion_order() {
        let mut a = HashMap::new();
        a.insert("x", "1");
        a.insert("y", "2");
        let mut b = HashMap::new();
        b.insert("y", "2");
        b.insert("x", "1");

        assert_eq!(hash_record(&a).unwrap(), hash_record(&b).unwrap());
    }

    #[test]
    fn nested_structures_canonicalize_recursively() {
        let value = serde_json::json!({
            "outer": { "b": [1, 2, {"z": 0, "a": 1}], "a": true },
        });
        let bytes = canonical_bytes(&value).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"outer":{"a":true,"b":[1,2,{"a":1,"z":0}]}}"#
        );
    }

    #[test]
    fn empty_hash_matches_sha256_of_empty_string() {
        assert_eq!(
            hex::encode(empty_hash()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
