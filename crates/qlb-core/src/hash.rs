use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::serde::canonical_text;

/// Hashes a JSON value by its canonical text, so object key order never
/// changes the digest.
pub fn hash_value(value: &Value) -> String {
    hash_bytes(canonical_text(value).as_bytes())
}

/// Computes the lower-hex SHA256 digest of raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{:x}", digest)
}
