use sha2::{Sha256, Digest};

/// Length of the embedded content hash, in hex characters
pub const CONTENT_HASH_LEN: usize = 8;

/// Short stable hash of a zone body rendered with the placeholder serial.
/// Only change detection depends on it, so the truncated SHA-256 is enough.
pub fn content_hash(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(CONTENT_HASH_LEN);
    hash
}
