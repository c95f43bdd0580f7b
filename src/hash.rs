//! Content hashing for intra-batch duplicate suppression.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest of the file bytes.
///
/// The first occurrence of a digest in a batch is kept; later occurrences
/// are counted as skipped duplicates.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
