use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of the given bytes.
pub fn sha256_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
