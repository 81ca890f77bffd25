//! Payload checksums for corruption detection.

use sha2::{Digest, Sha256};

/// Compute the checksum stored next to a serialized search payload.
///
/// The search key is mixed in so a payload copied under the wrong key does
/// not validate.
pub fn compute_checksum(search_key: &str, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(search_key.as_bytes());
    hasher.update(b"\n");
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether `checksum` matches `payload` stored under `search_key`.
pub fn verify_checksum(search_key: &str, payload: &str, checksum: &str) -> bool {
    compute_checksum(search_key, payload) == checksum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_stability() {
        let a = compute_checksum("artist:oasis", r#"{"kind":"artists","items":[]}"#);
        let b = compute_checksum("artist:oasis", r#"{"kind":"artists","items":[]}"#);
        assert_eq!(a, b);
    }

    #[test]
    fn test_checksum_depends_on_key() {
        let a = compute_checksum("artist:oasis", "[]");
        let b = compute_checksum("artist_songs:oasis", "[]");
        assert_ne!(a, b);
    }

    #[test]
    fn test_checksum_format() {
        let hash = compute_checksum("song:wonderwall", "[]");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let sum = compute_checksum("song:wonderwall", "[1]");
        assert!(verify_checksum("song:wonderwall", "[1]", &sum));
        assert!(!verify_checksum("song:wonderwall", "[2]", &sum));
    }
}
