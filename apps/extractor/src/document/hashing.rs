//! Content addressing for uploads.

use sha2::{Digest, Sha256};

use crate::models::extraction::DocumentId;

/// SHA-256 of the raw bytes, lowercase hex (64 chars).
///
/// The orchestrator deduplicates on this id, so the digest must be collision
/// resistant.
pub fn content_id(bytes: &[u8]) -> DocumentId {
    DocumentId::new(format!("{:x}", Sha256::digest(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_is_stable_hex() {
        let id = content_id(b"abc");
        assert_eq!(
            id.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_identical_bytes_share_id() {
        assert_eq!(content_id(b"cv contents"), content_id(b"cv contents"));
        assert_ne!(content_id(b"cv contents"), content_id(b"cv contents "));
    }
}
