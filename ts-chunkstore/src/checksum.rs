//! SHA-256 checksums for chunk blobs, grounded on
//! `examples/original_source/chunkserver/checksum_validator.py`. Uses
//! `openssl::sha`, the teacher's own chunk-hashing idiom (see
//! `src/auth_helpers.rs`, `src/tape/file_formats/mod.rs`), not the `sha2`
//! crate.

use openssl::sha::Sha256;

pub fn compute_checksum(data: &[u8]) -> String {
    hex::encode(openssl::sha::sha256(data))
}

pub fn verify_checksum(data: &[u8], expected: &str) -> bool {
    compute_checksum(data) == expected
}

/// Streaming counterpart for chunk writes that arrive as a run of pieces,
/// mirroring `IncrementalChecksumCalculator`.
pub struct IncrementalChecksum {
    hasher: Sha256,
}

impl Default for IncrementalChecksum {
    fn default() -> Self {
        Self::new()
    }
}

impl IncrementalChecksum {
    pub fn new() -> Self {
        Self { hasher: Sha256::new() }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> String {
        hex::encode(self.hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_checksum_matches_known_sha256() {
        let checksum = compute_checksum(b"hello world");
        assert_eq!(checksum, "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9");
    }

    #[test]
    fn verify_checksum_rejects_mismatch() {
        assert!(verify_checksum(b"data", &compute_checksum(b"data")));
        assert!(!verify_checksum(b"data", "deadbeef"));
    }

    #[test]
    fn incremental_checksum_matches_one_shot() {
        let mut incremental = IncrementalChecksum::new();
        incremental.update(b"hello ");
        incremental.update(b"world");
        assert_eq!(incremental.finalize(), compute_checksum(b"hello world"));
    }
}
