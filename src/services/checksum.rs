//! Content digests used to verify transfer packages on intake.
//!
//! The digest is SHA-256 rendered as lowercase hex. The algorithm name is
//! exposed so stored checksums can be tagged with the version that produced them.

use sha2::{Digest, Sha256};

/// Algorithm behind every checksum this service computes or accepts.
pub const DIGEST_ALGORITHM: &str = "sha256";

/// Compute the hex digest of `bytes`.
pub fn digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Compare `bytes` against a caller-declared checksum.
///
/// Surrounding whitespace and hex case are ignored. An empty declaration
/// never verifies.
pub fn verify(bytes: &[u8], declared: &str) -> bool {
    let declared = declared.trim();
    !declared.is_empty() && digest(bytes).eq_ignore_ascii_case(declared)
}
