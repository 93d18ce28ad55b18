//! Shared SHA-256 hex digest utility.
//!
//! Used by the conflict module to fingerprint full entity records so that
//! divergences outside the tracked fields are still detected.

use sha2::{Digest, Sha256};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}
