//! Content-addressed hashing and signatures
//!
//! A tool version is identified by a SHA-256 digest of its defining content
//! (code, description, test case). Signatures bind a content hash to a
//! specific Gauntlet run.

use sha2::{Digest, Sha256};

/// SHA-256 hex digest of code content.
pub fn hash_code(code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}

/// Composite digest of a tool's defining content. Pure function of the
/// three inputs: identical content always hashes identically.
pub fn hash_tool(code: &str, description: &str, test_case: &str) -> String {
    let composite = format!("{code}\n---DESC---\n{description}\n---TEST---\n{test_case}");
    hash_code(&composite)
}

/// Derive a signature from a content hash and a Gauntlet run id.
pub fn sign(content_hash: &str, gauntlet_run_id: &str) -> String {
    let payload = format!("{content_hash}:{gauntlet_run_id}");
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())[..32].to_string()
}

/// Recompute and compare. Detects tampering with the (hash, run id) pair.
pub fn verify(content_hash: &str, gauntlet_run_id: &str, signature: &str) -> bool {
    sign(content_hash, gauntlet_run_id) == signature
}
