//! SHA-256 content and key hashing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub(super) const HASH_METHOD_ID: &str = "sha256-hex";

/// A content hash as it appears in a chunk record: the method identifier
/// alongside the lowercase hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHash {
    /// The hashing method identifier, always `"sha256-hex"` in this build.
    pub method: String,
    /// Lowercase hex-encoded digest.
    pub digest: String,
}

fn hex_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Hash arbitrary content bytes.
pub fn compute_content_hash(data: &[u8]) -> ContentHash {
    ContentHash {
        method: HASH_METHOD_ID.to_string(),
        digest: hex_digest(data),
    }
}

/// Hash a UTF-8 key. Keyhashes are the identifier used to shard and
/// disambiguate entries inside a `Collection`.
pub fn compute_key_hash(key: &str) -> ContentHash {
    compute_content_hash(key.as_bytes())
}
