//! # Codec registry
//!
//! The fixed set of pure, cacheable operations every chunk header reports so
//! a reader can reject unknown encodings before trying to apply them:
//!
//! - `hash`: SHA-256, lowercase hex digest.
//! - `diff`: a binary patch computed over raw bytes, deflate-compressed.
//! - `key_encoding`: deflate then URL-safe base64 without padding, used to
//!   embed a human-recoverable prefix of a key in a chunk's filename.
//! - `version_sharding`: first 5 decimal digits of a version, right-padded.
//! - `encode_key_prefix`: largest key prefix whose encoding fits in 256
//!   bytes.
//!
//! All five are hit on every path operation, so results are cached behind
//! process-wide bounded LRUs reachable through a [`Codecs`] handle rather
//! than implicit globals.

mod cache;
mod diff;
mod hash;
mod key_encoding;
mod version_shard;

pub use cache::Codecs;
pub use diff::{apply_patch, compute_diff, DIFF_METHOD_ID, FULL_COMPRESSED_METHOD_ID};
pub use hash::{compute_content_hash, compute_key_hash, ContentHash};
pub use key_encoding::{decode_key_prefix, encode_key_prefix, ENCODED_KEY_LENGTH_LIMIT};
pub use version_shard::compute_version_shard;

use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised by the codec layer.
#[derive(Debug, Error)]
pub enum MethodsError {
    /// A version string contained non-decimal characters.
    #[error("version must be a decimal string: {0:?}")]
    NonDecimalVersion(String),
    /// A key-prefix encoding failed to round-trip.
    #[error("key prefix encoding did not round-trip for prefix of length {0}")]
    KeyPrefixRoundTrip(usize),
    /// An encoded key-prefix blob could not be base64/deflate decoded.
    #[error("invalid encoded key prefix: {0}")]
    InvalidKeyPrefix(String),
    /// A chunk declared an encoding method this build does not recognize.
    #[error("unknown or unhandled method {method:?} for {purpose}")]
    UnknownMethod {
        /// The method identifier string found in the chunk.
        method: String,
        /// What the method was meant to be used for ("diff", "hash", ...).
        purpose: &'static str,
    },
}

/// The identifiers for the methods active in this build, as embedded
/// verbatim in every chunk's `methods` header field.
pub fn active_methods() -> BTreeMap<&'static str, &'static str> {
    let mut m = BTreeMap::new();
    m.insert("diff", diff::DIFF_METHOD_ID);
    m.insert("key_encoding", key_encoding::KEY_ENCODING_METHOD_ID);
    m.insert("version_sharding", version_shard::VERSION_SHARDING_METHOD_ID);
    m.insert("hash", hash::HASH_METHOD_ID);
    m
}

/// Base64 "pack" used for raw payloads inside a chunk record: standard
/// alphabet, the newline-stripped equivalent of Python's `b2a_base64`.
pub fn pack_bytes(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Inverse of [`pack_bytes`].
pub fn unpack_bytes(encoded: &str) -> Result<Vec<u8>, MethodsError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| MethodsError::InvalidKeyPrefix(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_roundtrip() {
        let data = b"hello world, this is some content";
        let packed = pack_bytes(data);
        let back = unpack_bytes(&packed).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn active_methods_are_stable() {
        let m = active_methods();
        assert_eq!(m["hash"], "sha256-hex");
        assert_eq!(m["version_sharding"], "5digits-zero");
    }
}
