//! Key-prefix encoding: deflate-compress, then URL-safe base64 without
//! padding, so a human-recoverable prefix of a key can live inside a
//! filename while staying filesystem-safe and bounded in length.

use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use super::MethodsError;

pub(super) const KEY_ENCODING_METHOD_ID: &str = "unpad . base64.urlsafe_b64encode . zlib.compress";

/// Filenames must stay within this many bytes for the encoded key prefix.
pub const ENCODED_KEY_LENGTH_LIMIT: usize = 256;

fn encode_str(s: &str) -> String {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(s.as_bytes())
        .expect("in-memory zlib compression cannot fail");
    let compressed = encoder.finish().expect("in-memory zlib compression cannot fail");
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(compressed)
}

/// Decode a key-prefix blob produced by [`encode_key_prefix`] back into the
/// UTF-8 prefix string it represents.
pub fn decode_key_prefix(encoded: &str) -> Result<String, MethodsError> {
    let compressed = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| MethodsError::InvalidKeyPrefix(e.to_string()))?;
    let mut decoder = ZlibDecoder::new(&compressed[..]);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| MethodsError::InvalidKeyPrefix(e.to_string()))?;
    String::from_utf8(out).map_err(|e| MethodsError::InvalidKeyPrefix(e.to_string()))
}

/// Return `(encoded, n)` where `encoded` is the encoding of the first `n`
/// characters of `key`, the largest `n` whose encoding is at most
/// [`ENCODED_KEY_LENGTH_LIMIT`] bytes. If the whole key fits, `n ==
/// key.chars().count()`.
pub fn encode_key_prefix(key: &str) -> (String, usize) {
    let simple = encode_str(key);
    let char_count = key.chars().count();
    if simple.len() <= ENCODED_KEY_LENGTH_LIMIT {
        return (simple, char_count);
    }
    // Binary search over character-boundary prefix lengths (not byte
    // offsets, so multi-byte UTF-8 is never split mid-codepoint).
    let mut low = 0usize;
    let mut high = char_count;
    let mut candidate = encode_str("");
    while high > low {
        let mid = (high + low) / 2;
        if mid == low {
            break;
        }
        let prefix: String = key.chars().take(mid).collect();
        let encoded = encode_str(&prefix);
        if encoded.len() <= ENCODED_KEY_LENGTH_LIMIT {
            candidate = encoded;
            low = mid;
        } else {
            high = mid;
        }
    }
    (candidate, low)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_key_round_trips_fully() {
        let key = "https://example.com/foo";
        let (encoded, n) = encode_key_prefix(key);
        assert_eq!(n, key.chars().count());
        let decoded = decode_key_prefix(&encoded).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn long_key_truncates_and_still_round_trips() {
        let key = "x".repeat(5000);
        let (encoded, n) = encode_key_prefix(&key);
        assert!(encoded.len() <= ENCODED_KEY_LENGTH_LIMIT);
        assert!(n < key.chars().count());
        let decoded = decode_key_prefix(&encoded).unwrap();
        assert_eq!(decoded, key.chars().take(n).collect::<String>());
    }

    #[test]
    fn unicode_key_prefix_respects_char_boundaries() {
        let key = "héllo-wörld-".repeat(50);
        let (encoded, n) = encode_key_prefix(&key);
        let decoded = decode_key_prefix(&encoded).unwrap();
        assert_eq!(decoded, key.chars().take(n).collect::<String>());
    }
}
