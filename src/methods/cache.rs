//! Process-wide LRU caches for the codec operations, hit on every path
//! operation. Bundled into a handle (rather than module-level statics) so
//! callers can construct one per `Collection` and share it explicitly, the
//! way a language without implicit globals would.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use super::{
    compute_content_hash, compute_key_hash, compute_version_shard, decode_key_prefix,
    encode_key_prefix, ContentHash, MethodsError,
};

const CACHE_SIZE: usize = 1024;

fn cache_of(size: usize) -> LruCache<String, String> {
    LruCache::new(NonZeroUsize::new(size).expect("cache size must be nonzero"))
}

/// Bounded LRU caches backing the four cacheable codec operations:
/// key hashing, version sharding, and key-prefix encode/decode.
pub struct Codecs {
    key_hash: Mutex<LruCache<String, ContentHash>>,
    version_shard: Mutex<LruCache<String, String>>,
    encode_key_prefix: Mutex<LruCache<String, (String, usize)>>,
    decode_key_prefix: Mutex<LruCache<String, String>>,
}

impl Default for Codecs {
    fn default() -> Self {
        Self::new()
    }
}

impl Codecs {
    /// Build a fresh set of caches, each bounded at 1024 entries.
    pub fn new() -> Self {
        Self {
            key_hash: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_SIZE).expect("cache size must be nonzero"),
            )),
            version_shard: Mutex::new(cache_of(CACHE_SIZE)),
            encode_key_prefix: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_SIZE).expect("cache size must be nonzero"),
            )),
            decode_key_prefix: Mutex::new(cache_of(CACHE_SIZE)),
        }
    }

    /// Cached [`compute_key_hash`].
    pub fn key_hash(&self, key: &str) -> ContentHash {
        let mut cache = self.key_hash.lock();
        if let Some(hit) = cache.get(key) {
            return hit.clone();
        }
        let computed = compute_key_hash(key);
        cache.put(key.to_string(), computed.clone());
        computed
    }

    /// Cached [`compute_version_shard`].
    pub fn version_shard(&self, version: &str) -> Result<String, MethodsError> {
        let mut cache = self.version_shard.lock();
        if let Some(hit) = cache.get(version) {
            return Ok(hit.clone());
        }
        let computed = compute_version_shard(version)?;
        cache.put(version.to_string(), computed.clone());
        Ok(computed)
    }

    /// Cached [`encode_key_prefix`].
    pub fn encode_key_prefix(&self, key: &str) -> (String, usize) {
        let mut cache = self.encode_key_prefix.lock();
        if let Some(hit) = cache.get(key) {
            return hit.clone();
        }
        let computed = encode_key_prefix(key);
        cache.put(key.to_string(), computed.clone());
        computed
    }

    /// Cached [`decode_key_prefix`].
    pub fn decode_key_prefix(&self, encoded: &str) -> Result<String, MethodsError> {
        let mut cache = self.decode_key_prefix.lock();
        if let Some(hit) = cache.get(encoded) {
            return Ok(hit.clone());
        }
        let computed = decode_key_prefix(encoded)?;
        cache.put(encoded.to_string(), computed.clone());
        Ok(computed)
    }

    /// Uncached content hashing; content bytes are rarely repeated so
    /// there is no benefit to caching this path the way key hashing
    /// benefits from repeated lookups of the same key.
    pub fn content_hash(&self, data: &[u8]) -> ContentHash {
        compute_content_hash(data)
    }
}
