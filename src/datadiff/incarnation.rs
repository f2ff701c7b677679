//! A single `(version, bytes)` pair: immutable once created, with a
//! memoized choice of how to serialize itself relative to a given
//! baseline.

use parking_lot::Mutex;
use std::collections::HashMap;

use super::header::{
    CompressedPayload, ContentEncoding, DiffPayload, IncarnationHeader, Record,
};
use super::DatadiffError;
use crate::methods::{self, Codecs, ContentHash};

/// Minimum bytes a compressed full record must save over the raw encoding
/// before compression is preferred.
const MIN_COMPRESSION_SAVINGS: usize = 50;

/// An owned `(version, bytes)` incarnation of an entry's content.
pub struct Incarnation {
    version: String,
    data: Vec<u8>,
    content_hash: ContentHash,
    /// Memoized record choice, keyed by the baseline it was computed
    /// against: `(baseline_version, baseline_content_hash_digest)`.
    memo: Mutex<Option<((String, String), ContentEncoding)>>,
}

impl Incarnation {
    /// Construct a new incarnation from owned bytes at `version`.
    pub fn new(data: Vec<u8>, version: impl Into<String>) -> Self {
        let content_hash = methods::compute_content_hash(&data);
        Self {
            version: version.into(),
            data,
            content_hash,
            memo: Mutex::new(None),
        }
    }

    /// The version this incarnation was recorded at.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The raw payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The SHA-256 hex digest of [`Incarnation::data`].
    pub fn content_hash_digest(&self) -> &str {
        &self.content_hash.digest
    }

    /// Whether this incarnation's bytes are identical to `other`'s.
    pub fn same_data_as(&self, other: &Incarnation) -> bool {
        self.content_hash.digest == other.content_hash.digest && self.data == other.data
    }

    fn metadata(&self) -> IncarnationHeader {
        IncarnationHeader {
            version: self.version.clone(),
            content_hash: self.content_hash.clone(),
            content_length: self.data.len(),
        }
    }

    fn full_record(&self) -> ContentEncoding {
        let compressed = flate2_compress(&self.data);
        if compressed.len() < self.data.len().saturating_sub(MIN_COMPRESSION_SAVINGS) {
            ContentEncoding::FullCompressed {
                full_compressed: CompressedPayload {
                    method: methods::FULL_COMPRESSED_METHOD_ID.to_string(),
                    data: methods::pack_bytes(&compressed),
                },
            }
        } else {
            ContentEncoding::Full {
                full: methods::pack_bytes(&self.data),
            }
        }
    }

    fn unchanged_record(&self, baseline_version: &str) -> ContentEncoding {
        ContentEncoding::Unchanged {
            baseline_version: baseline_version.to_string(),
            unchanged: true,
        }
    }

    fn delta_record(&self, baseline: &Incarnation) -> ContentEncoding {
        if baseline.data == self.data {
            return self.unchanged_record(&baseline.version);
        }
        let diff = methods::compute_diff(&baseline.data, &self.data);
        let full = self.full_record();
        let full_len = match &full {
            ContentEncoding::Full { full } => methods::unpack_bytes(full).map(|b| b.len()).unwrap_or(usize::MAX),
            ContentEncoding::FullCompressed { full_compressed } => {
                methods::unpack_bytes(&full_compressed.data).map(|b| b.len()).unwrap_or(usize::MAX)
            }
            _ => unreachable!("full_record only produces Full or FullCompressed"),
        };
        if diff.len() > full_len {
            return full;
        }
        ContentEncoding::Diff {
            baseline_version: baseline.version.clone(),
            diff: DiffPayload {
                method: methods::DIFF_METHOD_ID.to_string(),
                data: methods::pack_bytes(&diff),
            },
        }
    }

    /// Choose and return this incarnation's record encoding, relative to
    /// `baseline` (the prior incarnation in the dependency chain, if any)
    /// and `previous_by_content` (incarnations already emitted earlier in
    /// this same dump, keyed by content hash digest, used to detect
    /// "reverted to an earlier value" without re-diffing).
    pub fn as_record(
        &self,
        baseline: Option<&Incarnation>,
        previous_by_content: &HashMap<String, &Incarnation>,
    ) -> Record {
        let content = self.content_record(baseline, previous_by_content);
        Record {
            metadata: self.metadata(),
            content,
        }
    }

    fn content_record(
        &self,
        baseline: Option<&Incarnation>,
        previous_by_content: &HashMap<String, &Incarnation>,
    ) -> ContentEncoding {
        let Some(baseline) = baseline else {
            return self.full_record();
        };
        if let Some(equal_old) = previous_by_content.get(&self.content_hash.digest) {
            if equal_old.data == self.data {
                return self.unchanged_record(&equal_old.version);
            }
        }
        let key = (baseline.version.clone(), baseline.content_hash.digest.clone());
        {
            let memo = self.memo.lock();
            if let Some((memo_key, record)) = memo.as_ref() {
                if memo_key == &key {
                    return record.clone();
                }
            }
        }
        let record = self.delta_record(baseline);
        *self.memo.lock() = Some((key, record.clone()));
        record
    }

    /// Rebuild an incarnation from a wire [`Record`], verifying its
    /// content hash and length against what the record claims.
    pub fn build_from_record(
        record: &Record,
        baseline: Option<&Incarnation>,
    ) -> Result<Incarnation, DatadiffError> {
        let data = match &record.content {
            ContentEncoding::Full { full } => methods::unpack_bytes(full)?,
            ContentEncoding::FullCompressed { full_compressed } => {
                if full_compressed.method != methods::FULL_COMPRESSED_METHOD_ID {
                    return Err(DatadiffError::UnknownEncodingMethod(
                        full_compressed.method.clone(),
                    ));
                }
                let packed = methods::unpack_bytes(&full_compressed.data)?;
                flate2_decompress(&packed)?
            }
            ContentEncoding::Diff { baseline_version, diff } => {
                let baseline = baseline.ok_or(DatadiffError::MissingBaseline)?;
                if baseline.version != *baseline_version {
                    return Err(DatadiffError::WrongBaseline {
                        wanted: baseline_version.clone(),
                        got: baseline.version.clone(),
                    });
                }
                if diff.method != methods::DIFF_METHOD_ID {
                    return Err(DatadiffError::UnknownEncodingMethod(diff.method.clone()));
                }
                let packed = methods::unpack_bytes(&diff.data)?;
                methods::apply_patch(&baseline.data, &packed)?
            }
            ContentEncoding::Unchanged {
                baseline_version,
                unchanged,
            } => {
                if !unchanged {
                    return Err(DatadiffError::InvalidRecord(
                        "'unchanged' field must be true".to_string(),
                    ));
                }
                let baseline = baseline.ok_or(DatadiffError::MissingBaseline)?;
                if baseline.version != *baseline_version {
                    return Err(DatadiffError::WrongBaseline {
                        wanted: baseline_version.clone(),
                        got: baseline.version.clone(),
                    });
                }
                baseline.data.clone()
            }
        };
        let inc = Incarnation::new(data, record.metadata.version.clone());
        if inc.data.len() != record.metadata.content_length {
            return Err(DatadiffError::LengthMismatch {
                version: record.metadata.version.clone(),
                expected: record.metadata.content_length,
                actual: inc.data.len(),
            });
        }
        if inc.content_hash.digest != record.metadata.content_hash.digest {
            return Err(DatadiffError::HashMismatch {
                version: record.metadata.version.clone(),
                expected: record.metadata.content_hash.digest.clone(),
                actual: inc.content_hash.digest.clone(),
            });
        }
        Ok(inc)
    }
}

fn flate2_compress(data: &[u8]) -> Vec<u8> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .expect("in-memory zlib compression cannot fail");
    encoder.finish().expect("in-memory zlib compression cannot fail")
}

fn flate2_decompress(data: &[u8]) -> Result<Vec<u8>, DatadiffError> {
    use flate2::read::ZlibDecoder;
    use std::io::Read;
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| DatadiffError::InvalidRecord(format!("corrupt zlib payload: {e}")))?;
    Ok(out)
}

/// Exposed for the key-prefix/shard caches used elsewhere in this module's
/// call sites; reconstructs a key hash using the shared [`Codecs`] handle.
pub fn keyhash_of(key: &str, codecs: &Codecs) -> String {
    codecs.key_hash(key).digest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_record_for_first_incarnation() {
        let inc = Incarnation::new(b"mycontent".to_vec(), "123456789");
        let rec = inc.as_record(None, &HashMap::new());
        assert!(matches!(
            rec.content,
            ContentEncoding::Full { .. } | ContentEncoding::FullCompressed { .. }
        ));
    }

    #[test]
    fn diff_record_against_baseline() {
        let baseline = Incarnation::new(b"mycontent".to_vec(), "1");
        let current = Incarnation::new(b"newcontent".to_vec(), "2");
        let rec = current.as_record(Some(&baseline), &HashMap::new());
        match rec.content {
            ContentEncoding::Diff { baseline_version, .. } => assert_eq!(baseline_version, "1"),
            ContentEncoding::FullCompressed { .. } | ContentEncoding::Full { .. } => {
                // Acceptable if the diff happened to be larger than full.
            }
            other => panic!("unexpected encoding: {other:?}"),
        }
    }

    #[test]
    fn unchanged_record_for_identical_bytes() {
        let baseline = Incarnation::new(b"same".to_vec(), "1");
        let current = Incarnation::new(b"same".to_vec(), "2");
        let rec = current.as_record(Some(&baseline), &HashMap::new());
        assert!(matches!(
            rec.content,
            ContentEncoding::Unchanged { baseline_version, .. } if baseline_version == "1"
        ));
    }

    #[test]
    fn round_trip_through_build_from_record() {
        let baseline = Incarnation::new(b"mycontent".to_vec(), "1");
        let current = Incarnation::new(b"morecontentyes".to_vec(), "2");
        let rec = current.as_record(Some(&baseline), &HashMap::new());
        let rebuilt = Incarnation::build_from_record(&rec, Some(&baseline)).unwrap();
        assert_eq!(rebuilt.data(), current.data());
        assert_eq!(rebuilt.content_hash_digest(), current.content_hash_digest());
    }
}
