//! Wire types for a chunk's header and per-version records, matching the
//! JSON shape in the external interface contract exactly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::filenames::FilenameEncodedInfo;
use crate::methods::ContentHash;

pub const FORMAT_MAGIC: &str = "datadiff";
pub const FORMAT_VERSION: &str = "0.0.1";
/// Software version embedded in every chunk header, taken from this
/// crate's own `Cargo.toml` version at compile time.
pub const SOFTWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The `versioninfo` block of a chunk header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionsHeader {
    pub first_contained_version: String,
    pub last_contained_version: String,
    pub first_known_version: String,
    pub last_contained_version_with_diff: Option<String>,
    pub depends_on_external_version: Option<String>,
}

/// A chunk's top-level header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatadiffHeader {
    pub magic: String,
    pub format_version: String,
    pub software_version: String,
    pub name: String,
    pub nameinfo: FilenameEncodedInfo,
    pub key: String,
    pub methods: BTreeMap<String, String>,
    pub versioninfo: VersionsHeader,
}

/// Per-record metadata: the version this record materializes, and the
/// hash/length it must reproduce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncarnationHeader {
    pub version: String,
    pub content_hash: ContentHash,
    pub content_length: usize,
}

/// The content encoding of a single record. Exactly one variant is
/// present in the wire JSON, distinguished by its tag shape rather than an
/// explicit discriminant field (matching the original format, which is a
/// small family of mutually exclusive object shapes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentEncoding {
    /// Raw bytes, base64-encoded.
    Full { full: String },
    /// Deflate-compressed raw bytes.
    FullCompressed {
        full_compressed: CompressedPayload,
    },
    /// A binary diff against a baseline version.
    Diff {
        baseline_version: String,
        diff: DiffPayload,
    },
    /// Identical bytes to a baseline version.
    Unchanged {
        baseline_version: String,
        unchanged: bool,
    },
}

/// Payload shape for `full_compressed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedPayload {
    pub method: String,
    pub data: String,
}

/// Payload shape for `diff`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffPayload {
    pub method: String,
    pub data: String,
}

/// One `{"metadata": ..., "content": ...}` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub metadata: IncarnationHeader,
    pub content: ContentEncoding,
}

/// The full on-disk shape: `{"datawatch": {"header": ..., "content": [...]}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkFile {
    pub datawatch: ChunkBody,
}

/// The `datawatch` object inside a [`ChunkFile`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkBody {
    pub header: DatadiffHeader,
    pub content: Vec<Record>,
}
