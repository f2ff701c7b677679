//! The versioned, delta-diff storage engine itself: [`Incarnation`]
//! (one `(version, bytes)` pair), [`Entry`] (one key's full version
//! history, partitioned into flushed chunks and an unflushed tail), and
//! [`Collection`] (many entries sharing a [`crate::storage::Storage`]
//! backend and [`crate::methods::Codecs`] handle).

mod collection;
mod entry;
mod header;
mod incarnation;

pub use collection::{Collection, StreamedRevision};
pub use entry::{Entry, EntryState, EntryStats, LoadMode};
pub use header::{
    ChunkBody, ChunkFile, CompressedPayload, ContentEncoding, DatadiffHeader, DiffPayload,
    IncarnationHeader, Record, VersionsHeader, FORMAT_MAGIC, FORMAT_VERSION, SOFTWARE_VERSION,
};
pub use incarnation::Incarnation;

use thiserror::Error;

use crate::filenames::FilenameError;
use crate::methods::MethodsError;
use crate::storage::StorageError;

/// Errors raised while building, flushing, or reloading an entry's
/// version history.
#[derive(Debug, Error)]
pub enum DatadiffError {
    /// Wraps a codec-layer failure (bad base64, unknown method id, ...).
    #[error(transparent)]
    Methods(#[from] MethodsError),
    /// Wraps a filename encode/decode failure.
    #[error(transparent)]
    Filename(#[from] FilenameError),
    /// Wraps a storage read/write failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Wraps a JSON (de)serialization failure.
    #[error("malformed chunk JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// Wraps a raw I/O failure not already captured by [`StorageError`].
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A record's content encoding named a method this build does not
    /// recognize.
    #[error("unknown content encoding method: {0:?}")]
    UnknownEncodingMethod(String),
    /// A `diff` or `unchanged` record requires a baseline but none was
    /// supplied.
    #[error("record requires a baseline incarnation but none was available")]
    MissingBaseline,
    /// A record's claimed baseline version does not match the baseline
    /// actually supplied.
    #[error("record expects baseline version {wanted} but got {got}")]
    WrongBaseline {
        /// The version the record's `baseline_version` field names.
        wanted: String,
        /// The version of the baseline incarnation actually supplied.
        got: String,
    },
    /// A record's shape failed a structural invariant (e.g. `unchanged:
    /// false`).
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    /// A rebuilt incarnation's length does not match what the record's
    /// metadata claims.
    #[error("content length mismatch for version {version}: expected {expected}, got {actual}")]
    LengthMismatch {
        /// The version of the mismatching record.
        version: String,
        /// The length recorded in the chunk.
        expected: usize,
        /// The length actually produced after decoding.
        actual: usize,
    },
    /// A rebuilt incarnation's content hash does not match what the
    /// record's metadata claims.
    #[error("content hash mismatch for version {version}: expected {expected}, got {actual}")]
    HashMismatch {
        /// The version of the mismatching record.
        version: String,
        /// The hash recorded in the chunk.
        expected: String,
        /// The hash actually produced after decoding.
        actual: String,
    },
    /// Two distinct keys hashed to the same key-hash bucket.
    #[error("key hash collision: {new_key:?} collides with existing key {existing_key:?}")]
    KeyHashCollision {
        /// The key already present under this key-hash.
        existing_key: String,
        /// The key that was being inserted or looked up.
        new_key: String,
    },
    /// The requested version predates the earliest version ever recorded
    /// for this key.
    #[error("no data known at version {version}; first known version is {first_known_version}")]
    NeverKnown {
        /// The key being queried.
        key: String,
        /// The requested version.
        version: String,
        /// The earliest version ever recorded for this key.
        first_known_version: String,
    },
    /// The requested version predates what is currently loaded: it was
    /// recorded, but the incarnations covering it have since been
    /// flushed and dropped from memory.
    #[error("no data loaded at version {version}; data prior to {first_contained_version} has been flushed")]
    Flushed {
        /// The key being queried.
        key: String,
        /// The requested version.
        version: String,
        /// The earliest version still resident in memory.
        first_contained_version: String,
    },
    /// The requested version is newer than anything recorded so far.
    #[error("no data known at version {version}; data is only known up to {last_contained_version}")]
    NotYetKnown {
        /// The key being queried.
        key: String,
        /// The requested version.
        version: String,
        /// The most recent version known for this key.
        last_contained_version: String,
    },
}
