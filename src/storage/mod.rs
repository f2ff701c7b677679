//! Storage: a namespace of chunks with list/read/write and atomic publish.
//!
//! Two implementations are provided: [`memory::InMemoryStorage`] for tests
//! and summarization scratch space, and [`local::LocalFileStorage`] rooted
//! at an existing directory on disk.

mod local;
mod memory;

pub use local::LocalFileStorage;
pub use memory::InMemoryStorage;

use std::io::{Read, Write};
use thiserror::Error;

use crate::filenames;
use crate::methods::Codecs;

/// Errors raised by a [`Storage`] implementation.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The destination for a write already exists; writes are
    /// create-only.
    #[error("chunk already exists: {0}")]
    AlreadyExists(String),
    /// The requested chunk does not exist.
    #[error("chunk not found: {0}")]
    NotFound(String),
    /// The computed path escaped the storage root.
    #[error("path {0:?} escapes the storage root")]
    PathEscape(String),
    /// An underlying I/O operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The chunk path the operation was acting on.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A write handle for a chunk: bytes written here are only published to
/// the namespace when the handle is finished successfully.
pub trait ChunkWriter: Write {
    /// Finish the write, publishing the chunk atomically. Consumes the
    /// writer so it cannot be used afterwards.
    fn finish(self: Box<Self>) -> Result<(), StorageError>;
}

/// Namespace of chunks, addressed by storage-relative path.
pub trait Storage {
    /// List every chunk's relative path, in an unspecified but stable
    /// order (implementations sort for determinism).
    fn list_chunks(&self) -> Result<Vec<String>, StorageError>;

    /// Open a writable sink for a new chunk. Must fail if `name` already
    /// exists.
    fn write_chunk(&self, name: &str) -> Result<Box<dyn ChunkWriter + '_>, StorageError>;

    /// Open a readable source for an existing chunk.
    fn read_chunk(&self, name: &str) -> Result<Box<dyn Read + '_>, StorageError>;

    /// List only chunks whose decoded filename matches the supplied
    /// filters. `None` means "no filter on this field".
    fn list_filtered_chunks(
        &self,
        codecs: &Codecs,
        version_shard_filter: Option<&[String]>,
        keyhash_filter: Option<&[String]>,
    ) -> Result<Vec<String>, StorageError> {
        let all = self.list_chunks()?;
        let mut out = Vec::new();
        for item in all {
            let Ok(fni) = filenames::decode_filename(&item, codecs) else {
                continue;
            };
            if let Some(filter) = version_shard_filter {
                if !filter.iter().any(|v| v == &fni.version_shard) {
                    continue;
                }
            }
            if let Some(filter) = keyhash_filter {
                if !filter.iter().any(|v| v == &fni.keyhash) {
                    continue;
                }
            }
            out.push(item);
        }
        Ok(out)
    }
}
