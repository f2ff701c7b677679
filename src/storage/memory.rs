//! In-memory [`Storage`] backed by a map, used by tests and as scratch
//! space for the summarization path.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use super::{ChunkWriter, Storage, StorageError};

/// An in-memory chunk namespace, keyed by chunk path.
#[derive(Default)]
pub struct InMemoryStorage {
    data: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    /// An empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryWriter<'a> {
    storage: &'a InMemoryStorage,
    name: String,
    buf: Cursor<Vec<u8>>,
}

impl Write for MemoryWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.buf.flush()
    }
}

impl ChunkWriter for MemoryWriter<'_> {
    fn finish(self: Box<Self>) -> Result<(), StorageError> {
        self.storage
            .data
            .lock()
            .insert(self.name, self.buf.into_inner());
        Ok(())
    }
}

impl Storage for InMemoryStorage {
    fn list_chunks(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.data.lock().keys().cloned().collect())
    }

    fn write_chunk(&self, name: &str) -> Result<Box<dyn ChunkWriter + '_>, StorageError> {
        if self.data.lock().contains_key(name) {
            return Err(StorageError::AlreadyExists(name.to_string()));
        }
        Ok(Box::new(MemoryWriter {
            storage: self,
            name: name.to_string(),
            buf: Cursor::new(Vec::new()),
        }))
    }

    fn read_chunk(&self, name: &str) -> Result<Box<dyn Read + '_>, StorageError> {
        let data = self
            .data
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        Ok(Box::new(Cursor::new(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let storage = InMemoryStorage::new();
        let mut w = storage.write_chunk("a/b/c.datawatch.json").unwrap();
        w.write_all(b"hello").unwrap();
        w.finish().unwrap();
        let mut r = storage.read_chunk("a/b/c.datawatch.json").unwrap();
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn write_twice_to_same_name_fails() {
        let storage = InMemoryStorage::new();
        let mut w = storage.write_chunk("x").unwrap();
        w.write_all(b"1").unwrap();
        w.finish().unwrap();
        assert!(storage.write_chunk("x").is_err());
    }

    #[test]
    fn list_chunks_is_sorted() {
        let storage = InMemoryStorage::new();
        for name in ["z", "a", "m"] {
            let mut w = storage.write_chunk(name).unwrap();
            w.write_all(b"x").unwrap();
            w.finish().unwrap();
        }
        assert_eq!(storage.list_chunks().unwrap(), vec!["a", "m", "z"]);
    }
}
