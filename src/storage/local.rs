//! [`Storage`] rooted at a local filesystem directory. Writes are
//! published atomically via a lock-file + temp-file + rename protocol;
//! readers never observe a partial file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::{ChunkWriter, Storage, StorageError};

/// A chunk namespace rooted at an existing directory on disk.
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    /// Open storage rooted at `root`, which must already exist.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref();
        if !root.exists() {
            return Err(StorageError::Io {
                path: root.display().to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "storage root does not exist",
                ),
            });
        }
        let abs = fs::canonicalize(root).map_err(|source| StorageError::Io {
            path: root.display().to_string(),
            source,
        })?;
        Ok(Self { root: abs })
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        let joined = self.root.join(name);
        // The parent directories of a freshly-chosen chunk path need not
        // exist yet, so canonicalize is only meaningful after creation;
        // instead verify textually that the join stayed under the root by
        // rejecting any `..` component up front.
        if name
            .split('/')
            .any(|segment| segment == ".." || segment.is_empty() && !name.is_empty())
        {
            return Err(StorageError::PathEscape(name.to_string()));
        }
        if !joined.starts_with(&self.root) {
            return Err(StorageError::PathEscape(name.to_string()));
        }
        Ok(joined)
    }
}

struct LocalWriter {
    lockfile: PathBuf,
    tmpfile: PathBuf,
    destination: PathBuf,
    file: BufWriter<File>,
}

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl ChunkWriter for LocalWriter {
    fn finish(mut self: Box<Self>) -> Result<(), StorageError> {
        let result = self
            .file
            .flush()
            .and_then(|_| fs::rename(&self.tmpfile, &self.destination));
        // Whether this succeeds or fails, clean up the lock file and any
        // leftover temp file on every exit path.
        let cleanup_err = cleanup(&self.lockfile, &self.tmpfile);
        result.map_err(|source| StorageError::Io {
            path: self.destination.display().to_string(),
            source,
        })?;
        cleanup_err
    }
}

impl Drop for LocalWriter {
    fn drop(&mut self) {
        let _ = cleanup(&self.lockfile, &self.tmpfile);
    }
}

fn cleanup(lockfile: &Path, tmpfile: &Path) -> Result<(), StorageError> {
    if lockfile.exists() {
        fs::remove_file(lockfile).map_err(|source| StorageError::Io {
            path: lockfile.display().to_string(),
            source,
        })?;
    }
    if tmpfile.exists() {
        fs::remove_file(tmpfile).map_err(|source| StorageError::Io {
            path: tmpfile.display().to_string(),
            source,
        })?;
    }
    Ok(())
}

impl Storage for LocalFileStorage {
    fn list_chunks(&self) -> Result<Vec<String>, StorageError> {
        let mut out = Vec::new();
        walk(&self.root, &self.root, &mut out)?;
        out.sort();
        Ok(out)
    }

    fn write_chunk(&self, name: &str) -> Result<Box<dyn ChunkWriter + '_>, StorageError> {
        let destination = self.resolve(name)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        if destination.exists() {
            return Err(StorageError::AlreadyExists(name.to_string()));
        }
        let lockfile = path_with_suffix(&destination, ".lock");
        let tmpfile = path_with_suffix(&destination, ".tmp");
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lockfile)
            .map_err(|source| StorageError::Io {
                path: lockfile.display().to_string(),
                source,
            })?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmpfile)
            .map_err(|source| StorageError::Io {
                path: tmpfile.display().to_string(),
                source,
            })?;
        Ok(Box::new(LocalWriter {
            lockfile,
            tmpfile,
            destination,
            file: BufWriter::new(file),
        }))
    }

    fn read_chunk(&self, name: &str) -> Result<Box<dyn Read + '_>, StorageError> {
        let path = self.resolve(name)?;
        let file = File::open(&path).map_err(|source| StorageError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Box::new(file))
    }
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), StorageError> {
    for entry in fs::read_dir(dir).map_err(|source| StorageError::Io {
        path: dir.display().to_string(),
        source,
    })? {
        let entry = entry.map_err(|source| StorageError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            walk(root, &path, out)?;
            continue;
        }
        let ext = path.extension().and_then(|e| e.to_str());
        if matches!(ext, Some("lock") | Some("tmp")) {
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .expect("walked path must be under root")
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");
        out.push(relative);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path()).unwrap();
        let mut w = storage.write_chunk("00000/abcd/chunk.datawatch.json").unwrap();
        w.write_all(b"payload").unwrap();
        w.finish().unwrap();
        let mut r = storage.read_chunk("00000/abcd/chunk.datawatch.json").unwrap();
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"payload");
        assert_eq!(
            storage.list_chunks().unwrap(),
            vec!["00000/abcd/chunk.datawatch.json"]
        );
    }

    #[test]
    fn writing_existing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path()).unwrap();
        let mut w = storage.write_chunk("a/b/c.datawatch.json").unwrap();
        w.write_all(b"x").unwrap();
        w.finish().unwrap();
        assert!(storage.write_chunk("a/b/c.datawatch.json").is_err());
    }

    #[test]
    fn path_escape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path()).unwrap();
        assert!(matches!(
            storage.write_chunk("../escape.datawatch.json"),
            Err(StorageError::PathEscape(_))
        ));
    }

    #[test]
    fn no_lock_or_tmp_files_left_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(dir.path()).unwrap();
        let mut w = storage.write_chunk("x/y/z.datawatch.json").unwrap();
        w.write_all(b"data").unwrap();
        w.finish().unwrap();
        let entries: Vec<_> = walkdir_flat(dir.path());
        assert!(entries.iter().all(|p| !p.ends_with(".lock") && !p.ends_with(".tmp")));
    }

    fn walkdir_flat(root: &Path) -> Vec<String> {
        let mut out = Vec::new();
        fn rec(dir: &Path, out: &mut Vec<String>) {
            for entry in fs::read_dir(dir).unwrap() {
                let entry = entry.unwrap();
                let path = entry.path();
                if path.is_dir() {
                    rec(&path, out);
                } else {
                    out.push(path.to_string_lossy().to_string());
                }
            }
        }
        rec(root, &mut out);
        out
    }
}
