//! One key's full version history: a chronological run of incarnations,
//! partitioned into an already-flushed prefix and an unflushed tail.

use std::collections::HashMap;

use super::header::{ChunkBody, ChunkFile, ContentEncoding, DatadiffHeader, Record, VersionsHeader};
use super::incarnation::Incarnation;
use super::DatadiffError;
use crate::filenames::{self, FileInfo};
use crate::methods::Codecs;
use crate::storage::Storage;

/// Lifecycle state of an [`Entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Just constructed or reloaded from storage; nothing pending.
    Fresh,
    /// Has incarnations that have not yet been durably flushed.
    Dirty,
    /// Every known incarnation has been flushed.
    Flushed,
}

/// How much of a key's history [`super::Collection`] reconstructs when an
/// entry is first touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Load only the current epoch: the dependency chain back to its
    /// nearest independent (full) chunk. Cheap, but versions from an
    /// earlier epoch (before that chunk) are not reconstructed.
    OnlyFromLastCheckpoint,
    /// Load every epoch, so every version ever flushed is available to
    /// [`Entry::read_data_at`].
    FullHistory,
}

/// Summary statistics about one entry's known history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStats {
    /// The entry's key.
    pub key: String,
    /// Total incarnations currently held in memory (flushed + pending).
    pub incarnation_count: usize,
    /// The earliest version known for this entry.
    pub first_version: Option<String>,
    /// The most recent version known for this entry.
    pub last_version: Option<String>,
    /// Incarnations recorded since the last flush.
    pub unflushed_count: usize,
}

/// One key's full version history.
pub struct Entry {
    key: String,
    state: EntryState,
    incarnations: Vec<Incarnation>,
    first_unflushed: usize,
    chain_length: i64,
    /// The earliest version ever recorded for this key. Stamped once at
    /// creation and carried forward unchanged across every later flush
    /// and reload; it is not the same thing as the oldest incarnation
    /// currently resident in `incarnations`, which shrinks as flushes
    /// drop their baseline forward.
    first_known_version: String,
}

impl Entry {
    /// Start a brand-new entry from its first observed `(version, data)`.
    pub fn create_initial(key: impl Into<String>, version: impl Into<String>, data: Vec<u8>) -> Self {
        let version = version.into();
        Self {
            key: key.into(),
            state: EntryState::Dirty,
            first_known_version: version.clone(),
            incarnations: vec![Incarnation::new(data, version)],
            first_unflushed: 0,
            chain_length: 0,
        }
    }

    /// Reconstruct an entry from incarnations already recovered from
    /// storage; everything supplied here counts as flushed.
    /// `first_known_version` comes from the loaded chunks' headers
    /// (consistent across every chunk ever flushed for this key).
    pub(super) fn from_loaded(
        key: String,
        incarnations: Vec<Incarnation>,
        chain_length: i64,
        first_known_version: String,
    ) -> Self {
        let first_unflushed = incarnations.len();
        Self {
            key,
            state: EntryState::Fresh,
            incarnations,
            first_unflushed,
            chain_length,
            first_known_version,
        }
    }

    /// The entry's key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The entry's current lifecycle state.
    pub fn state(&self) -> EntryState {
        self.state
    }

    /// The most recently observed incarnation, if any is known.
    pub fn latest(&self) -> Option<&Incarnation> {
        self.incarnations.last()
    }

    /// Every incarnation known for this entry, oldest first.
    pub fn incarnations(&self) -> &[Incarnation] {
        &self.incarnations
    }

    /// Whether anything is pending a flush.
    pub fn is_dirty(&self) -> bool {
        self.first_unflushed < self.incarnations.len()
    }

    /// Record a newly observed `(version, data)` pair. Returns `true` if
    /// the bytes differ from the last known incarnation; identical bytes
    /// are not recorded, since they carry no new information.
    pub fn update_data(&mut self, version: impl Into<String>, data: Vec<u8>) -> bool {
        if let Some(last) = self.incarnations.last() {
            if last.data() == data.as_slice() {
                return false;
            }
        }
        self.incarnations.push(Incarnation::new(data, version));
        self.state = EntryState::Dirty;
        true
    }

    /// The content known to be current as of `version`: the latest
    /// incarnation at or before it. Rejects three distinct ways a
    /// version can be unreachable: before anything was ever recorded,
    /// before what is still resident (already flushed away), or after
    /// everything recorded so far.
    pub fn read_data_at(&self, version: &str) -> Result<&[u8], DatadiffError> {
        if version_lt(version, &self.first_known_version) {
            return Err(DatadiffError::NeverKnown {
                key: self.key.clone(),
                version: version.to_string(),
                first_known_version: self.first_known_version.clone(),
            });
        }
        let first_contained = self
            .incarnations
            .first()
            .map(|inc| inc.version().to_string())
            .unwrap_or_else(|| self.first_known_version.clone());
        if version_lt(version, &first_contained) {
            return Err(DatadiffError::Flushed {
                key: self.key.clone(),
                version: version.to_string(),
                first_contained_version: first_contained,
            });
        }
        let last_contained = self.incarnations.last().map(|inc| inc.version().to_string());
        if let Some(last_contained) = &last_contained {
            if version_lt(last_contained, version) {
                return Err(DatadiffError::NotYetKnown {
                    key: self.key.clone(),
                    version: version.to_string(),
                    last_contained_version: last_contained.clone(),
                });
            }
        }
        self.incarnations
            .iter()
            .rev()
            .find(|inc| version_le(inc.version(), version))
            .map(Incarnation::data)
            .ok_or_else(|| DatadiffError::NotYetKnown {
                key: self.key.clone(),
                version: version.to_string(),
                last_contained_version: last_contained.unwrap_or_else(|| self.first_known_version.clone()),
            })
    }

    /// Summary statistics for this entry.
    pub fn compute_stats(&self) -> EntryStats {
        EntryStats {
            key: self.key.clone(),
            incarnation_count: self.incarnations.len(),
            first_version: self.incarnations.first().map(|i| i.version().to_string()),
            last_version: self.incarnations.last().map(|i| i.version().to_string()),
            unflushed_count: self.incarnations.len() - self.first_unflushed,
        }
    }

    /// Encode the unflushed tail (up to `max_records`) into one chunk and
    /// mark those incarnations flushed. Returns `None` once nothing is
    /// left to flush; callers loop until that happens to drain a large
    /// backlog across several chunks.
    pub fn flush(
        &mut self,
        max_records: usize,
        max_chain_length: i64,
        codecs: &Codecs,
    ) -> Result<Option<(String, Vec<u8>)>, DatadiffError> {
        if !self.is_dirty() {
            return Ok(None);
        }
        let available = self.incarnations.len() - self.first_unflushed;
        let take = available.min(max_records.max(1));
        let start = self.first_unflushed;
        let end = start + take;

        let mut baseline = if start > 0 {
            self.incarnations.get(start - 1)
        } else {
            None
        };
        let mut depends_on_version = baseline.map(|b| b.version().to_string());
        let mut new_chain_length = if depends_on_version.is_some() {
            self.chain_length + 1
        } else {
            0
        };
        if new_chain_length > max_chain_length {
            // The chain grew too deep: break it here rather than fail
            // the flush. The next record is built with no baseline, so
            // it is encoded as an independent full (or full_compressed)
            // record instead of a diff.
            baseline = None;
            depends_on_version = None;
            new_chain_length = 0;
        }

        let mut records = Vec::with_capacity(take);
        let mut seen: HashMap<String, &Incarnation> = HashMap::new();
        let mut prev = baseline;
        for inc in &self.incarnations[start..end] {
            let record = inc.as_record(prev, &seen);
            seen.insert(inc.content_hash_digest().to_string(), inc);
            records.push(record);
            prev = Some(inc);
        }

        let first_version = self.incarnations[start].version().to_string();
        let last_version = self.incarnations[end - 1].version().to_string();

        let fileinfo = FileInfo {
            key: self.key.clone(),
            first_version: first_version.clone(),
            last_version: last_version.clone(),
            depends_on_version: depends_on_version.clone(),
            dependency_chain_length: new_chain_length,
        };
        let nameinfo = filenames::compute_nameinfo(&fileinfo, codecs)?;
        let filename = filenames::encode_filename_from_nameinfo(&nameinfo)?;

        let header = DatadiffHeader {
            magic: super::FORMAT_MAGIC.to_string(),
            format_version: super::FORMAT_VERSION.to_string(),
            software_version: super::SOFTWARE_VERSION.to_string(),
            name: filename.clone(),
            nameinfo,
            key: self.key.clone(),
            methods: crate::methods::active_methods()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            versioninfo: VersionsHeader {
                first_contained_version: first_version,
                last_contained_version: last_version,
                first_known_version: self.first_known_version.clone(),
                last_contained_version_with_diff: last_diff_version(&records),
                depends_on_external_version: depends_on_version,
            },
        };
        let body = ChunkFile {
            datawatch: ChunkBody {
                header,
                content: records,
            },
        };
        let bytes = serde_json::to_vec(&body)?;

        // Durably written: drop everything before the flushed range's
        // last element. That element becomes the sole retained baseline
        // for whatever was recorded after it; nothing earlier needs to
        // stay resident. `Incarnation` is not `Clone`, so move rather
        // than copy it out.
        let mut backlog = self.incarnations.split_off(end);
        let new_baseline = self
            .incarnations
            .pop()
            .expect("end > start, so at least one incarnation was flushed");
        let mut retained = Vec::with_capacity(1 + backlog.len());
        retained.push(new_baseline);
        retained.append(&mut backlog);
        self.incarnations = retained;
        self.first_unflushed = 1;

        self.chain_length = new_chain_length;
        self.state = if self.is_dirty() {
            EntryState::Dirty
        } else {
            EntryState::Flushed
        };

        Ok(Some((filename, bytes)))
    }

    /// Write an already-[`Entry::flush`]ed chunk to `storage`.
    pub fn write_dump(storage: &dyn Storage, filename: &str, bytes: &[u8]) -> Result<(), DatadiffError> {
        use std::io::Write;
        let mut writer = storage.write_chunk(filename)?;
        writer.write_all(bytes)?;
        writer.finish()?;
        Ok(())
    }
}

fn last_diff_version(records: &[Record]) -> Option<String> {
    records.iter().rev().find_map(|r| match &r.content {
        ContentEncoding::Diff { .. } => Some(r.metadata.version.clone()),
        _ => None,
    })
}

/// Version ordering: decimal strings compare numerically; anything else
/// falls back to lexical order rather than panicking.
fn version_le(a: &str, b: &str) -> bool {
    match (a.parse::<i128>(), b.parse::<i128>()) {
        (Ok(a), Ok(b)) => a <= b,
        _ => a <= b,
    }
}

fn version_lt(a: &str, b: &str) -> bool {
    match (a.parse::<i128>(), b.parse::<i128>()) {
        (Ok(a), Ok(b)) => a < b,
        _ => a < b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    #[test]
    fn create_initial_is_dirty() {
        let entry = Entry::create_initial("k", "1", b"hello".to_vec());
        assert!(entry.is_dirty());
        assert_eq!(entry.state(), EntryState::Dirty);
    }

    #[test]
    fn update_data_skips_identical_bytes() {
        let mut entry = Entry::create_initial("k", "1", b"hello".to_vec());
        assert!(!entry.update_data("2", b"hello".to_vec()));
        assert_eq!(entry.compute_stats().incarnation_count, 1);
    }

    #[test]
    fn update_data_records_changed_bytes() {
        let mut entry = Entry::create_initial("k", "1", b"hello".to_vec());
        assert!(entry.update_data("2", b"goodbye".to_vec()));
        assert_eq!(entry.compute_stats().incarnation_count, 2);
    }

    #[test]
    fn flush_then_drain_marks_flushed() {
        let codecs = Codecs::new();
        let storage = InMemoryStorage::new();
        let mut entry = Entry::create_initial("https://example.com/a", "1", b"hello".to_vec());
        entry.update_data("2", b"goodbye".to_vec());
        entry.update_data("3", b"goodbye again, different".to_vec());

        while let Some((name, bytes)) = entry.flush(2, 32, &codecs).unwrap() {
            Entry::write_dump(&storage, &name, &bytes).unwrap();
        }
        assert_eq!(entry.state(), EntryState::Flushed);
        assert!(storage.list_chunks().unwrap().len() >= 1);
    }

    #[test]
    fn read_data_at_returns_latest_at_or_before_version() {
        let mut entry = Entry::create_initial("k", "100", b"v1".to_vec());
        entry.update_data("200", b"v2".to_vec());
        entry.update_data("300", b"v3".to_vec());
        assert_eq!(entry.read_data_at("250").unwrap(), b"v2");
        assert_eq!(entry.read_data_at("300").unwrap(), b"v3");
        assert!(entry.read_data_at("50").is_err());
    }

    #[test]
    fn chain_length_cap_wraps_instead_of_erroring() {
        let codecs = Codecs::new();
        let mut entry = Entry::create_initial("k", "1", b"a".to_vec());
        entry.flush(1, 32, &codecs).unwrap();
        entry.update_data("2", b"b".to_vec());
        let (_, bytes) = entry.flush(1, 0, &codecs).unwrap().expect("entry was dirty");
        assert_eq!(entry.chain_length, 0);

        let body: crate::datadiff::ChunkFile = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.datawatch.header.versioninfo.depends_on_external_version, None);
        assert_eq!(body.datawatch.header.nameinfo.dependency_chain_length, 0);
    }

    #[test]
    fn flush_truncates_in_memory_history_to_one_baseline() {
        let codecs = Codecs::new();
        let storage = InMemoryStorage::new();
        let mut entry = Entry::create_initial("k", "1", b"a".to_vec());
        entry.update_data("2", b"b".to_vec());
        let (name, bytes) = entry.flush(usize::MAX, 32, &codecs).unwrap().expect("entry was dirty");
        Entry::write_dump(&storage, &name, &bytes).unwrap();

        // Only the flushed baseline stays resident; the two original
        // incarnations are not both kept in memory forever.
        assert_eq!(entry.incarnations().len(), 1);
        assert_eq!(entry.incarnations()[0].version(), "2");
    }

    #[test]
    fn read_data_at_distinguishes_never_known_flushed_and_not_yet() {
        let codecs = Codecs::new();
        let storage = InMemoryStorage::new();
        let mut entry = Entry::create_initial("k", "10", b"a".to_vec());
        entry.update_data("20", b"b".to_vec());
        let (name, bytes) = entry.flush(usize::MAX, 32, &codecs).unwrap().expect("entry was dirty");
        Entry::write_dump(&storage, &name, &bytes).unwrap();

        assert!(matches!(entry.read_data_at("20"), Ok(d) if d == b"b"));
        assert!(matches!(entry.read_data_at("5"), Err(DatadiffError::NeverKnown { .. })));
        assert!(matches!(entry.read_data_at("15"), Err(DatadiffError::Flushed { .. })));
        assert!(matches!(entry.read_data_at("100"), Err(DatadiffError::NotYetKnown { .. })));
    }
}
