//! End-to-end exercise of [`datawatch::datadiff::Collection`] against a
//! real [`datawatch::storage::LocalFileStorage`] directory: record a few
//! versions, flush to disk, drop the in-memory collection entirely, then
//! reopen a fresh collection over the same directory and confirm every
//! version is still reachable.

use std::sync::Arc;

use datawatch::datadiff::{Collection, LoadMode};
use datawatch::methods::Codecs;
use datawatch::storage::LocalFileStorage;

fn open(dir: &std::path::Path, load_mode: LoadMode) -> Collection {
    let storage = Arc::new(LocalFileStorage::new(dir).unwrap());
    Collection::new(storage, Codecs::new(), load_mode)
}

#[test]
fn survives_a_fresh_process_reopening_the_directory() {
    let dir = tempfile::tempdir().unwrap();
    let key = "https://example.com/page";

    {
        let mut collection = open(dir.path(), LoadMode::FullHistory);
        assert!(collection.update_data(key, "100", b"version one".to_vec()).unwrap());
        assert!(collection.update_data(key, "200", b"version two".to_vec()).unwrap());
        assert!(!collection.update_data(key, "300", b"version two".to_vec()).unwrap());
        assert!(collection.update_data(key, "400", b"version three".to_vec()).unwrap());
        let flushed = collection.sync_and_flush().unwrap();
        assert!(flushed > 0);
    }

    let mut reopened = open(dir.path(), LoadMode::FullHistory);
    assert_eq!(reopened.read_data_at(key, "100").unwrap(), b"version one");
    assert_eq!(reopened.read_data_at(key, "200").unwrap(), b"version two");
    assert_eq!(reopened.read_data_at(key, "300").unwrap(), b"version two");
    assert_eq!(reopened.read_data_at(key, "400").unwrap(), b"version three");
    assert_eq!(reopened.latest_version(key).unwrap().as_deref(), Some("400"));
}

#[test]
fn chain_length_cap_is_enforced_across_separate_flushes() {
    let dir = tempfile::tempdir().unwrap();
    let key = "https://example.com/chunked";

    let mut collection = open(dir.path(), LoadMode::FullHistory).with_limits(2, 4096);
    for version in ["1", "2", "3"] {
        collection.update_data(key, version, format!("body-{version}").into_bytes()).unwrap();
        collection.sync_and_flush().unwrap();
    }
    assert_eq!(collection.read_data_at(key, "1").unwrap(), b"body-1");
    assert_eq!(collection.read_data_at(key, "3").unwrap(), b"body-3");

    collection.update_data(key, "4", b"body-4".to_vec()).unwrap();
    assert!(collection.sync_and_flush().is_err());
}

#[test]
fn independent_keys_do_not_interfere() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut collection = open(dir.path(), LoadMode::FullHistory);
        collection.update_data("https://a.example/", "1", b"a-data".to_vec()).unwrap();
        collection.update_data("https://b.example/", "1", b"b-data".to_vec()).unwrap();
        collection.sync_and_flush().unwrap();
    }

    let mut reopened = open(dir.path(), LoadMode::FullHistory);
    assert_eq!(reopened.read_data_at("https://a.example/", "1").unwrap(), b"a-data");
    assert_eq!(reopened.read_data_at("https://b.example/", "1").unwrap(), b"b-data");
}
