//! Persistence Tests
//!
//! Reopening persistent stores from their index, and the recovery paths taken
//! when the index and data file disagree.

use spoolcache::config::DiskStoreConfig;
use spoolcache::{DiskStore, Element, Store};
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

fn persistent(dir: &Path) -> DiskStoreConfig {
    DiskStoreConfig::new("persisted", dir)
        .with_persistent(true)
        .with_spool_interval(Duration::from_millis(20))
}

fn open(config: DiskStoreConfig) -> DiskStore<u64, String> {
    DiskStore::open(config).expect("store should open")
}

fn settle(store: &DiskStore<u64, String>) {
    store.flush();
    let deadline = Instant::now() + Duration::from_secs(10);
    while store.flush_pending() {
        assert!(Instant::now() < deadline, "flush did not complete in time");
        thread::sleep(Duration::from_millis(5));
    }
}

fn fill(store: &DiskStore<u64, String>, count: u64) {
    for i in 0..count {
        store.put(Element::new(i, format!("value-{}", i)));
    }
}

#[test]
fn test_reopen_restores_all_elements() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(persistent(dir.path()));
        fill(&store, 10);
        settle(&store);
        store.dispose();
    }

    let store = open(persistent(dir.path()));
    assert_eq!(store.size(), 10);
    for i in 0..10 {
        assert_eq!(store.get(&i).unwrap().value, format!("value-{}", i));
    }
}

#[test]
fn test_dispose_writes_pending_spool_and_index() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(persistent(dir.path()).with_spool_interval(Duration::from_secs(60)));
        fill(&store, 10);
        assert!(store.spool_len() > 0);
        store.dispose();
    }

    let store = open(persistent(dir.path()));
    assert_eq!(store.size(), 10);
    assert_eq!(store.get(&9).unwrap().value, "value-9");
}

#[test]
fn test_drop_disposes_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(persistent(dir.path()));
        fill(&store, 3);
    }

    let store = open(persistent(dir.path()));
    assert_eq!(store.size(), 3);
}

#[test]
fn test_hit_counts_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(persistent(dir.path()));
        fill(&store, 2);
        settle(&store);
        store.get(&1);
        store.get(&1);
        store.dispose();
    }

    let store = open(persistent(dir.path()));
    assert_eq!(store.disk_block(&1).unwrap().hit_count(), 2);
    assert_eq!(store.disk_block(&0).unwrap().hit_count(), 0);
}

#[test]
fn test_free_list_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let freed_offset;
    {
        let store = open(persistent(dir.path()));
        store.put(Element::new(1, "x".repeat(200)));
        store.put(Element::new(2, "y".repeat(10)));
        settle(&store);
        freed_offset = store.disk_block(&1).unwrap().offset();
        store.remove(&1);
        store.dispose();
    }

    let store = open(persistent(dir.path()));
    assert_eq!(store.free_block_count(), 1);
    let file_size = store.data_file_size();

    store.put(Element::new(3, "z".repeat(50)));
    settle(&store);
    assert_eq!(store.disk_block(&3).unwrap().offset(), freed_offset);
    assert_eq!(store.data_file_size(), file_size);
}

#[test]
fn test_corrupt_index_discards_data() {
    let dir = tempfile::tempdir().unwrap();
    let config = persistent(dir.path());
    {
        let store = open(config.clone());
        fill(&store, 10);
        settle(&store);
        store.dispose();
    }
    fs::write(config.index_file_path(), b"definitely not an index").unwrap();

    let store = open(config);
    assert_eq!(store.size(), 0);
    assert_eq!(store.data_file_size(), 0);
    assert!(store.get(&0).is_none());
}

#[test]
fn test_index_pointing_past_data_file_discards_data() {
    let dir = tempfile::tempdir().unwrap();
    let config = persistent(dir.path());
    {
        let store = open(config.clone());
        fill(&store, 5);
        settle(&store);
        store.dispose();
    }
    fs::OpenOptions::new()
        .write(true)
        .open(config.data_file_path())
        .unwrap()
        .set_len(4)
        .unwrap();

    let store = open(config);
    assert_eq!(store.size(), 0);
    assert_eq!(store.data_file_size(), 0);
}

#[test]
fn test_missing_index_discards_data() {
    let dir = tempfile::tempdir().unwrap();
    let config = persistent(dir.path());
    {
        let store = open(config.clone());
        fill(&store, 5);
        settle(&store);
        store.dispose();
    }
    fs::remove_file(config.index_file_path()).unwrap();

    let store = open(config);
    assert_eq!(store.size(), 0);
    assert_eq!(store.data_file_size(), 0);
}

#[test]
fn test_index_without_data_file_is_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let config = persistent(dir.path());
    {
        let store = open(config.clone());
        fill(&store, 5);
        settle(&store);
        store.dispose();
    }
    fs::remove_file(config.data_file_path()).unwrap();

    let store = open(config.clone());
    assert_eq!(store.size(), 0);
    assert!(!config.index_file_path().exists());
}

#[test]
fn test_non_persistent_store_starts_empty_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let config = DiskStoreConfig::new("scratch", dir.path());
    {
        let store = open(config.clone());
        fill(&store, 5);
        settle(&store);
        assert!(config.data_file_path().exists());
        store.dispose();
    }
    assert!(!config.data_file_path().exists());
    assert!(!config.index_file_path().exists());

    let store = open(config);
    assert_eq!(store.size(), 0);
}

#[test]
fn test_non_persistent_store_ignores_leftover_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = DiskStoreConfig::new("leftover", dir.path());
    fs::write(config.data_file_path(), b"stale bytes").unwrap();
    fs::write(config.index_file_path(), b"stale index").unwrap();

    let store = open(config.clone());
    assert_eq!(store.size(), 0);
    assert_eq!(store.data_file_size(), 0);
    assert!(!config.index_file_path().exists());
}

#[test]
fn test_auto_generated_directory_is_removed_on_dispose() {
    let config = DiskStoreConfig::in_auto_generated_directory("auto")
        .with_persistent(true)
        .with_spool_interval(Duration::from_millis(20));
    let dir = config.disk_path.clone();
    assert!(config.is_auto_generated());

    let store = open(config);
    fill(&store, 5);
    settle(&store);
    assert!(dir.exists());
    assert!(store.data_file_path().exists());

    store.dispose();
    assert!(!dir.exists());
}

#[test]
fn test_remove_all_truncates_persisted_index() {
    let dir = tempfile::tempdir().unwrap();
    let config = persistent(dir.path());
    {
        let store = open(config.clone());
        fill(&store, 5);
        settle(&store);
        assert!(store.index_file_size() > 0);

        store.remove_all().unwrap();
        assert_eq!(store.index_file_size(), 0);
        assert_eq!(store.data_file_size(), 0);
        store.dispose();
    }

    let store = open(config);
    assert_eq!(store.size(), 0);
}

#[test]
fn test_expired_elements_stay_expired_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(persistent(dir.path()));
        store.put(Element::new(1, "short".to_string()).with_time_to_live(Duration::from_millis(30)));
        store.put(Element::new(2, "long".to_string()));
        settle(&store);
        store.dispose();
    }
    thread::sleep(Duration::from_millis(60));

    let store = open(persistent(dir.path()));
    assert!(store.get(&1).is_none());
    assert_eq!(store.get(&2).unwrap().value, "long");
}
