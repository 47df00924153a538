//! Stress Tests for Concurrent Store Access
//!
//! These tests hammer the disk store and the two-tier cache from many threads
//! while the spool thread drains in the background, then check that the
//! bookkeeping still adds up.

use spoolcache::config::{CacheConfig, DiskStoreConfig};
use spoolcache::{Cache, DiskStore, Element, Store, StripedMutex};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const NUM_THREADS: usize = 8;
const OPS_PER_THREAD: usize = 500;

fn disk_config(dir: &Path) -> DiskStoreConfig {
    DiskStoreConfig::new("stress", dir).with_spool_interval(Duration::from_millis(5))
}

fn overflow_config(dir: &Path, max_in_memory: usize, stripes: usize) -> CacheConfig {
    CacheConfig::new("stress-cache", max_in_memory)
        .with_overflow_to_disk(true)
        .with_lock_stripes(stripes)
        .with_disk(disk_config(dir))
}

fn settle(store: &DiskStore<usize, Vec<u8>>) {
    store.flush();
    let deadline = Instant::now() + Duration::from_secs(20);
    while store.flush_pending() {
        assert!(Instant::now() < deadline, "flush did not complete in time");
        thread::sleep(Duration::from_millis(5));
    }
}

fn assert_accounting(store: &DiskStore<usize, Vec<u8>>) {
    let keys = store.keys();
    let used: u64 = keys
        .iter()
        .filter_map(|key| store.disk_block(key))
        .map(|block| u64::from(block.used_size()))
        .sum();
    assert_eq!(store.used_data_size(), used);
    assert!(used <= store.data_file_size());
    assert_eq!(keys.len(), store.size());
}

/// Distinct keys from every thread all land on disk
#[test]
fn stress_disk_store_distinct_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<DiskStore<usize, Vec<u8>>> =
        Arc::new(DiskStore::open(disk_config(dir.path())).unwrap());

    let mut handles = Vec::new();
    for t in 0..NUM_THREADS {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                let key = t * OPS_PER_THREAD + i;
                store.put(Element::new(key, vec![(key % 251) as u8; 16 + key % 64]));
                if i % 7 == 0 {
                    assert!(store.get(&key).is_some());
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    settle(&store);
    assert_eq!(store.size(), NUM_THREADS * OPS_PER_THREAD);
    assert_eq!(store.spool_len(), 0);
    for key in (0..NUM_THREADS * OPS_PER_THREAD).step_by(97) {
        let element = store.get_quiet(&key).unwrap();
        assert_eq!(element.value, vec![(key % 251) as u8; 16 + key % 64]);
    }
    assert_accounting(&store);
}

/// Mixed puts, gets and removes on a handful of keys
#[test]
fn stress_disk_store_high_contention() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<DiskStore<usize, Vec<u8>>> =
        Arc::new(DiskStore::open(disk_config(dir.path())).unwrap());

    let mut handles = Vec::new();
    for t in 0..NUM_THREADS {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                let key = i % 10;
                match (t + i) % 4 {
                    0 | 1 => store.put(Element::new(key, vec![t as u8; 8 + i % 100])),
                    2 => {
                        let _ = store.get(&key);
                    }
                    _ => {
                        let _ = store.remove(&key);
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    settle(&store);
    assert!(store.size() <= 10);
    assert_accounting(&store);
    assert!(store.is_spool_thread_alive());
}

/// The eviction bound holds under concurrent writers
#[test]
fn stress_disk_store_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<DiskStore<usize, Vec<u8>>> = Arc::new(
        DiskStore::open(disk_config(dir.path()).with_max_elements_on_disk(100)).unwrap(),
    );

    let mut handles = Vec::new();
    for t in 0..NUM_THREADS {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                store.put(Element::new(t * OPS_PER_THREAD + i, vec![1u8; 32]));
            }
        }));
    }
    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    settle(&store);
    assert_eq!(store.size(), 100);
    assert_accounting(&store);
}

/// Expiry sweeps race with writers without corrupting the index
#[test]
fn stress_expiry_during_writes() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<DiskStore<usize, Vec<u8>>> = Arc::new(
        DiskStore::open(disk_config(dir.path()).with_expiry_interval(Duration::from_millis(10)))
            .unwrap(),
    );

    let mut handles = Vec::new();
    for t in 0..NUM_THREADS {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                let key = t * OPS_PER_THREAD + i;
                let element = Element::new(key, vec![2u8; 24]);
                if key % 2 == 0 {
                    store.put(element.with_time_to_live(Duration::from_millis(5)));
                } else {
                    store.put(element);
                }
                if i % 50 == 0 {
                    store.expire_elements();
                }
            }
        }));
    }
    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    thread::sleep(Duration::from_millis(20));
    settle(&store);
    store.expire_elements();

    assert_eq!(store.size(), NUM_THREADS * OPS_PER_THREAD / 2);
    assert!(store.keys().iter().all(|key| key % 2 == 1));
    assert_accounting(&store);
}

/// Every key lives in exactly one tier after concurrent puts and promotions
#[test]
fn stress_cache_tiers_stay_disjoint() {
    for stripes in [1, 16, 2048] {
        let dir = tempfile::tempdir().unwrap();
        let cache: Arc<Cache<usize, Vec<u8>>> =
            Arc::new(Cache::new(overflow_config(dir.path(), 50, stripes)).unwrap());

        let mut handles = Vec::new();
        for t in 0..NUM_THREADS {
            let cache = Arc::clone(&cache);
            handles.push(thread::spawn(move || {
                for i in 0..200 {
                    let key = (t * 200 + i) % 400;
                    cache.put_value(key, vec![t as u8; 16]);
                    let _ = cache.get(&((key * 7) % 400));
                }
            }));
        }
        for handle in handles {
            handle.join().expect("Thread panicked");
        }

        let memory = cache.memory_store();
        let disk = cache.disk_store().unwrap();
        assert!(memory.size() <= 50);
        for key in 0..400 {
            assert!(
                !(memory.contains_key(&key) && disk.contains_key(&key)),
                "key {} in both tiers with {} stripes",
                key,
                stripes
            );
            assert!(cache.get_quiet(&key).is_some(), "key {} lost", key);
        }
        assert_eq!(cache.size(), 400);
        cache.dispose();
    }
}

/// Readers and writers on a scoped pool share one cache without Arc
#[test]
fn stress_cache_scoped_pool() {
    let dir = tempfile::tempdir().unwrap();
    let cache: Cache<usize, Vec<u8>> = Cache::new(overflow_config(dir.path(), 20, 64)).unwrap();
    let hits = AtomicUsize::new(0);

    for key in 0..100 {
        cache.put_value(key, vec![0u8; 8]);
    }

    let mut pool = scoped_threadpool::Pool::new(NUM_THREADS as u32);
    pool.scoped(|scope| {
        for t in 0..NUM_THREADS {
            let cache = &cache;
            let hits = &hits;
            scope.execute(move || {
                for i in 0..OPS_PER_THREAD {
                    let key = (t * 13 + i) % 100;
                    if cache.get(&key).is_some() {
                        hits.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    assert_eq!(hits.load(Ordering::Relaxed), NUM_THREADS * OPS_PER_THREAD);
    assert_eq!(cache.size(), 100);
    cache.dispose();
}

/// Critical sections on the same stripe never overlap
#[test]
fn stress_striped_mutex_exclusion() {
    let locks = Arc::new(StripedMutex::<()>::new(16).unwrap());
    let inside = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..NUM_THREADS {
        let locks = Arc::clone(&locks);
        let inside = Arc::clone(&inside);
        handles.push(thread::spawn(move || {
            for _ in 0..OPS_PER_THREAD {
                let _guard = locks.lock("hot-key");
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                inside.fetch_sub(1, Ordering::SeqCst);
            }
        }));
    }
    for handle in handles {
        handle.join().expect("Thread panicked");
    }
}
