//! Store Metrics System
//!
//! Provides counters for store activity and a [`CacheMetrics`] trait that
//! reports them as a `BTreeMap<String, f64>`.
//!
//! # Why BTreeMap over HashMap?
//!
//! BTreeMap is used instead of HashMap so reports are deterministic:
//! - **Deterministic ordering**: Metrics always appear in consistent order
//! - **Reproducible output**: Test assertions and log lines compare cleanly
//! - **Stable serialization**: Exports have predictable key ordering
//!
//! # Concurrency
//!
//! Stores are shared between caller threads and the background scheduler, so
//! every counter is an `AtomicU64` updated with relaxed ordering. A report is
//! a best-effort snapshot, not a consistent cut across counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters common to every store.
#[derive(Debug, Default)]
pub struct CoreStoreMetrics {
    /// Total number of lookups (`get` and `get_quiet`)
    pub requests: AtomicU64,

    /// Lookups that found a live element
    pub hits: AtomicU64,

    /// Elements handed to the store through `put`
    pub puts: AtomicU64,

    /// Elements removed by the eviction sampler
    pub evictions: AtomicU64,

    /// Elements removed because their deadline passed
    pub expirations: AtomicU64,

    /// Spool batches written to disk
    pub flushes: AtomicU64,

    /// Bytes of element records written to the data file
    pub bytes_written: AtomicU64,

    /// Index snapshots persisted
    pub index_writes: AtomicU64,

    /// Writes dropped after a serialization or I/O failure
    pub write_failures: AtomicU64,
}

impl CoreStoreMetrics {
    /// Creates a zeroed metrics block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a lookup that found a live element.
    #[inline]
    pub fn record_hit(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a lookup that found nothing (or found an expired element).
    #[inline]
    pub fn record_miss(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an element handed to `put`.
    #[inline]
    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an eviction.
    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records `count` expirations.
    #[inline]
    pub fn record_expirations(&self, count: usize) {
        self.expirations.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records a spool batch written to disk.
    #[inline]
    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a record of `bytes` written to the data file.
    #[inline]
    pub fn record_write(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a persisted index snapshot.
    #[inline]
    pub fn record_index_write(&self) {
        self.index_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a dropped write.
    #[inline]
    pub fn record_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Fraction of lookups that hit, between 0.0 and 1.0.
    pub fn hit_rate(&self) -> f64 {
        let requests = self.requests.load(Ordering::Relaxed);
        if requests > 0 {
            self.hits.load(Ordering::Relaxed) as f64 / requests as f64
        } else {
            0.0
        }
    }

    /// Convert core metrics to BTreeMap for reporting
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed) as f64;
        let mut metrics = BTreeMap::new();

        metrics.insert("bytes_written".to_string(), load(&self.bytes_written));
        metrics.insert("evictions".to_string(), load(&self.evictions));
        metrics.insert("expirations".to_string(), load(&self.expirations));
        metrics.insert("flushes".to_string(), load(&self.flushes));
        metrics.insert("hits".to_string(), load(&self.hits));
        metrics.insert("index_writes".to_string(), load(&self.index_writes));
        metrics.insert("puts".to_string(), load(&self.puts));
        metrics.insert("requests".to_string(), load(&self.requests));
        metrics.insert("write_failures".to_string(), load(&self.write_failures));

        let requests = self.requests.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        metrics.insert("misses".to_string(), requests.saturating_sub(hits) as f64);
        metrics.insert("hit_rate".to_string(), self.hit_rate());

        metrics
    }
}

/// Trait that every store implements for metrics reporting
///
/// The trait uses BTreeMap to ensure deterministic ordering of metrics, which
/// keeps reports reproducible.
pub trait CacheMetrics {
    /// Returns all metrics as key-value pairs in deterministic order
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Store kind for identification (e.g. "DiskStore", "MemoryStore")
    fn algorithm_name(&self) -> &'static str;
}
