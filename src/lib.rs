#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! ## Component Map
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │ Cache<K, V>                                                             │
//! │   StripedMutex ── per-key critical sections (put / get / remove)        │
//! │                                                                         │
//! │   ┌─────────────────────┐   victims    ┌─────────────────────────────┐  │
//! │   │ MemoryStore         │ ───────────▶ │ DiskStore                   │  │
//! │   │ SampledMap + policy │ ◀─────────── │ spool ─▶ spool thread       │  │
//! │   └─────────────────────┘   promotion  │ index + free list + file    │  │
//! │                                        └─────────────────────────────┘  │
//! │   RegisteredListeners ◀── expiry / eviction from either tier            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Reference
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Cache`] | Memory tier overflowing into an optional disk tier |
//! | [`MemoryStore`] | Bounded in-memory store, sampled LFU / LRU / FIFO eviction |
//! | [`DiskStore`] | Data-file store with write-behind spool and persistent index |
//! | [`StripedMutex`] | Fixed array of locks selected by key hash |
//! | [`Element`] | Key, value, timestamps, hit count and expiry policy |
//!
//! ## Disk Store
//!
//! ```rust
//! use spoolcache::config::DiskStoreConfig;
//! use spoolcache::{DiskStore, Element, Store};
//!
//! let dir = std::env::temp_dir().join("spoolcache-doc-lib");
//! let config = DiskStoreConfig::new("orders", &dir).with_max_elements_on_disk(1_000);
//! let store: DiskStore<u64, String> = DiskStore::open(config).unwrap();
//!
//! store.put(Element::new(7, "seven".to_string()));
//! assert!(store.contains_key(&7));
//! assert_eq!(store.get(&7).unwrap().value, "seven");
//!
//! store.dispose();
//! ```
//!
//! ## Two-Tier Cache
//!
//! ```rust
//! use spoolcache::config::CacheConfig;
//! use spoolcache::Cache;
//!
//! let config = CacheConfig::new("pages", 2).with_overflow_to_disk(true);
//! let cache: Cache<String, Vec<u8>> = Cache::new(config).unwrap();
//!
//! for i in 0..5 {
//!     cache.put_value(format!("page-{}", i), vec![i as u8; 64]);
//! }
//! // two elements stay in memory, the rest spilled to disk
//! assert_eq!(cache.memory_size(), 2);
//! assert_eq!(cache.size(), 5);
//! assert_eq!(cache.get(&"page-0".to_string()).unwrap().value, vec![0u8; 64]);
//!
//! cache.dispose();
//! ```
//!
//! ## Listeners
//!
//! ```rust
//! use spoolcache::{CacheEventListener, Element, EvictionPolicy, MemoryStore, Store};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct Evictions(AtomicUsize);
//!
//! impl CacheEventListener<String, u32> for Evictions {
//!     fn notify_element_evicted(&self, _element: &Element<String, u32>) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let store = MemoryStore::new("counted", 1, EvictionPolicy::Lfu);
//! let evictions = Arc::new(Evictions::default());
//! store.listeners().register(evictions.clone());
//!
//! store.put(Element::new("a".to_string(), 1));
//! store.put(Element::new("b".to_string(), 2));
//! assert_eq!(evictions.0.load(Ordering::SeqCst), 1);
//! ```

#[cfg(test)]
extern crate scoped_threadpool;

/// Cached elements and their expiry arithmetic.
pub mod element;

/// Binary encoding of keys, values and element records.
pub mod codec;

/// Error types.
pub mod error;

/// Store and cache configuration structures.
pub mod config;

/// Lock striping.
pub mod concurrent;

/// Eviction policies and the sampling selector.
pub mod policy;

/// Hash map with uniform random sampling, backing both stores.
pub mod sampled;

/// Expiry and eviction listeners.
pub mod event;

/// Store metrics.
///
/// Every store reports atomic counters through the [`metrics::CacheMetrics`]
/// trait as a deterministic `BTreeMap`.
pub mod metrics;

/// The store contract and its memory and disk implementations.
pub mod store;

/// The two-tier cache facade.
pub mod cache;

pub use cache::Cache;
pub use concurrent::StripedMutex;
pub use element::Element;
pub use error::{CodecError, StoreError};
pub use event::{CacheEventListener, RegisteredListeners};
pub use metrics::CacheMetrics;
pub use policy::EvictionPolicy;
pub use store::disk::DiskBlock;
pub use store::{DiskStore, MemoryStore, Status, Store};
