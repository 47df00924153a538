//! Two-tier cache: a bounded memory store overflowing into a disk store.
//!
//! ```text
//!            put(k)                          get(k)
//!              │                               │
//!      lock stripe(k)                   lock stripe(k)
//!              │                               │
//!   ┌──────────▼──────────┐        hit ┌───────▼─────────┐
//!   │ MemoryStore         │◀───────────│ MemoryStore     │
//!   │ insert, maybe evict │            └───────┬─────────┘
//!   └──────────┬──────────┘               miss │
//!        victim│                      ┌────────▼────────┐
//!              ▼                      │ DiskStore       │
//!   ┌─────────────────────┐  promote  │ remove(k)       │
//!   │ DiskStore spool     │◀──────────┴─────────────────┘
//!   └─────────────────────┘  (memory victim spills back)
//! ```
//!
//! An element lives in exactly one tier. Operations on the same key are
//! serialized by a [`StripedMutex`], so a promotion and a concurrent `put` of
//! the same key cannot interleave. A memory victim belongs to some other key
//! whose stripe is not held, so every move between tiers (discarding the old
//! disk copy, inserting into memory, spooling the victim) happens under one
//! short tier lock. Spooling never touches the data file, so the lock is cheap.
//!
//! Listeners registered on the cache see expirations and evictions from both
//! tiers. They are called after the tier lock is released but while the key's
//! stripe is held; a listener must not call back into the cache for the key it
//! is being told about.

use crate::codec::Codec;
use crate::concurrent::StripedMutex;
use crate::config::CacheConfig;
use crate::element::Element;
use crate::error::StoreError;
use crate::event::{CacheEventListener, RegisteredListeners};
use crate::metrics::CacheMetrics;
use crate::store::{DiskStore, MemoryStore, Status, Store};
use core::fmt;
use core::hash::Hash;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// How long `put` backs off when the disk spool is over its threshold.
const BUFFER_FULL_BACKOFF: Duration = Duration::from_millis(50);

/// A memory victim that left the cache instead of moving to disk.
enum Displaced<K, V> {
    Expired(Element<K, V>),
    Evicted(Element<K, V>),
}

/// A cache made of a memory tier and an optional disk tier.
///
/// # Examples
///
/// ```
/// use spoolcache::config::CacheConfig;
/// use spoolcache::Cache;
///
/// let cache: Cache<String, String> = Cache::new(CacheConfig::new("doc", 100)).unwrap();
/// cache.put_value("greeting".to_string(), "hello".to_string());
/// assert_eq!(cache.get(&"greeting".to_string()).unwrap().value, "hello");
/// assert_eq!(cache.size(), 1);
/// ```
pub struct Cache<K, V>
where
    K: Hash + Eq + Clone + Codec + Send + Sync + 'static,
    V: Clone + Codec + Send + Sync + 'static,
{
    config: CacheConfig,
    memory: MemoryStore<K, V>,
    disk: Option<DiskStore<K, V>>,
    locks: StripedMutex,
    tiers: Mutex<()>,
    listeners: Arc<RegisteredListeners<K, V>>,
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + Codec + Send + Sync + 'static,
    V: Clone + Codec + Send + Sync + 'static,
{
    /// Builds the tiers described by `config`.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidConfig`] for a bad stripe count or disk
    /// configuration, [`StoreError::Initialization`] if the disk tier cannot
    /// be opened.
    pub fn new(config: CacheConfig) -> Result<Self, StoreError> {
        let locks = StripedMutex::new(config.lock_stripes)?;
        let listeners = Arc::new(RegisteredListeners::new());
        let memory = MemoryStore::with_listeners(
            config.name.clone(),
            config.max_elements_in_memory,
            config.memory_eviction_policy,
            Arc::clone(&listeners),
        );
        let disk = if config.overflow_to_disk {
            Some(DiskStore::with_listeners(
                config.disk.clone(),
                Arc::clone(&listeners),
            )?)
        } else {
            None
        };

        info!(
            cache = %config.name,
            max_elements_in_memory = config.max_elements_in_memory,
            overflow_to_disk = config.overflow_to_disk,
            "cache initialised"
        );
        Ok(Self {
            config,
            memory,
            disk,
            locks,
            tiers: Mutex::new(()),
            listeners,
        })
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The configuration the cache was built with.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Registers a listener for expirations and evictions from either tier.
    pub fn register_listener(&self, listener: Arc<dyn CacheEventListener<K, V>>) {
        self.listeners.register(listener);
    }

    /// The shared listener registry.
    pub fn listeners(&self) -> &Arc<RegisteredListeners<K, V>> {
        &self.listeners
    }

    /// The memory tier.
    pub fn memory_store(&self) -> &MemoryStore<K, V> {
        &self.memory
    }

    /// The disk tier, if the cache overflows to disk.
    pub fn disk_store(&self) -> Option<&DiskStore<K, V>> {
        self.disk.as_ref()
    }

    /// Creates an element carrying the cache's default expiry settings.
    pub fn element(&self, key: K, value: V) -> Element<K, V> {
        Element::new(key, value)
            .with_eternal(self.config.eternal)
            .with_time_to_live(self.config.time_to_live)
            .with_time_to_idle(self.config.time_to_idle)
    }

    /// Stores `value` under `key` with the cache's default expiry settings.
    pub fn put_value(&self, key: K, value: V) {
        self.put(self.element(key, value));
    }

    /// Stores `element` in the memory tier, spilling any victim.
    pub fn put(&self, element: Element<K, V>) {
        if let Some(disk) = &self.disk {
            if disk.buffer_full() {
                debug!(cache = %self.config.name, "disk spool full; backing off");
                thread::sleep(BUFFER_FULL_BACKOFF);
            }
        }

        let _stripe = self.locks.lock(&element.key);
        let displaced = {
            let _tiers = self.tiers.lock();
            if let Some(disk) = &self.disk {
                disk.discard(&element.key);
            }
            self.memory
                .put_with_eviction(element)
                .and_then(|victim| self.overflow(victim))
        };
        self.announce(displaced);
    }

    /// Moves a memory victim to disk. Must be called with the tier lock held.
    fn overflow(&self, victim: Element<K, V>) -> Option<Displaced<K, V>> {
        if !self.config.eternal && victim.is_expired() {
            return Some(Displaced::Expired(victim));
        }
        match &self.disk {
            Some(disk) => {
                disk.put(victim);
                None
            }
            None => Some(Displaced::Evicted(victim)),
        }
    }

    fn announce(&self, displaced: Option<Displaced<K, V>>) {
        match displaced {
            Some(Displaced::Expired(element)) => self.listeners.notify_expired(&element),
            Some(Displaced::Evicted(element)) => self.listeners.notify_evicted(&element),
            None => {}
        }
    }

    /// Looks `key` up, promoting it from disk to memory on a disk hit.
    pub fn get(&self, key: &K) -> Option<Element<K, V>> {
        let _stripe = self.locks.lock(key);
        if let Some(element) = self.memory.get(key) {
            return Some(element);
        }

        self.await_tier_moves();
        let mut element = self.disk.as_ref()?.remove(key)?;
        if !self.config.eternal && element.is_expired() {
            self.listeners.notify_expired(&element);
            return None;
        }
        element.update_access_statistics();
        let found = element.clone();
        let displaced = {
            let _tiers = self.tiers.lock();
            self.memory
                .put_with_eviction(element)
                .and_then(|victim| self.overflow(victim))
        };
        self.announce(displaced);
        Some(found)
    }

    /// Looks `key` up without touching statistics or moving it between tiers.
    pub fn get_quiet(&self, key: &K) -> Option<Element<K, V>> {
        let _stripe = self.locks.lock(key);
        self.memory.get_quiet(key).or_else(|| {
            self.await_tier_moves();
            self.disk.as_ref()?.get_quiet(key)
        })
    }

    /// Waits out any eviction that has left memory but not reached the spool.
    fn await_tier_moves(&self) {
        drop(self.tiers.lock());
    }

    /// Removes `key` from both tiers.
    pub fn remove(&self, key: &K) -> Option<Element<K, V>> {
        let _stripe = self.locks.lock(key);
        // a concurrent eviction of `key` finishes spooling it before this returns
        let from_memory = {
            let _tiers = self.tiers.lock();
            self.memory.remove(key)
        };
        let from_disk = self.disk.as_ref().and_then(|disk| disk.remove(key));
        from_memory.or(from_disk)
    }

    /// Empties both tiers.
    ///
    /// # Errors
    ///
    /// Propagates a disk tier failure; the disk tier disposes itself.
    pub fn remove_all(&self) -> Result<(), StoreError> {
        self.memory.remove_all()?;
        if let Some(disk) = &self.disk {
            disk.remove_all()?;
        }
        Ok(())
    }

    /// Whether either tier holds `key`. Does not check expiry.
    pub fn contains_key(&self, key: &K) -> bool {
        if self.memory.contains_key(key) {
            return true;
        }
        self.await_tier_moves();
        self.disk.as_ref().map_or(false, |disk| disk.contains_key(key))
    }

    /// All keys from both tiers.
    pub fn keys(&self) -> Vec<K> {
        let mut keys = self.memory.keys();
        if let Some(disk) = &self.disk {
            keys.extend(disk.keys());
        }
        keys
    }

    /// Elements in both tiers.
    pub fn size(&self) -> usize {
        self.memory_size() + self.disk_size()
    }

    /// Elements in the memory tier.
    pub fn memory_size(&self) -> usize {
        self.memory.size()
    }

    /// Elements in the disk tier.
    pub fn disk_size(&self) -> usize {
        self.disk.as_ref().map_or(0, |disk| disk.size())
    }

    /// Sweeps both tiers for expired elements.
    pub fn expire_elements(&self) {
        self.memory.expire_elements();
        if let Some(disk) = &self.disk {
            disk.expire_elements();
        }
    }

    /// Asks the disk tier to persist pending writes.
    pub fn flush(&self) {
        if let Some(disk) = &self.disk {
            disk.flush();
        }
    }

    /// Lifecycle state of the cache.
    pub fn status(&self) -> Status {
        self.memory.status()
    }

    /// Shuts both tiers down.
    pub fn dispose(&self) {
        self.memory.dispose();
        if let Some(disk) = &self.disk {
            disk.dispose();
        }
        info!(cache = %self.config.name, "cache disposed");
    }
}

impl<K, V> CacheMetrics for Cache<K, V>
where
    K: Hash + Eq + Clone + Codec + Send + Sync + 'static,
    V: Clone + Codec + Send + Sync + 'static,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();
        for (name, value) in self.memory.metrics() {
            metrics.insert(format!("memory.{}", name), value);
        }
        if let Some(disk) = &self.disk {
            for (name, value) in disk.metrics() {
                metrics.insert(format!("disk.{}", name), value);
            }
        }
        metrics.insert("size".to_string(), self.size() as f64);
        metrics
    }

    fn algorithm_name(&self) -> &'static str {
        "Cache"
    }
}

impl<K, V> fmt::Debug for Cache<K, V>
where
    K: Hash + Eq + Clone + Codec + Send + Sync + 'static,
    V: Clone + Codec + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.config.name)
            .field("memory", &self.memory)
            .field("disk", &self.disk)
            .finish()
    }
}
