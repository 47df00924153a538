//! In-memory store with sampled eviction.
//!
//! Elements live in a [`SampledMap`] behind a single `parking_lot::Mutex`.
//! When an insert pushes the population past `max_elements`, a uniform sample
//! of up to [`DEFAULT_SAMPLE_SIZE`](crate::policy::DEFAULT_SAMPLE_SIZE)
//! elements is ranked by the configured [`EvictionPolicy`] and the worst one
//! is removed. The element being inserted is never chosen unless it is the
//! only candidate.
//!
//! ```text
//!   put(e) ──▶ insert ──▶ len > max? ──no──▶ done
//!                              │
//!                             yes
//!                              ▼
//!                sample ─▶ rank by policy ─▶ victim (returned to caller)
//! ```
//!
//! [`MemoryStore::put_with_eviction`] hands the victim back so a two-tier
//! cache can spill it to disk; [`Store::put`] announces it to listeners
//! instead.

use crate::codec::{encode_element, Codec};
use crate::element::{now_millis, Element};
use crate::error::StoreError;
use crate::event::RegisteredListeners;
use crate::metrics::{CacheMetrics, CoreStoreMetrics};
use crate::policy::{select_candidate, EvictionPolicy};
use crate::sampled::SampledMap;
use crate::store::{Status, Store};
use core::fmt;
use core::hash::Hash;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

struct MemoryState<K, V> {
    map: SampledMap<K, Element<K, V>>,
    rng: StdRng,
}

/// A bounded in-memory [`Store`].
///
/// # Examples
///
/// ```
/// use spoolcache::{Element, EvictionPolicy, MemoryStore, Store};
///
/// let store: MemoryStore<String, String> = MemoryStore::new("hot", 2, EvictionPolicy::Lru);
/// store.put(Element::new("a".to_string(), "1".to_string()));
/// store.put(Element::new("b".to_string(), "2".to_string()));
/// assert!(store.get(&"a".to_string()).is_some());
///
/// let victim = store.put_with_eviction(Element::new("c".to_string(), "3".to_string()));
/// assert_ne!(victim.map(|e| e.key), Some("c".to_string()));
/// assert_eq!(store.size(), 2);
/// ```
pub struct MemoryStore<K, V> {
    name: String,
    max_elements: usize,
    state: Mutex<MemoryState<K, V>>,
    policy: RwLock<EvictionPolicy>,
    status: RwLock<Status>,
    listeners: Arc<RegisteredListeners<K, V>>,
    metrics: CoreStoreMetrics,
}

impl<K, V> MemoryStore<K, V>
where
    K: Hash + Eq + Clone + Codec + Send + Sync + 'static,
    V: Clone + Codec + Send + Sync + 'static,
{
    /// Creates a store holding at most `max_elements` elements.
    pub fn new(name: impl Into<String>, max_elements: usize, policy: EvictionPolicy) -> Self {
        Self::with_listeners(
            name,
            max_elements,
            policy,
            Arc::new(RegisteredListeners::new()),
        )
    }

    /// Creates a store that announces to an existing listener registry.
    pub fn with_listeners(
        name: impl Into<String>,
        max_elements: usize,
        policy: EvictionPolicy,
        listeners: Arc<RegisteredListeners<K, V>>,
    ) -> Self {
        Self {
            name: name.into(),
            max_elements,
            state: Mutex::new(MemoryState {
                map: SampledMap::new(),
                rng: StdRng::from_entropy(),
            }),
            policy: RwLock::new(policy),
            status: RwLock::new(Status::Alive),
            listeners,
            metrics: CoreStoreMetrics::new(),
        }
    }

    /// Store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capacity.
    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    /// The listener registry this store announces to.
    pub fn listeners(&self) -> &Arc<RegisteredListeners<K, V>> {
        &self.listeners
    }

    fn is_alive(&self) -> bool {
        *self.status.read() == Status::Alive
    }

    /// Inserts `element` and returns the element evicted to make room, if
    /// any. Nothing is announced; the caller decides what the victim becomes.
    pub fn put_with_eviction(&self, element: Element<K, V>) -> Option<Element<K, V>> {
        if !self.is_alive() {
            debug!(store = %self.name, "dropping put on a disposed memory store");
            return None;
        }
        self.metrics.record_put();

        let policy = *self.policy.read();
        let mut state = self.state.lock();
        let key = element.key.clone();
        state.map.insert(key.clone(), element);

        if state.map.len() <= self.max_elements {
            return None;
        }

        let MemoryState { map, rng } = &mut *state;
        let victim_key = {
            let sample = map.sample(rng);
            let candidates: Vec<&(&K, &Element<K, V>)> = sample.iter().collect();
            select_candidate(
                &candidates,
                |(k, _)| **k == key,
                |(_, element)| rank(policy, *element),
            )
            .map(|(k, _)| K::clone(k))
        }?;

        let victim = map.remove(&victim_key)?;
        self.metrics.record_eviction();
        debug!(store = %self.name, policy = %policy, "evicted element from memory");
        Some(victim)
    }

    fn lookup(&self, key: &K, update_statistics: bool) -> Option<Element<K, V>> {
        if !self.is_alive() {
            return None;
        }
        let now = now_millis();
        let outcome = {
            let mut state = self.state.lock();
            let live = match state.map.get_mut(key) {
                Some(element) if !element.is_expired_at(now) => {
                    if update_statistics {
                        element.update_access_statistics();
                    }
                    Some(element.clone())
                }
                _ => None,
            };
            match live {
                Some(found) => Ok(found),
                None => Err(state.map.remove(key)),
            }
        };

        let expired = match outcome {
            Ok(found) => {
                self.metrics.record_hit();
                return Some(found);
            }
            Err(expired) => expired,
        };

        self.metrics.record_miss();
        if let Some(element) = expired {
            self.metrics.record_expirations(1);
            self.listeners.notify_expired(&element);
        }
        None
    }
}

/// Eviction rank: the lowest value is evicted first.
fn rank<K, V>(policy: EvictionPolicy, element: &Element<K, V>) -> u64 {
    match policy {
        EvictionPolicy::Lfu => element.hit_count(),
        EvictionPolicy::Lru => element.last_access_time().max(element.creation_time()),
        EvictionPolicy::Fifo => element.creation_time(),
    }
}

impl<K, V> Store<K, V> for MemoryStore<K, V>
where
    K: Hash + Eq + Clone + Codec + Send + Sync + 'static,
    V: Clone + Codec + Send + Sync + 'static,
{
    fn put(&self, element: Element<K, V>) {
        if let Some(victim) = self.put_with_eviction(element) {
            if victim.is_expired() {
                self.metrics.record_expirations(1);
                self.listeners.notify_expired(&victim);
            } else {
                self.listeners.notify_evicted(&victim);
            }
        }
    }

    fn get(&self, key: &K) -> Option<Element<K, V>> {
        self.lookup(key, true)
    }

    fn get_quiet(&self, key: &K) -> Option<Element<K, V>> {
        self.lookup(key, false)
    }

    fn keys(&self) -> Vec<K> {
        self.state.lock().map.keys().cloned().collect()
    }

    fn remove(&self, key: &K) -> Option<Element<K, V>> {
        self.state.lock().map.remove(key)
    }

    fn remove_all(&self) -> Result<(), StoreError> {
        self.state.lock().map.clear();
        Ok(())
    }

    fn dispose(&self) {
        let mut status = self.status.write();
        if *status == Status::Shutdown {
            return;
        }
        *status = Status::Shutdown;
        self.state.lock().map.clear();
        debug!(store = %self.name, "memory store disposed");
    }

    fn size(&self) -> usize {
        self.state.lock().map.len()
    }

    /// Serializes every element to measure it, so this is O(n).
    fn size_in_bytes(&self) -> u64 {
        let state = self.state.lock();
        let mut buffer = Vec::new();
        state
            .map
            .values()
            .filter_map(|element| {
                encode_element(element, &mut buffer).ok()?;
                Some(buffer.len() as u64)
            })
            .sum()
    }

    fn status(&self) -> Status {
        *self.status.read()
    }

    fn contains_key(&self, key: &K) -> bool {
        self.state.lock().map.contains_key(key)
    }

    fn expire_elements(&self) {
        let now = now_millis();
        let expired = self
            .state
            .lock()
            .map
            .extract_if(|_, element| element.is_expired_at(now));
        self.metrics.record_expirations(expired.len());
        for (_, element) in &expired {
            self.listeners.notify_expired(element);
        }
    }

    fn flush(&self) {}

    fn buffer_full(&self) -> bool {
        false
    }

    fn eviction_policy(&self) -> EvictionPolicy {
        *self.policy.read()
    }

    fn set_eviction_policy(&self, policy: EvictionPolicy) -> Result<(), StoreError> {
        *self.policy.write() = policy;
        Ok(())
    }
}

impl<K: Hash + Eq + Clone, V> CacheMetrics for MemoryStore<K, V> {
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.metrics.to_btreemap();
        metrics.insert("size".to_string(), self.state.lock().map.len() as f64);
        metrics.insert("max_elements".to_string(), self.max_elements as f64);
        metrics
    }

    fn algorithm_name(&self) -> &'static str {
        "MemoryStore"
    }
}

impl<K: Hash + Eq + Clone, V> fmt::Debug for MemoryStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("name", &self.name)
            .field("max_elements", &self.max_elements)
            .field("size", &self.state.lock().map.len())
            .field("policy", &*self.policy.read())
            .field("status", &*self.status.read())
            .finish()
    }
}
