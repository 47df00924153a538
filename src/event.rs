//! Listener notification for expiry and eviction.
//!
//! Stores call out to registered listeners when they expire or evict an
//! element on their own. Ordinary `put` and `remove` calls are not announced;
//! that is the caller's business.
//!
//! Notifications are always delivered after the store has released its
//! internal locks, so a listener may call back into the store.

use crate::element::Element;
use core::fmt;
use parking_lot::RwLock;
use std::sync::Arc;

/// Receives expiry and eviction notifications from a store.
///
/// Both methods default to doing nothing so implementors only override what
/// they care about.
pub trait CacheEventListener<K, V>: Send + Sync {
    /// Called once for each element removed because its deadline passed.
    fn notify_element_expired(&self, _element: &Element<K, V>) {}

    /// Called once for each element removed to make room for another.
    fn notify_element_evicted(&self, _element: &Element<K, V>) {}
}

/// The set of listeners attached to a store, shareable between tiers.
pub struct RegisteredListeners<K, V> {
    listeners: RwLock<Vec<Arc<dyn CacheEventListener<K, V>>>>,
}

impl<K, V> RegisteredListeners<K, V> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Adds a listener.
    pub fn register(&self, listener: Arc<dyn CacheEventListener<K, V>>) {
        self.listeners.write().push(listener);
    }

    /// Removes a previously registered listener (compared by pointer).
    /// Returns whether it was found.
    pub fn unregister(&self, listener: &Arc<dyn CacheEventListener<K, V>>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    /// Whether any listener is registered. Stores use this to skip reading an
    /// element back from disk when nobody would see it.
    #[inline]
    pub fn has_listeners(&self) -> bool {
        !self.listeners.read().is_empty()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        !self.has_listeners()
    }

    fn snapshot(&self) -> Vec<Arc<dyn CacheEventListener<K, V>>> {
        self.listeners.read().clone()
    }

    /// Announces an expired element to every listener.
    pub fn notify_expired(&self, element: &Element<K, V>) {
        for listener in self.snapshot() {
            listener.notify_element_expired(element);
        }
    }

    /// Announces an evicted element to every listener.
    pub fn notify_evicted(&self, element: &Element<K, V>) {
        for listener in self.snapshot() {
            listener.notify_element_evicted(element);
        }
    }
}

impl<K, V> Default for RegisteredListeners<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for RegisteredListeners<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredListeners")
            .field("count", &self.len())
            .finish()
    }
}
