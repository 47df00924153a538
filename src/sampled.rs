//! Hash map with O(1) uniform random sampling.
//!
//! Entries live in a dense `Vec` and a hash map records each key's position.
//! Removal swaps the last entry into the hole, so positions `0..len` are
//! always occupied and a random position is a uniformly random entry. This is
//! what lets the eviction sampler pick candidates without walking the whole
//! population.
//!
//! ```text
//!   positions: { "a" -> 0, "b" -> 1, "c" -> 2 }
//!   slots:     [ ("a", ta), ("b", tb), ("c", tc) ]
//!
//!   remove("a")  =>  slots: [ ("c", tc), ("b", tb) ]   positions: { "c" -> 0, "b" -> 1 }
//! ```

use crate::policy::sample_positions;
use core::fmt;
use core::hash::Hash;
use rand::Rng;

#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;

#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;

/// A map from `K` to `T` supporting uniform random sampling of its entries.
pub struct SampledMap<K, T> {
    positions: HashMap<K, usize>,
    slots: Vec<(K, T)>,
}

impl<K, T> SampledMap<K, T>
where
    K: Hash + Eq + Clone,
{
    /// Creates an empty map.
    pub fn new() -> Self {
        Self {
            positions: HashMap::new(),
            slots: Vec::new(),
        }
    }

    /// Creates an empty map with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            positions: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
        }
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the map is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether `key` is present.
    #[inline]
    pub fn contains_key(&self, key: &K) -> bool {
        self.positions.contains_key(key)
    }

    /// Returns a reference to the value for `key`.
    pub fn get(&self, key: &K) -> Option<&T> {
        let &pos = self.positions.get(key)?;
        Some(&self.slots[pos].1)
    }

    /// Returns a mutable reference to the value for `key`.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut T> {
        let &pos = self.positions.get(key)?;
        Some(&mut self.slots[pos].1)
    }

    /// Inserts or replaces the value for `key`, returning the previous value.
    pub fn insert(&mut self, key: K, value: T) -> Option<T> {
        if let Some(&pos) = self.positions.get(&key) {
            return Some(core::mem::replace(&mut self.slots[pos].1, value));
        }
        self.positions.insert(key.clone(), self.slots.len());
        self.slots.push((key, value));
        None
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<T> {
        let pos = self.positions.remove(key)?;
        let (_, value) = self.slots.swap_remove(pos);
        if let Some((moved_key, _)) = self.slots.get(pos) {
            if let Some(moved_pos) = self.positions.get_mut(moved_key) {
                *moved_pos = pos;
            }
        }
        Some(value)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.positions.clear();
        self.slots.clear();
    }

    /// Iterates over all entries in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &T)> {
        self.slots.iter().map(|(k, t)| (k, t))
    }

    /// Iterates over all keys in storage order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.slots.iter().map(|(k, _)| k)
    }

    /// Iterates over all values in storage order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().map(|(_, t)| t)
    }

    /// Draws a uniform random sample of distinct entries.
    ///
    /// The sample size is [`DEFAULT_SAMPLE_SIZE`](crate::policy::DEFAULT_SAMPLE_SIZE),
    /// or the whole population when it is smaller than that.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<(&K, &T)> {
        sample_positions(rng, self.slots.len())
            .into_iter()
            .map(|pos| {
                let (k, t) = &self.slots[pos];
                (k, t)
            })
            .collect()
    }

    /// Removes and returns every entry for which `predicate` returns true.
    pub fn extract_if<F>(&mut self, mut predicate: F) -> Vec<(K, T)>
    where
        F: FnMut(&K, &T) -> bool,
    {
        let doomed: Vec<K> = self
            .slots
            .iter()
            .filter(|(k, t)| predicate(k, t))
            .map(|(k, _)| k.clone())
            .collect();

        doomed
            .into_iter()
            .filter_map(|key| {
                let value = self.remove(&key)?;
                Some((key, value))
            })
            .collect()
    }
}

impl<K: Hash + Eq + Clone, T> Default for SampledMap<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, T: fmt::Debug> fmt::Debug for SampledMap<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.slots.iter().map(|(k, t)| (k, t)))
            .finish()
    }
}
