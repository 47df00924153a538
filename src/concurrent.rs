//! Lock Striping
//!
//! This module provides [`StripedMutex`], a fixed array of independent
//! `parking_lot::Mutex`es shared across an unbounded key space through a
//! stable key → stripe mapping.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                 StripedMutex (N = 2^k stripes)                     │
//! │                                                                    │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐     ┌─────────┐              │
//! │  │Stripe 0 │ │Stripe 1 │ │Stripe 2 │ ... │Stripe N-1│             │
//! │  │ [Mutex] │ │ [Mutex] │ │ [Mutex] │     │ [Mutex] │              │
//! │  └─────────┘ └─────────┘ └─────────┘     └─────────┘              │
//! │       ▲           ▲           ▲               ▲                   │
//! │       │           │           │               │                   │
//! │  hash(k1)&m   hash(k2)&m  hash(k3)&m     hash(kN)&m   (m = N - 1) │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two keys that land on different stripes lock independently; two keys that
//! collide on a stripe serialize, which is harmless for correctness. The total
//! number of locks is bounded no matter how many keys exist, and no allocation
//! happens per key.
//!
//! The stripe count must be a power of two so the stripe index is a mask of
//! the hash rather than a division. The hasher is chosen once at construction,
//! so a key maps to the same stripe for the lifetime of the structure.
//!
//! # Example
//!
//! ```rust
//! use spoolcache::concurrent::StripedMutex;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let locks = Arc::new(StripedMutex::<u64>::new(16).unwrap());
//!
//! let handles: Vec<_> = (0..4).map(|t| {
//!     let locks = Arc::clone(&locks);
//!     thread::spawn(move || {
//!         for i in 0..100 {
//!             let key = format!("key_{}_{}", t, i);
//!             *locks.lock(&key) += 1;
//!         }
//!     })
//! }).collect();
//!
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//! ```

use crate::error::StoreError;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use parking_lot::{Mutex, MutexGuard};

#[cfg(feature = "hashbrown")]
use hashbrown::DefaultHashBuilder;

#[cfg(not(feature = "hashbrown"))]
use std::collections::hash_map::RandomState as DefaultHashBuilder;

/// Stripe count used by [`StripedMutex::with_default_stripes`].
pub const DEFAULT_NUMBER_OF_MUTEXES: usize = 2048;

/// A fixed-size array of mutexes selected by key hash.
///
/// `T` is the data guarded by each stripe; use the default `()` for a pure
/// lock table.
pub struct StripedMutex<T = ()> {
    mutexes: Box<[Mutex<T>]>,
    hash_builder: DefaultHashBuilder,
}

impl<T: Default> StripedMutex<T> {
    /// Creates a striped mutex with `stripes` independent locks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] if `stripes` is zero or not a
    /// power of two.
    pub fn new(stripes: usize) -> Result<Self, StoreError> {
        if stripes == 0 {
            return Err(StoreError::InvalidConfig(
                "a striped mutex needs at least one stripe".to_string(),
            ));
        }
        if !stripes.is_power_of_two() {
            return Err(StoreError::InvalidConfig(format!(
                "striped mutex size must be a power of two, got {}",
                stripes
            )));
        }

        let mutexes: Vec<_> = (0..stripes).map(|_| Mutex::new(T::default())).collect();
        Ok(Self {
            mutexes: mutexes.into_boxed_slice(),
            hash_builder: DefaultHashBuilder::default(),
        })
    }

    /// Creates a striped mutex with [`DEFAULT_NUMBER_OF_MUTEXES`] stripes.
    pub fn with_default_stripes() -> Self {
        let mutexes: Vec<_> = (0..DEFAULT_NUMBER_OF_MUTEXES)
            .map(|_| Mutex::new(T::default()))
            .collect();
        Self {
            mutexes: mutexes.into_boxed_slice(),
            hash_builder: DefaultHashBuilder::default(),
        }
    }
}

impl<T> StripedMutex<T> {
    /// Returns the stripe index for `key`, in `0..len()`.
    #[inline]
    pub fn index_for<Q: ?Sized + Hash>(&self, key: &Q) -> usize {
        (self.hash_builder.hash_one(key) as usize) & (self.mutexes.len() - 1)
    }

    /// Returns the mutex guarding `key`.
    #[inline]
    pub fn mutex_for<Q: ?Sized + Hash>(&self, key: &Q) -> &Mutex<T> {
        &self.mutexes[self.index_for(key)]
    }

    /// Locks the stripe guarding `key`.
    #[inline]
    pub fn lock<Q: ?Sized + Hash>(&self, key: &Q) -> MutexGuard<'_, T> {
        self.mutex_for(key).lock()
    }

    /// Number of stripes.
    #[inline]
    pub fn len(&self) -> usize {
        self.mutexes.len()
    }

    /// Always false: a striped mutex has at least one stripe.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mutexes.is_empty()
    }
}

impl<T> fmt::Debug for StripedMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripedMutex")
            .field("stripes", &self.mutexes.len())
            .finish()
    }
}
