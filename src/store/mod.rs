//! Store Contract
//!
//! Every tier of a [`Cache`](crate::Cache) implements [`Store`]. The contract
//! is identical for the in-memory and the disk-backed variant, so expiry,
//! eviction and listener notification behave the same wherever an element
//! currently lives.
//!
//! | Store | Capacity | Eviction | Durability |
//! |-------|----------|----------|------------|
//! | [`MemoryStore`] | `max_elements` | sampled LFU / LRU / FIFO | none |
//! | [`DiskStore`] | `max_elements_on_disk` (0 = unbounded) | sampled LFU only | write-behind spool, optional persistent index |
//!
//! All methods take `&self`; stores synchronize internally and are meant to be
//! shared through `Arc`.

pub mod disk;
pub mod memory;

pub use disk::DiskStore;
pub use memory::MemoryStore;

use crate::element::Element;
use crate::error::StoreError;
use crate::policy::EvictionPolicy;
use core::fmt;

/// Lifecycle state of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Constructed but not yet ready for use.
    Uninitialised,
    /// Accepting operations.
    Alive,
    /// Disposed. Reads find nothing and writes are dropped.
    Shutdown,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Uninitialised => "STATUS_UNINITIALISED",
            Status::Alive => "STATUS_ALIVE",
            Status::Shutdown => "STATUS_SHUTDOWN",
        })
    }
}

/// Operations shared by every store variant.
pub trait Store<K, V>: Send + Sync {
    /// Inserts or replaces an element. Never blocks on disk I/O and never
    /// fails: an element that later cannot be written is logged and dropped.
    fn put(&self, element: Element<K, V>);

    /// Returns the element for `key`, updating its hit count and last access
    /// time. Expired elements are removed, announced and reported as absent.
    fn get(&self, key: &K) -> Option<Element<K, V>>;

    /// Like [`get`](Store::get) but leaves access statistics untouched.
    fn get_quiet(&self, key: &K) -> Option<Element<K, V>>;

    /// Snapshot of every key currently held.
    fn keys(&self) -> Vec<K>;

    /// Removes `key` and returns its element if there was one.
    fn remove(&self, key: &K) -> Option<Element<K, V>>;

    /// Removes everything.
    ///
    /// # Errors
    ///
    /// A store that cannot be cleared consistently disposes itself and
    /// returns the underlying error.
    fn remove_all(&self) -> Result<(), StoreError>;

    /// Shuts the store down and releases its resources. Idempotent.
    fn dispose(&self);

    /// Number of elements held.
    fn size(&self) -> usize;

    /// Approximate number of bytes held.
    fn size_in_bytes(&self) -> u64;

    /// Current lifecycle state.
    fn status(&self) -> Status;

    /// Membership test. Does not check expiry.
    fn contains_key(&self, key: &K) -> bool;

    /// Removes every expired element, notifying listeners once for each.
    fn expire_elements(&self);

    /// Requests that pending writes be persisted. Returns immediately.
    fn flush(&self);

    /// Whether writers should back off to let pending writes drain.
    fn buffer_full(&self) -> bool;

    /// The policy used to choose eviction victims.
    fn eviction_policy(&self) -> EvictionPolicy;

    /// Changes the eviction policy.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnsupportedPolicy`] if the store cannot use `policy`.
    fn set_eviction_policy(&self, policy: EvictionPolicy) -> Result<(), StoreError>;
}
