//! Cache Element
//!
//! This module provides [`Element<K, V>`], the unit of cached data handed to a
//! store. An element carries its key and value together with the bookkeeping a
//! store needs to apply cache semantics no matter where the element currently
//! lives (spool, disk or memory):
//!
//! - creation and last-access timestamps (milliseconds since the UNIX epoch)
//! - a hit counter used by the frequency-based eviction sampler
//! - an expiry policy: eternal flag, time-to-live and time-to-idle
//!
//! Timestamps are wall-clock milliseconds rather than a monotonic clock because
//! they are persisted with the element and must stay meaningful after the
//! process restarts and the disk store rehydrates its index.
//!
//! # Expiry
//!
//! ```text
//!   eternal, or ttl == 0 && tti == 0      ->  never expires (u64::MAX)
//!   ttl only                              ->  creation + ttl
//!   tti only                              ->  max(creation, last_access) + tti
//!   both                                  ->  the earlier of the two
//! ```
//!
//! # Examples
//!
//! ```
//! use spoolcache::Element;
//! use std::time::Duration;
//!
//! let element = Element::new("session:42".to_string(), vec![1u8, 2, 3])
//!     .with_time_to_live(Duration::from_secs(60));
//! assert!(!element.is_expired());
//! assert_eq!(element.hit_count(), 0);
//! ```

use core::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Returns the current wall-clock time in milliseconds since the UNIX epoch.
#[inline]
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Converts a duration to whole milliseconds, saturating on overflow.
#[inline]
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// A cached key/value pair with timestamps, hit count and expiry policy.
///
/// `key` and `value` are public for direct access, following the other
/// plain-data types in this crate; the bookkeeping fields are only changed
/// through methods so the expiry arithmetic stays consistent.
pub struct Element<K, V> {
    /// The cached key
    pub key: K,

    /// The cached value
    pub value: V,

    creation_time: u64,
    last_access_time: u64,
    hit_count: u64,
    eternal: bool,
    time_to_live: u64,
    time_to_idle: u64,
}

impl<K, V> Element<K, V> {
    /// Creates a new element with no expiry and zeroed access statistics.
    ///
    /// # Examples
    ///
    /// ```
    /// use spoolcache::Element;
    ///
    /// let element = Element::new("k1", "v1");
    /// assert_eq!(element.key, "k1");
    /// assert_eq!(element.value, "v1");
    /// assert_eq!(element.expiration_time(), u64::MAX);
    /// ```
    #[inline]
    pub fn new(key: K, value: V) -> Self {
        let now = now_millis();
        Self {
            key,
            value,
            creation_time: now,
            last_access_time: 0,
            hit_count: 0,
            eternal: false,
            time_to_live: 0,
            time_to_idle: 0,
        }
    }

    /// Rebuilds an element from persisted fields.
    pub(crate) fn from_parts(key: K, value: V, parts: ElementParts) -> Self {
        Self {
            key,
            value,
            creation_time: parts.creation_time,
            last_access_time: parts.last_access_time,
            hit_count: parts.hit_count,
            eternal: parts.eternal,
            time_to_live: parts.time_to_live,
            time_to_idle: parts.time_to_idle,
        }
    }

    /// Returns the bookkeeping fields for persistence.
    pub(crate) fn parts(&self) -> ElementParts {
        ElementParts {
            creation_time: self.creation_time,
            last_access_time: self.last_access_time,
            hit_count: self.hit_count,
            eternal: self.eternal,
            time_to_live: self.time_to_live,
            time_to_idle: self.time_to_idle,
        }
    }

    /// Sets the time-to-live, measured from creation. Zero means no limit.
    #[must_use]
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = duration_millis(ttl);
        self
    }

    /// Sets the time-to-idle, measured from the last access. Zero means no limit.
    #[must_use]
    pub fn with_time_to_idle(mut self, tti: Duration) -> Self {
        self.time_to_idle = duration_millis(tti);
        self
    }

    /// Marks the element as eternal; eternal elements ignore TTL and TTI.
    #[must_use]
    pub fn with_eternal(mut self, eternal: bool) -> Self {
        self.eternal = eternal;
        self
    }

    /// Creation timestamp in milliseconds since the UNIX epoch.
    #[inline]
    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    /// Last access timestamp in milliseconds since the UNIX epoch, or 0 if
    /// the element has never been read through a statistics-updating `get`.
    #[inline]
    pub fn last_access_time(&self) -> u64 {
        self.last_access_time
    }

    /// Number of statistics-updating reads of this element.
    #[inline]
    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    #[inline]
    pub(crate) fn set_hit_count(&mut self, hit_count: u64) {
        self.hit_count = hit_count;
    }

    /// Whether the element ignores time-based expiry.
    #[inline]
    pub fn is_eternal(&self) -> bool {
        self.eternal
    }

    /// The configured time-to-live.
    #[inline]
    pub fn time_to_live(&self) -> Duration {
        Duration::from_millis(self.time_to_live)
    }

    /// The configured time-to-idle.
    #[inline]
    pub fn time_to_idle(&self) -> Duration {
        Duration::from_millis(self.time_to_idle)
    }

    /// Records a read: increments the hit count and stamps the access time.
    #[inline]
    pub fn update_access_statistics(&mut self) {
        self.last_access_time = now_millis();
        self.hit_count = self.hit_count.saturating_add(1);
    }

    /// The instant (ms since the epoch) at which the element expires, or
    /// `u64::MAX` if it never does.
    pub fn expiration_time(&self) -> u64 {
        if self.eternal || (self.time_to_live == 0 && self.time_to_idle == 0) {
            return u64::MAX;
        }

        let ttl_expiry = self.creation_time.saturating_add(self.time_to_live);
        let most_recent = self.creation_time.max(self.last_access_time);
        let tti_expiry = most_recent.saturating_add(self.time_to_idle);

        if self.time_to_idle == 0 {
            ttl_expiry
        } else if self.time_to_live == 0 {
            tti_expiry
        } else {
            ttl_expiry.min(tti_expiry)
        }
    }

    /// Whether the element has expired at `now` (ms since the epoch).
    #[inline]
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expiration_time()
    }

    /// Whether the element has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }
}

/// Persisted bookkeeping of an element, separate from its key and value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ElementParts {
    pub(crate) creation_time: u64,
    pub(crate) last_access_time: u64,
    pub(crate) hit_count: u64,
    pub(crate) eternal: bool,
    pub(crate) time_to_live: u64,
    pub(crate) time_to_idle: u64,
}

impl<K: Clone, V: Clone> Clone for Element<K, V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.clone(),
            creation_time: self.creation_time,
            last_access_time: self.last_access_time,
            hit_count: self.hit_count,
            eternal: self.eternal,
            time_to_live: self.time_to_live,
            time_to_idle: self.time_to_idle,
        }
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for Element<K, V> {
    /// Elements compare by key and value only; statistics are ignored.
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.value == other.value
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Element<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("creation_time", &self.creation_time)
            .field("last_access_time", &self.last_access_time)
            .field("hit_count", &self.hit_count)
            .field("eternal", &self.eternal)
            .field("time_to_live", &self.time_to_live)
            .field("time_to_idle", &self.time_to_idle)
            .finish()
    }
}
