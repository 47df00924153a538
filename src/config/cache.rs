//! Configuration for the two-tier [`Cache`](crate::Cache).
//!
//! A cache owns a memory tier bounded by `max_elements_in_memory` and, when
//! `overflow_to_disk` is set, a disk tier configured by the nested
//! [`DiskStoreConfig`]. Default expiry settings (`eternal`, `time_to_live`,
//! `time_to_idle`) are stamped onto elements created through
//! [`Cache::put_value`](crate::Cache::put_value).
//!
//! # Examples
//!
//! ```
//! use spoolcache::config::CacheConfig;
//! use spoolcache::EvictionPolicy;
//! use std::time::Duration;
//!
//! let config = CacheConfig::new("catalog", 1_000)
//!     .with_memory_eviction_policy(EvictionPolicy::Lru)
//!     .with_time_to_live(Duration::from_secs(300))
//!     .with_overflow_to_disk(true);
//!
//! assert_eq!(config.disk.name, "catalog");
//! assert!(config.disk.is_auto_generated());
//! ```

use super::disk::DiskStoreConfig;
use crate::concurrent::DEFAULT_NUMBER_OF_MUTEXES;
use crate::policy::EvictionPolicy;
use core::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a [`Cache`](crate::Cache).
#[derive(Clone)]
pub struct CacheConfig {
    /// Cache name, also the default disk store name.
    pub name: String,
    /// Capacity of the memory tier. `0` sends every element straight through
    /// to the disk tier (or evicts it when there is none).
    pub max_elements_in_memory: usize,
    /// How the memory tier picks eviction victims.
    pub memory_eviction_policy: EvictionPolicy,
    /// Whether memory evictions spill into a disk tier.
    pub overflow_to_disk: bool,
    /// Whether elements created by the cache never expire.
    pub eternal: bool,
    /// Default time-to-live; zero for none.
    pub time_to_live: Duration,
    /// Default time-to-idle; zero for none.
    pub time_to_idle: Duration,
    /// Number of stripes guarding per-key compound operations. Must be a
    /// non-zero power of two.
    pub lock_stripes: usize,
    /// Disk tier settings, used only when `overflow_to_disk` is set.
    pub disk: DiskStoreConfig,
}

impl CacheConfig {
    /// Creates a memory-only LFU cache configuration whose disk tier, if
    /// enabled later, lives in an auto-generated directory.
    pub fn new(name: impl Into<String>, max_elements_in_memory: usize) -> Self {
        let name = name.into();
        Self {
            disk: DiskStoreConfig::in_auto_generated_directory(name.clone()),
            name,
            max_elements_in_memory,
            memory_eviction_policy: EvictionPolicy::Lfu,
            overflow_to_disk: false,
            eternal: false,
            time_to_live: Duration::ZERO,
            time_to_idle: Duration::ZERO,
            lock_stripes: DEFAULT_NUMBER_OF_MUTEXES,
        }
    }

    /// Sets the memory tier's eviction policy.
    #[must_use]
    pub fn with_memory_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.memory_eviction_policy = policy;
        self
    }

    /// Enables or disables the disk tier.
    #[must_use]
    pub fn with_overflow_to_disk(mut self, overflow: bool) -> Self {
        self.overflow_to_disk = overflow;
        self
    }

    /// Marks elements as eternal for both tiers.
    #[must_use]
    pub fn with_eternal(mut self, eternal: bool) -> Self {
        self.eternal = eternal;
        self.disk.eternal = eternal;
        self
    }

    /// Sets the default time-to-live.
    #[must_use]
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = ttl;
        self
    }

    /// Sets the default time-to-idle.
    #[must_use]
    pub fn with_time_to_idle(mut self, tti: Duration) -> Self {
        self.time_to_idle = tti;
        self
    }

    /// Sets the number of lock stripes.
    #[must_use]
    pub fn with_lock_stripes(mut self, stripes: usize) -> Self {
        self.lock_stripes = stripes;
        self
    }

    /// Moves the disk tier into `path`.
    #[must_use]
    pub fn with_disk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk.disk_path = path.into();
        self
    }

    /// Replaces the disk tier settings wholesale.
    #[must_use]
    pub fn with_disk(mut self, disk: DiskStoreConfig) -> Self {
        self.disk = disk;
        self
    }
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("name", &self.name)
            .field("max_elements_in_memory", &self.max_elements_in_memory)
            .field("memory_eviction_policy", &self.memory_eviction_policy)
            .field("overflow_to_disk", &self.overflow_to_disk)
            .field("eternal", &self.eternal)
            .field("time_to_live", &self.time_to_live)
            .field("time_to_idle", &self.time_to_idle)
            .field("lock_stripes", &self.lock_stripes)
            .field("disk", &self.disk)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_creation() {
        let config = CacheConfig::new("products", 500);
        assert_eq!(config.name, "products");
        assert_eq!(config.max_elements_in_memory, 500);
        assert_eq!(config.memory_eviction_policy, EvictionPolicy::Lfu);
        assert!(!config.overflow_to_disk);
        assert_eq!(config.lock_stripes, 2048);
        assert_eq!(config.disk.name, "products");
    }

    #[test]
    fn test_cache_config_eternal_reaches_disk_tier() {
        let config = CacheConfig::new("static", 10).with_eternal(true);
        assert!(config.eternal);
        assert!(config.disk.eternal);
    }

    #[test]
    fn test_cache_config_disk_path() {
        let config = CacheConfig::new("c", 10).with_disk_path("/srv/cache");
        assert_eq!(config.disk.disk_path, PathBuf::from("/srv/cache"));
        assert!(!config.disk.is_auto_generated());
    }
}
