//! Store Configuration Module
//!
//! Configuration arrives as plain structs with public fields; loading them
//! from a file is the embedding application's job. Each struct also offers a
//! `new` constructor with sensible defaults and `with_*` helpers.
//!
//! | Config | Consumer | Description |
//! |--------|----------|-------------|
//! | [`DiskStoreConfig`] | [`DiskStore`](crate::store::disk::DiskStore) | Data file location, persistence, spool and scheduler tuning |
//! | [`CacheConfig`] | [`Cache`](crate::Cache) | Memory tier sizing, default element expiry, overflow to disk |
//!
//! # Sizing Guidelines
//!
//! The spool is a write-behind buffer. `spool_buffer_size` is compared against
//! an estimate (`spooled elements × size of the last record written`); when
//! the estimate is exceeded the store reports `buffer_full()` and the cache
//! facade backs off writers briefly so the scheduler can catch up.
//!
//! ```text
//! spool_buffer_size ≈ write rate (bytes/s) × spool_interval × headroom
//! ```
//!
//! # Examples
//!
//! ```
//! use spoolcache::config::DiskStoreConfig;
//! use std::time::Duration;
//!
//! let config = DiskStoreConfig::new("sessions", std::env::temp_dir().join("sessions-cache"))
//!     .with_persistent(true)
//!     .with_max_elements_on_disk(10_000)
//!     .with_expiry_interval(Duration::from_secs(60));
//! assert!(config.validate().is_ok());
//! ```

pub mod cache;
pub mod disk;

pub use cache::CacheConfig;
pub use disk::{auto_generated_directory, DiskStoreConfig, AUTO_DISK_PATH_DIRECTORY_PREFIX};
