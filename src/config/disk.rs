//! Configuration for the disk-backed store.
//!
//! # Files
//!
//! A store named `name` keeps two files inside `disk_path`:
//!
//! ```text
//! <disk_path>/<name>.data    element records, addressed through the index
//! <disk_path>/<name>.index   persisted index snapshot (persistent stores only)
//! ```
//!
//! Any `/` in the store name is replaced with `_` so hierarchical cache names
//! stay inside the directory.
//!
//! # Auto-generated directories
//!
//! A store whose directory name starts with [`AUTO_DISK_PATH_DIRECTORY_PREFIX`]
//! is treated as throwaway: it never loads a previous index on startup and
//! always deletes its files (and the directory) on disposal, whatever the
//! `persistent` flag says. [`auto_generated_directory`] produces such a path.

use crate::element::now_millis;
use crate::error::StoreError;
use core::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Name prefix that marks a directory as created by the store itself.
pub const AUTO_DISK_PATH_DIRECTORY_PREFIX: &str = "spoolcache_auto_created";

/// Default spool threshold: 30 MiB.
pub const DEFAULT_SPOOL_BUFFER_SIZE: usize = 30 * 1024 * 1024;

/// Default time between expiry scans.
pub const DEFAULT_EXPIRY_INTERVAL: Duration = Duration::from_secs(120);

/// Default time the scheduler sleeps between spool checks.
pub const DEFAULT_SPOOL_INTERVAL: Duration = Duration::from_millis(200);

/// Returns a fresh throwaway directory path under the system temp directory.
///
/// The directory is not created here; the store creates it when it opens.
pub fn auto_generated_directory() -> PathBuf {
    static GENERATED: AtomicU64 = AtomicU64::new(0);
    std::env::temp_dir().join(format!(
        "{}_{}_{}",
        AUTO_DISK_PATH_DIRECTORY_PREFIX,
        now_millis(),
        GENERATED.fetch_add(1, Ordering::Relaxed)
    ))
}

/// Configuration for a [`DiskStore`](crate::store::disk::DiskStore).
///
/// # Fields
///
/// - `name`: store name, used to derive the data and index file names.
/// - `disk_path`: directory holding the files. Created if missing.
/// - `persistent`: keep the data file across restarts and persist the index on
///   `flush()`.
/// - `max_elements_on_disk`: eviction threshold; `0` means unbounded.
/// - `eternal`: elements never expire, so the scheduler skips expiry scans.
/// - `spool_buffer_size`: estimated spool bytes above which `buffer_full()`
///   reports true.
/// - `expiry_interval`: time between expiry scans.
/// - `spool_interval`: how long the scheduler sleeps between spool checks.
///
/// # Examples
///
/// ```
/// use spoolcache::config::DiskStoreConfig;
///
/// let config = DiskStoreConfig::new("users/profiles", "/var/cache/app");
/// assert_eq!(config.data_file_name(), "users_profiles.data");
/// assert_eq!(config.index_file_name(), "users_profiles.index");
/// assert!(!config.persistent);
/// assert_eq!(config.max_elements_on_disk, 0);
/// ```
#[derive(Clone)]
pub struct DiskStoreConfig {
    /// Store name.
    pub name: String,
    /// Directory holding the data and index files.
    pub disk_path: PathBuf,
    /// Whether contents survive a restart.
    pub persistent: bool,
    /// Maximum number of elements on disk, `0` for unbounded.
    pub max_elements_on_disk: usize,
    /// Whether elements never expire.
    pub eternal: bool,
    /// Spool size in bytes above which writers should back off.
    pub spool_buffer_size: usize,
    /// Time between expiry scans.
    pub expiry_interval: Duration,
    /// Scheduler sleep between spool checks.
    pub spool_interval: Duration,
}

impl DiskStoreConfig {
    /// Creates a non-persistent, unbounded configuration with default tuning.
    pub fn new(name: impl Into<String>, disk_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            disk_path: disk_path.into(),
            persistent: false,
            max_elements_on_disk: 0,
            eternal: false,
            spool_buffer_size: DEFAULT_SPOOL_BUFFER_SIZE,
            expiry_interval: DEFAULT_EXPIRY_INTERVAL,
            spool_interval: DEFAULT_SPOOL_INTERVAL,
        }
    }

    /// Creates a configuration located in a fresh auto-generated directory.
    pub fn in_auto_generated_directory(name: impl Into<String>) -> Self {
        Self::new(name, auto_generated_directory())
    }

    /// Sets `persistent`.
    #[must_use]
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Sets `max_elements_on_disk` (`0` for unbounded).
    #[must_use]
    pub fn with_max_elements_on_disk(mut self, max: usize) -> Self {
        self.max_elements_on_disk = max;
        self
    }

    /// Sets `eternal`.
    #[must_use]
    pub fn with_eternal(mut self, eternal: bool) -> Self {
        self.eternal = eternal;
        self
    }

    /// Sets the spool threshold in bytes.
    #[must_use]
    pub fn with_spool_buffer_size(mut self, bytes: usize) -> Self {
        self.spool_buffer_size = bytes;
        self
    }

    /// Sets the time between expiry scans.
    #[must_use]
    pub fn with_expiry_interval(mut self, interval: Duration) -> Self {
        self.expiry_interval = interval;
        self
    }

    /// Sets the scheduler sleep between spool checks.
    #[must_use]
    pub fn with_spool_interval(mut self, interval: Duration) -> Self {
        self.spool_interval = interval;
        self
    }

    /// Checks the values a store cannot run with.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidConfig`] for an empty name, an empty directory
    /// path, or a zero scheduler interval.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.name.is_empty() {
            return Err(StoreError::InvalidConfig(
                "disk store name must not be empty".to_string(),
            ));
        }
        if self.disk_path.as_os_str().is_empty() {
            return Err(StoreError::InvalidConfig(format!(
                "disk store {} has no disk path",
                self.name
            )));
        }
        if self.spool_interval.is_zero() {
            return Err(StoreError::InvalidConfig(format!(
                "disk store {} has a zero spool interval",
                self.name
            )));
        }
        if self.expiry_interval.is_zero() {
            return Err(StoreError::InvalidConfig(format!(
                "disk store {} has a zero expiry interval",
                self.name
            )));
        }
        Ok(())
    }

    /// Whether `disk_path` is one of the store's own throwaway directories.
    pub fn is_auto_generated(&self) -> bool {
        is_auto_generated_path(&self.disk_path)
    }

    fn file_stem(&self) -> String {
        self.name.replace('/', "_")
    }

    /// File name of the data file, without directory.
    pub fn data_file_name(&self) -> String {
        format!("{}.data", self.file_stem())
    }

    /// File name of the index file, without directory.
    pub fn index_file_name(&self) -> String {
        format!("{}.index", self.file_stem())
    }

    /// Full path of the data file.
    pub fn data_file_path(&self) -> PathBuf {
        self.disk_path.join(self.data_file_name())
    }

    /// Full path of the index file.
    pub fn index_file_path(&self) -> PathBuf {
        self.disk_path.join(self.index_file_name())
    }
}

pub(crate) fn is_auto_generated_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or(false, |name| name.starts_with(AUTO_DISK_PATH_DIRECTORY_PREFIX))
}

impl fmt::Debug for DiskStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskStoreConfig")
            .field("name", &self.name)
            .field("disk_path", &self.disk_path)
            .field("persistent", &self.persistent)
            .field("max_elements_on_disk", &self.max_elements_on_disk)
            .field("eternal", &self.eternal)
            .field("spool_buffer_size", &self.spool_buffer_size)
            .field("expiry_interval", &self.expiry_interval)
            .field("spool_interval", &self.spool_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_config_defaults() {
        let config = DiskStoreConfig::new("sessions", "/tmp/cache");
        assert_eq!(config.name, "sessions");
        assert!(!config.persistent);
        assert!(!config.eternal);
        assert_eq!(config.max_elements_on_disk, 0);
        assert_eq!(config.spool_buffer_size, 30 * 1024 * 1024);
        assert_eq!(config.expiry_interval, Duration::from_secs(120));
        assert_eq!(config.spool_interval, Duration::from_millis(200));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_disk_config_file_names() {
        let config = DiskStoreConfig::new("a/b/c", "/tmp/cache");
        assert_eq!(config.data_file_name(), "a_b_c.data");
        assert_eq!(config.index_file_name(), "a_b_c.index");
        assert_eq!(
            config.data_file_path(),
            PathBuf::from("/tmp/cache/a_b_c.data")
        );
    }

    #[test]
    fn test_disk_config_validation() {
        assert!(DiskStoreConfig::new("", "/tmp").validate().is_err());
        assert!(DiskStoreConfig::new("x", "").validate().is_err());
        assert!(DiskStoreConfig::new("x", "/tmp")
            .with_spool_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(DiskStoreConfig::new("x", "/tmp")
            .with_expiry_interval(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_auto_generated_directory_is_recognised() {
        let config = DiskStoreConfig::in_auto_generated_directory("tmp");
        assert!(config.is_auto_generated());
        assert!(!DiskStoreConfig::new("tmp", "/var/cache").is_auto_generated());
    }

    #[test]
    fn test_disk_config_debug() {
        let config = DiskStoreConfig::new("debug", "/tmp").with_persistent(true);
        let debug = format!("{:?}", config);
        assert!(debug.contains("DiskStoreConfig"));
        assert!(debug.contains("persistent: true"));
    }
}
