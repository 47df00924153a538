//! Disk Store Engine
//!
//! A [`Store`] that keeps its elements in a single data file, with writes
//! buffered in an in-memory spool and drained by a background thread.
//!
//! # Architecture
//!
//! ```text
//!   put ──▶ ┌──────────────────────┐          ┌───────────────────────────┐
//!           │ spool (DashMap)      │── swap ─▶│ spool thread              │
//!           │ RwLock-guarded slot  │          │  for each element (in put │
//!           └──────────────────────┘          │  order): free old block,  │
//!                   ▲                         │  evict if full, encode,   │
//!   get / remove ───┤                         │  first-fit or append,     │
//!                   ▼                         │  update index             │
//!           ┌──────────────────────┐          └─────────────┬─────────────┘
//!           │ state (Mutex)        │◀───────────────────────┘
//!           │  index: key → block  │
//!           │  free list           │      ┌──────────────────────┐
//!           │  total used bytes    │─────▶│ data file (Mutex)    │
//!           └──────────────────────┘      └──────────────────────┘
//! ```
//!
//! # Locking
//!
//! `put` only takes the spool slot's read lock, so concurrent writers never
//! wait for each other or for disk I/O. Every other operation, and each
//! drain of the spool, runs under the state lock. The data file has its own
//! lock, always taken after the state lock. The spool is swapped for an empty
//! one under the slot's write lock while the state lock is held, so readers
//! never see an element that is in neither the spool nor the index.
//!
//! # Failure handling
//!
//! Nothing but construction and `remove_all` reports an error. Failed reads
//! log and return `None`; failed writes log and drop the element. Encoding is
//! retried once after a short pause before the element is dropped.

mod block;
mod persist;
mod scheduler;

pub use block::DiskBlock;

use self::block::FreeList;
use self::persist::{encode_index, read_index_file, write_index_file, LoadedIndex};
use self::scheduler::{SchedulerSignal, SpoolTask};
use crate::codec::{decode_element, encode_element, Codec};
use crate::config::DiskStoreConfig;
use crate::element::{now_millis, Element};
use crate::error::{CodecError, StoreError};
use crate::event::RegisteredListeners;
use crate::metrics::{CacheMetrics, CoreStoreMetrics};
use crate::policy::{select_candidate, EvictionPolicy};
use crate::sampled::SampledMap;
use crate::store::{Status, Store};
use core::fmt;
use core::hash::Hash;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const SERIALIZATION_ATTEMPTS: u32 = 2;
const SERIALIZATION_RETRY_PAUSE: Duration = Duration::from_millis(250);
const ESTIMATED_MINIMUM_PAYLOAD_SIZE: u64 = 512;

struct Spooled<K, V> {
    seq: u64,
    element: Element<K, V>,
}

struct DiskState<K> {
    index: SampledMap<K, DiskBlock>,
    free: FreeList,
    total_size: u64,
    rng: StdRng,
}

impl<K: Hash + Eq + Clone> DiskState<K> {
    fn new() -> Self {
        Self {
            index: SampledMap::new(),
            free: FreeList::new(),
            total_size: 0,
            rng: StdRng::from_entropy(),
        }
    }

    fn restore(&mut self, loaded: LoadedIndex<K>) {
        for (key, block) in loaded.entries {
            self.total_size += u64::from(block.used_size());
            self.index.insert(key, block);
        }
        self.free = FreeList::from_blocks(loaded.free);
    }

    /// Moves an already unindexed block to the free list.
    fn reclaim(&mut self, block: DiskBlock) {
        self.total_size = self.total_size.saturating_sub(u64::from(block.used_size()));
        self.free.release(block);
    }

    /// Unindexes `key` and frees its block.
    fn release(&mut self, key: &K) -> Option<DiskBlock> {
        let block = self.index.remove(key)?;
        self.reclaim(block);
        Some(block)
    }

    fn clear(&mut self) {
        self.index.clear();
        self.free.clear();
        self.total_size = 0;
    }

    fn estimated_payload_size(&self) -> usize {
        let estimate = match self.index.len() as u64 {
            0 => 0,
            len => self.total_size / len,
        };
        let estimate = if estimate == 0 {
            ESTIMATED_MINIMUM_PAYLOAD_SIZE
        } else {
            estimate
        };
        usize::try_from(estimate).unwrap_or(usize::MAX)
    }
}

enum Lookup<K, V> {
    Live(Element<K, V>),
    /// Expired and removed. Carries the element when it was read back for
    /// listeners.
    Expired(Option<Element<K, V>>),
    Absent,
}

struct DiskInner<K, V> {
    config: DiskStoreConfig,
    data_path: PathBuf,
    index_path: PathBuf,
    auto_generated: bool,
    spool: RwLock<DashMap<K, Spooled<K, V>>>,
    spool_seq: AtomicU64,
    state: Mutex<DiskState<K>>,
    file: Mutex<Option<File>>,
    status: RwLock<Status>,
    signal: SchedulerSignal,
    last_element_size: AtomicU64,
    listeners: Arc<RegisteredListeners<K, V>>,
    metrics: CoreStoreMetrics,
}

fn remove_if_present(store: &str, path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(store, path = %path.display(), "deleted file"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(store, path = %path.display(), error = %err, "failed to delete file"),
    }
}

fn prepare_files<K: Codec>(
    config: &DiskStoreConfig,
    data_path: &Path,
    index_path: &Path,
) -> Result<(File, Option<LoadedIndex<K>>), StoreError> {
    let name = config.name.as_str();
    let dir = &config.disk_path;
    if dir.exists() && !dir.is_dir() {
        return Err(StoreError::init(
            name,
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} exists and is not a directory", dir.display()),
            ),
        ));
    }
    fs::create_dir_all(dir).map_err(|err| StoreError::init(name, err))?;

    if !data_path.exists() && index_path.exists() {
        debug!(store = name, "index file without data file; deleting index");
        remove_if_present(name, index_path);
    }

    let mut loaded = None;
    if config.persistent && !config.is_auto_generated() {
        let data_len = fs::metadata(data_path).map_or(0, |meta| meta.len());
        match read_index_file::<K>(index_path, data_len) {
            Ok(Some(index)) => loaded = Some(index),
            Ok(None) => {
                if data_len > 0 {
                    warn!(store = name, "data file has no index; discarding it");
                    remove_if_present(name, data_path);
                }
            }
            Err(err) => {
                error!(store = name, error = %err, "could not load index; discarding data file");
                remove_if_present(name, data_path);
                remove_if_present(name, index_path);
            }
        }
    } else {
        if config.persistent {
            warn!(
                store = name,
                path = %dir.display(),
                "persistent store in an auto-generated directory does not reload previous contents"
            );
        }
        remove_if_present(name, data_path);
        remove_if_present(name, index_path);
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(data_path)
        .map_err(|err| StoreError::init(name, err))?;
    Ok((file, loaded))
}

impl<K, V> DiskInner<K, V>
where
    K: Hash + Eq + Clone + Codec + Send + Sync + 'static,
    V: Clone + Codec + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.config.name
    }

    fn is_alive(&self) -> bool {
        *self.status.read() == Status::Alive
    }

    fn not_alive(&self) -> StoreError {
        StoreError::NotAlive(self.config.name.clone())
    }

    fn put(&self, element: Element<K, V>) {
        if !self.is_alive() {
            debug!(store = self.name(), "dropping put on a store that is not alive");
            return;
        }
        self.metrics.record_put();

        if !self.signal.is_alive() {
            error!(
                store = self.name(),
                "spool thread is not running; dropping spooled elements"
            );
            self.spool.read().clear();
            return;
        }

        let seq = self.spool_seq.fetch_add(1, Ordering::Relaxed);
        self.spool
            .read()
            .insert(element.key.clone(), Spooled { seq, element });
    }

    fn read_element(&self, block: &DiskBlock) -> Result<Element<K, V>, StoreError> {
        let mut buffer = vec![0u8; block.used_size() as usize];
        {
            let mut guard = self.file.lock();
            let file = guard.as_mut().ok_or_else(|| self.not_alive())?;
            file.seek(SeekFrom::Start(block.offset()))?;
            file.read_exact(&mut buffer)?;
        }
        let mut element: Element<K, V> = decode_element(&buffer)?;
        element.set_hit_count(block.hit_count());
        Ok(element)
    }

    fn read_for_listeners(&self, block: &DiskBlock) -> Option<Element<K, V>> {
        if !self.listeners.has_listeners() {
            return None;
        }
        match self.read_element(block) {
            Ok(element) => Some(element),
            Err(err) => {
                warn!(store = self.name(), error = %err, "could not read element back for listeners");
                None
            }
        }
    }

    fn spool_lookup(&self, key: &K, update_statistics: bool, now: u64) -> Lookup<K, V> {
        let spool = self.spool.read();
        let live = match spool.get_mut(key) {
            Some(mut entry) => {
                let element = &mut entry.element;
                if !self.config.eternal && element.is_expired_at(now) {
                    None
                } else {
                    if update_statistics {
                        element.update_access_statistics();
                    }
                    Some(element.clone())
                }
            }
            None => return Lookup::Absent,
        };
        if let Some(element) = live {
            return Lookup::Live(element);
        }
        // a put may have replaced the expired element since the shard guard
        // was dropped
        match spool.remove_if(key, |_, spooled| spooled.element.is_expired_at(now)) {
            Some((_, spooled)) => Lookup::Expired(Some(spooled.element)),
            None => {
                drop(spool);
                self.spool_lookup(key, update_statistics, now)
            }
        }
    }

    fn disk_lookup(
        &self,
        state: &mut DiskState<K>,
        key: &K,
        update_statistics: bool,
        now: u64,
    ) -> Lookup<K, V> {
        let block = match state.index.get(key) {
            Some(block) => *block,
            None => return Lookup::Absent,
        };

        if !self.config.eternal && block.is_expired_at(now) {
            let element = self.read_for_listeners(&block);
            state.release(key);
            return Lookup::Expired(element);
        }

        match self.read_element(&block) {
            Ok(mut element) => {
                if update_statistics {
                    element.update_access_statistics();
                    if let Some(indexed) = state.index.get_mut(key) {
                        indexed.record_hit(element.hit_count(), element.expiration_time());
                    }
                }
                Lookup::Live(element)
            }
            Err(err) => {
                error!(store = self.name(), error = %err, "failed to read element from disk");
                Lookup::Absent
            }
        }
    }

    fn lookup(&self, key: &K, update_statistics: bool) -> Option<Element<K, V>> {
        if !self.is_alive() {
            return None;
        }
        let now = now_millis();

        let outcome = {
            let mut state = self.state.lock();
            match self.spool_lookup(key, update_statistics, now) {
                Lookup::Absent => self.disk_lookup(&mut state, key, update_statistics, now),
                Lookup::Expired(element) => {
                    // the disk copy, if any, is older still
                    state.release(key);
                    Lookup::Expired(element)
                }
                live @ Lookup::Live(_) => live,
            }
        };

        match outcome {
            Lookup::Live(element) => {
                self.metrics.record_hit();
                Some(element)
            }
            Lookup::Expired(element) => {
                self.metrics.record_miss();
                self.metrics.record_expirations(1);
                if let Some(element) = element {
                    self.listeners.notify_expired(&element);
                }
                None
            }
            Lookup::Absent => {
                self.metrics.record_miss();
                None
            }
        }
    }

    /// Removes `key` from the spool and the index. Returns whether anything
    /// was removed and, when `read_back` is set, the element.
    fn remove(&self, key: &K, read_back: bool) -> (bool, Option<Element<K, V>>) {
        if !self.is_alive() {
            return (false, None);
        }
        let mut state = self.state.lock();
        let spooled = self
            .spool
            .read()
            .remove(key)
            .map(|(_, spooled)| spooled.element);

        let Some(block) = state.index.remove(key) else {
            return (spooled.is_some(), spooled);
        };
        let from_disk = if read_back && spooled.is_none() {
            match self.read_element(&block) {
                Ok(element) => Some(element),
                Err(err) => {
                    error!(store = self.name(), error = %err, "failed to read removed element from disk");
                    None
                }
            }
        } else {
            None
        };
        state.reclaim(block);
        (true, spooled.or(from_disk))
    }

    fn flush_spool(&self, state: &mut DiskState<K>) -> Vec<Element<K, V>> {
        let detached = std::mem::take(&mut *self.spool.write());
        if detached.is_empty() {
            return Vec::new();
        }

        let mut batch: Vec<Spooled<K, V>> = detached.into_iter().map(|(_, s)| s).collect();
        batch.sort_unstable_by_key(|spooled| spooled.seq);
        let count = batch.len();

        let mut evicted = Vec::new();
        let mut buffer = Vec::new();
        let mut just_added: Option<K> = None;
        for Spooled { element, .. } in batch {
            match self.write_or_replace(
                state,
                &element,
                just_added.as_ref(),
                &mut buffer,
                &mut evicted,
            ) {
                Ok(()) => just_added = Some(element.key),
                Err(err) => {
                    self.metrics.record_write_failure();
                    error!(store = self.name(), error = %err, "failed to write element to disk; dropping it");
                }
            }
        }

        self.metrics.record_flush();
        debug!(store = self.name(), count, "flushed spool to disk");
        evicted
    }

    fn write_or_replace(
        &self,
        state: &mut DiskState<K>,
        element: &Element<K, V>,
        just_added: Option<&K>,
        buffer: &mut Vec<u8>,
        evicted: &mut Vec<Element<K, V>>,
    ) -> Result<(), StoreError> {
        state.release(&element.key);

        let max = self.config.max_elements_on_disk;
        if max > 0 && state.index.len() >= max {
            if let Some(victim) = self.evict_one(state, just_added) {
                evicted.push(victim);
            }
        }

        self.serialize(element, buffer, state.estimated_payload_size())?;
        let len = buffer.len();
        let used = u32::try_from(len).map_err(|_| CodecError::TooLarge(len))?;

        let mut block = self.write_block(state, buffer, used)?;
        block.assign(used, element.expiration_time(), element.hit_count());
        state.index.insert(element.key.clone(), block);
        state.total_size += u64::from(used);

        self.last_element_size.store(len as u64, Ordering::Relaxed);
        self.metrics.record_write(len as u64);
        Ok(())
    }

    fn serialize(
        &self,
        element: &Element<K, V>,
        buffer: &mut Vec<u8>,
        estimate: usize,
    ) -> Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            buffer.clear();
            let result = buffer
                .try_reserve(estimate)
                .map_err(|_| CodecError::TooLarge(estimate))
                .and_then(|()| encode_element(element, buffer));
            match result {
                Ok(()) => return Ok(()),
                Err(err) if attempt < SERIALIZATION_ATTEMPTS => {
                    warn!(store = self.name(), attempt, error = %err, "failed to encode element; retrying");
                    thread::sleep(SERIALIZATION_RETRY_PAUSE);
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn write_block(
        &self,
        state: &mut DiskState<K>,
        bytes: &[u8],
        used: u32,
    ) -> Result<DiskBlock, StoreError> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(|| self.not_alive())?;

        if let Some(block) = state.free.take_first_fit(used) {
            let written = file
                .seek(SeekFrom::Start(block.offset()))
                .and_then(|_| file.write_all(bytes));
            return match written {
                Ok(()) => Ok(block),
                Err(err) => {
                    state.free.release(block);
                    Err(err.into())
                }
            };
        }

        let offset = file.seek(SeekFrom::End(0))?;
        if let Err(err) = file.write_all(bytes) {
            if let Err(truncate) = file.set_len(offset) {
                warn!(store = self.name(), error = %truncate, "failed to truncate partial record");
            }
            return Err(err.into());
        }
        Ok(DiskBlock::new(offset, used))
    }

    /// Evicts one sampled block with the lowest hit count, never the block
    /// written just before in this batch. Returns the evicted element when a
    /// listener wants to see it.
    fn evict_one(&self, state: &mut DiskState<K>, just_added: Option<&K>) -> Option<Element<K, V>> {
        let DiskState { index, rng, .. } = &mut *state;
        let victim = {
            let sample = index.sample(rng);
            let candidates: Vec<&(&K, &DiskBlock)> = sample.iter().collect();
            select_candidate(
                &candidates,
                |(k, _)| Some(*k) == just_added,
                |(_, block)| block.hit_count(),
            )
            .map(|(k, _)| K::clone(k))
        }?;

        let block = *state.index.get(&victim)?;
        let element = self.read_for_listeners(&block);
        state.release(&victim);
        self.metrics.record_eviction();
        debug!(
            store = self.name(),
            hit_count = block.hit_count(),
            "evicted element from disk"
        );
        element
    }

    fn write_index(&self, state: &DiskState<K>) -> Result<(), StoreError> {
        let bytes = encode_index(
            state.index.iter(),
            state.index.len(),
            state.free.iter(),
            state.free.len(),
        )?;
        write_index_file(&self.index_path, &bytes)?;
        self.metrics.record_index_write();
        debug!(
            store = self.name(),
            entries = state.index.len(),
            free = state.free.len(),
            "persisted index"
        );
        Ok(())
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        self.spool.read().clear();
        state.clear();
        if let Some(file) = self.file.lock().as_mut() {
            file.set_len(0)?;
        }
        if self.config.persistent {
            File::create(&self.index_path)?;
        }
        Ok(())
    }

    fn close(&self) {
        {
            let mut state = self.state.lock();
            self.spool.read().clear();
            state.clear();
            *self.file.lock() = None;
        }

        let name = self.name();
        if self.auto_generated || !self.config.persistent {
            remove_if_present(name, &self.data_path);
        }
        if self.auto_generated {
            remove_if_present(name, &self.index_path);
            if let Err(err) = fs::remove_dir(&self.config.disk_path) {
                debug!(store = name, error = %err, "could not remove auto-generated directory");
            }
        }
    }

    fn data_file_size(&self) -> u64 {
        self.file
            .lock()
            .as_ref()
            .and_then(|file| file.metadata().ok())
            .map_or(0, |meta| meta.len())
    }
}

impl<K, V> SpoolTask for DiskInner<K, V>
where
    K: Hash + Eq + Clone + Codec + Send + Sync + 'static,
    V: Clone + Codec + Send + Sync + 'static,
{
    fn flush_check(&self, flush_requested: bool) {
        let evicted = {
            let mut state = self.state.lock();
            let evicted = self.flush_spool(&mut state);
            if flush_requested && self.config.persistent {
                if let Err(err) = self.write_index(&state) {
                    error!(store = self.name(), error = %err, "failed to persist index");
                }
            }
            evicted
        };
        for element in &evicted {
            self.listeners.notify_evicted(element);
        }
    }

    fn expire_elements(&self) {
        if self.config.eternal || !self.is_alive() {
            return;
        }
        let now = now_millis();
        let notify = self.listeners.has_listeners();
        let mut expired = Vec::new();
        let mut count = 0;

        {
            let mut state = self.state.lock();
            let spool = self.spool.read();

            let mut expired_keys = Vec::new();
            spool.retain(|key, spooled| {
                if spooled.element.is_expired_at(now) {
                    expired_keys.push(key.clone());
                    if notify {
                        expired.push(spooled.element.clone());
                    }
                    false
                } else {
                    true
                }
            });
            count += expired_keys.len();
            for key in &expired_keys {
                state.release(key);
            }

            let doomed = state
                .index
                .extract_if(|key, block| block.is_expired_at(now) && !spool.contains_key(key));
            for (_, block) in doomed {
                count += 1;
                if let Some(element) = self.read_for_listeners(&block) {
                    expired.push(element);
                }
                state.reclaim(block);
            }
        }

        self.metrics.record_expirations(count);
        if count > 0 {
            debug!(store = self.name(), count, "expired elements");
        }
        for element in &expired {
            self.listeners.notify_expired(element);
        }
    }
}

/// A disk-backed [`Store`] with a write-behind spool.
///
/// # Examples
///
/// ```
/// use spoolcache::config::DiskStoreConfig;
/// use spoolcache::{DiskStore, Element, Store};
///
/// let dir = std::env::temp_dir().join("spoolcache-doc-disk-store");
/// let store: DiskStore<String, String> =
///     DiskStore::open(DiskStoreConfig::new("doc", &dir)).unwrap();
///
/// store.put(Element::new("k1".to_string(), "v1".to_string()));
/// assert_eq!(store.get(&"k1".to_string()).unwrap().value, "v1");
/// store.dispose();
/// ```
pub struct DiskStore<K, V>
where
    K: Hash + Eq + Clone + Codec + Send + Sync + 'static,
    V: Clone + Codec + Send + Sync + 'static,
{
    inner: Arc<DiskInner<K, V>>,
    spool_thread: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> DiskStore<K, V>
where
    K: Hash + Eq + Clone + Codec + Send + Sync + 'static,
    V: Clone + Codec + Send + Sync + 'static,
{
    /// Opens (or creates) the store described by `config` and starts its
    /// spool thread.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidConfig`] for a bad configuration,
    /// [`StoreError::Initialization`] when the directory or data file cannot
    /// be created or the spool thread cannot be started.
    pub fn open(config: DiskStoreConfig) -> Result<Self, StoreError> {
        Self::with_listeners(config, Arc::new(RegisteredListeners::new()))
    }

    /// Like [`open`](Self::open), announcing to an existing listener registry.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn with_listeners(
        config: DiskStoreConfig,
        listeners: Arc<RegisteredListeners<K, V>>,
    ) -> Result<Self, StoreError> {
        config.validate()?;
        let data_path = config.data_file_path();
        let index_path = config.index_file_path();
        let (file, loaded) = prepare_files::<K>(&config, &data_path, &index_path)?;

        let mut state = DiskState::new();
        if let Some(loaded) = loaded {
            state.restore(loaded);
        }
        let restored = state.index.len();
        let expiry_interval = (!config.eternal).then_some(config.expiry_interval);

        let inner = Arc::new(DiskInner {
            auto_generated: config.is_auto_generated(),
            signal: SchedulerSignal::new(config.spool_interval, expiry_interval),
            config,
            data_path,
            index_path,
            spool: RwLock::new(DashMap::new()),
            spool_seq: AtomicU64::new(0),
            state: Mutex::new(state),
            file: Mutex::new(Some(file)),
            status: RwLock::new(Status::Uninitialised),
            last_element_size: AtomicU64::new(0),
            listeners,
            metrics: CoreStoreMetrics::new(),
        });

        let task = Arc::clone(&inner);
        let spawned = thread::Builder::new()
            .name(format!("Store {} Spool Thread", inner.config.name))
            .spawn(move || scheduler::run(&task.config.name, &task.signal, &*task));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                *inner.status.write() = Status::Shutdown;
                inner.close();
                return Err(StoreError::init(&inner.config.name, err));
            }
        };

        *inner.status.write() = Status::Alive;
        info!(
            store = inner.name(),
            path = %inner.data_path.display(),
            persistent = inner.config.persistent,
            restored,
            "disk store initialised"
        );
        Ok(Self {
            inner,
            spool_thread: Mutex::new(Some(handle)),
        })
    }

    /// Store name.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// The configuration the store was opened with.
    pub fn config(&self) -> &DiskStoreConfig {
        &self.inner.config
    }

    /// The listener registry this store announces to.
    pub fn listeners(&self) -> &Arc<RegisteredListeners<K, V>> {
        &self.inner.listeners
    }

    /// Data file name, without directory.
    pub fn data_file_name(&self) -> String {
        self.inner.config.data_file_name()
    }

    /// Index file name, without directory.
    pub fn index_file_name(&self) -> String {
        self.inner.config.index_file_name()
    }

    /// Full path of the data file.
    pub fn data_file_path(&self) -> &Path {
        &self.inner.data_path
    }

    /// Full path of the index file.
    pub fn index_file_path(&self) -> &Path {
        &self.inner.index_path
    }

    /// Current length of the data file in bytes.
    pub fn data_file_size(&self) -> u64 {
        self.inner.data_file_size()
    }

    /// Current length of the index file in bytes, 0 if there is none.
    pub fn index_file_size(&self) -> u64 {
        fs::metadata(&self.inner.index_path).map_or(0, |meta| meta.len())
    }

    /// Combined length of the data and index files.
    pub fn total_file_size(&self) -> u64 {
        self.data_file_size() + self.index_file_size()
    }

    /// Bytes of the data file occupied by live records.
    pub fn used_data_size(&self) -> u64 {
        self.inner.state.lock().total_size
    }

    /// Fraction of the data file not occupied by live records.
    pub fn data_file_sparseness(&self) -> f64 {
        let file_size = self.data_file_size();
        if file_size == 0 {
            return 0.0;
        }
        1.0 - self.used_data_size() as f64 / file_size as f64
    }

    /// Whether the spool thread is still running.
    pub fn is_spool_thread_alive(&self) -> bool {
        self.inner.signal.is_alive()
    }

    /// Whether a requested flush has not completed yet.
    pub fn flush_pending(&self) -> bool {
        self.inner.signal.flush_pending()
    }

    /// Number of elements waiting in the spool.
    pub fn spool_len(&self) -> usize {
        self.inner.spool.read().len()
    }

    /// Copy of the block descriptor currently indexed for `key`.
    pub fn disk_block(&self, key: &K) -> Option<DiskBlock> {
        self.inner.state.lock().index.get(key).copied()
    }

    /// Number of blocks on the free list.
    pub fn free_block_count(&self) -> usize {
        self.inner.state.lock().free.len()
    }

    /// Removes `key` without reading its record back. Returns whether it was
    /// present.
    pub fn discard(&self, key: &K) -> bool {
        self.inner.remove(key, false).0
    }
}

impl<K, V> Store<K, V> for DiskStore<K, V>
where
    K: Hash + Eq + Clone + Codec + Send + Sync + 'static,
    V: Clone + Codec + Send + Sync + 'static,
{
    fn put(&self, element: Element<K, V>) {
        self.inner.put(element);
    }

    fn get(&self, key: &K) -> Option<Element<K, V>> {
        self.inner.lookup(key, true)
    }

    fn get_quiet(&self, key: &K) -> Option<Element<K, V>> {
        self.inner.lookup(key, false)
    }

    fn keys(&self) -> Vec<K> {
        let state = self.inner.state.lock();
        let spool = self.inner.spool.read();
        let mut keys: Vec<K> = state.index.keys().cloned().collect();
        keys.extend(
            spool
                .iter()
                .filter(|entry| !state.index.contains_key(entry.key()))
                .map(|entry| entry.key().clone()),
        );
        keys
    }

    fn remove(&self, key: &K) -> Option<Element<K, V>> {
        self.inner.remove(key, true).1
    }

    fn remove_all(&self) -> Result<(), StoreError> {
        if !self.inner.is_alive() {
            return Err(self.inner.not_alive());
        }
        if let Err(err) = self.inner.clear_all() {
            error!(store = self.name(), error = %err, "remove_all failed; disposing store");
            self.dispose();
            return Err(err);
        }
        Ok(())
    }

    fn dispose(&self) {
        {
            let mut status = self.inner.status.write();
            if *status == Status::Shutdown {
                return;
            }
            *status = Status::Shutdown;
        }

        self.inner.signal.request_flush();
        self.inner.signal.stop();
        if let Some(handle) = self.spool_thread.lock().take() {
            if handle.thread().id() == thread::current().id() {
                warn!(store = self.name(), "disposed from its own spool thread; not joining");
            } else if handle.join().is_err() {
                error!(store = self.name(), "spool thread panicked");
            }
        }

        self.inner.close();
        info!(store = self.name(), "disk store disposed");
    }

    fn size(&self) -> usize {
        let state = self.inner.state.lock();
        let spool = self.inner.spool.read();
        let spool_only = spool
            .iter()
            .filter(|entry| !state.index.contains_key(entry.key()))
            .count();
        state.index.len() + spool_only
    }

    fn size_in_bytes(&self) -> u64 {
        self.data_file_size()
    }

    fn status(&self) -> Status {
        *self.inner.status.read()
    }

    fn contains_key(&self, key: &K) -> bool {
        let state = self.inner.state.lock();
        self.inner.spool.read().contains_key(key) || state.index.contains_key(key)
    }

    fn expire_elements(&self) {
        SpoolTask::expire_elements(&*self.inner);
    }

    fn flush(&self) {
        if self.inner.is_alive() {
            self.inner.signal.request_flush();
        }
    }

    fn buffer_full(&self) -> bool {
        let spooled = self.inner.spool.read().len() as u64;
        if spooled == 0 {
            return false;
        }
        let estimate = spooled.saturating_mul(self.inner.last_element_size.load(Ordering::Relaxed));
        estimate > self.inner.config.spool_buffer_size as u64
    }

    fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy::Lfu
    }

    fn set_eviction_policy(&self, policy: EvictionPolicy) -> Result<(), StoreError> {
        match policy {
            EvictionPolicy::Lfu => Ok(()),
            other => Err(StoreError::UnsupportedPolicy(other)),
        }
    }
}

impl<K, V> CacheMetrics for DiskStore<K, V>
where
    K: Hash + Eq + Clone + Codec + Send + Sync + 'static,
    V: Clone + Codec + Send + Sync + 'static,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.inner.metrics.to_btreemap();
        metrics.insert("size".to_string(), self.size() as f64);
        metrics.insert("spool_len".to_string(), self.spool_len() as f64);
        metrics.insert("data_file_size".to_string(), self.data_file_size() as f64);
        metrics.insert("used_data_size".to_string(), self.used_data_size() as f64);
        metrics.insert("free_blocks".to_string(), self.free_block_count() as f64);
        metrics.insert(
            "free_bytes".to_string(),
            self.inner.state.lock().free.free_bytes() as f64,
        );
        metrics
    }

    fn algorithm_name(&self) -> &'static str {
        "DiskStore"
    }
}

impl<K, V> Drop for DiskStore<K, V>
where
    K: Hash + Eq + Clone + Codec + Send + Sync + 'static,
    V: Clone + Codec + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<K, V> fmt::Debug for DiskStore<K, V>
where
    K: Hash + Eq + Clone + Codec + Send + Sync + 'static,
    V: Clone + Codec + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskStore")
            .field("name", &self.inner.config.name)
            .field("data_path", &self.inner.data_path)
            .field("status", &*self.inner.status.read())
            .field("spool_len", &self.spool_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimated_payload_size() {
        let mut state: DiskState<String> = DiskState::new();
        assert_eq!(state.estimated_payload_size(), 512);

        let mut block = DiskBlock::new(0, 300);
        block.assign(300, u64::MAX, 0);
        state.index.insert("a".to_string(), block);
        state.total_size = 300;
        assert_eq!(state.estimated_payload_size(), 300);
    }

    #[test]
    fn test_release_moves_block_to_free_list() {
        let mut state: DiskState<String> = DiskState::new();
        let mut block = DiskBlock::new(64, 100);
        block.assign(90, u64::MAX, 4);
        state.index.insert("a".to_string(), block);
        state.total_size = 90;

        let released = state.release(&"a".to_string()).unwrap();
        assert_eq!(released.offset(), 64);
        assert_eq!(state.total_size, 0);
        assert_eq!(state.free.len(), 1);
        assert!(state.release(&"a".to_string()).is_none());
    }

    #[test]
    fn test_eviction_policy_is_lfu_only() {
        let dir = tempfile::tempdir().unwrap();
        let store: DiskStore<String, String> =
            DiskStore::open(DiskStoreConfig::new("policy", dir.path())).unwrap();
        assert_eq!(store.eviction_policy(), EvictionPolicy::Lfu);
        assert!(store.set_eviction_policy(EvictionPolicy::Lfu).is_ok());
        assert!(matches!(
            store.set_eviction_policy(EvictionPolicy::Lru),
            Err(StoreError::UnsupportedPolicy(EvictionPolicy::Lru))
        ));
        assert!(store.set_eviction_policy(EvictionPolicy::Fifo).is_err());
    }

    fn idle_store(dir: &Path) -> DiskStore<String, String> {
        let config = DiskStoreConfig::new("spool", dir).with_spool_interval(Duration::from_secs(60));
        DiskStore::open(config).unwrap()
    }

    #[test]
    fn test_expired_spool_lookup_keeps_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let store = idle_store(dir.path());
        let key = "k".to_string();
        let now = now_millis();

        let stale = Element::new(key.clone(), "stale".to_string())
            .with_time_to_live(Duration::from_millis(1));
        store.put(stale);
        thread::sleep(Duration::from_millis(10));
        store.put(Element::new(key.clone(), "fresh".to_string()));

        // the replacement is live, so the lookup must not drop it
        match store.inner.spool_lookup(&key, false, now + 10) {
            Lookup::Live(element) => assert_eq!(element.value, "fresh"),
            _ => panic!("replacement was not returned"),
        }
        assert_eq!(store.get(&key).unwrap().value, "fresh");
        assert_eq!(store.spool_len(), 1);
        assert_eq!(store.inner.metrics.to_btreemap()["expirations"], 0.0);
    }

    #[test]
    fn test_expired_spool_lookup_races_with_put() {
        let dir = tempfile::tempdir().unwrap();
        let store = idle_store(dir.path());
        let key = "k".to_string();

        for round in 0..200 {
            let stale = Element::new(key.clone(), "stale".to_string())
                .with_time_to_live(Duration::from_millis(1));
            store.put(stale);
            thread::sleep(Duration::from_millis(2));

            let barrier = std::sync::Barrier::new(2);
            thread::scope(|scope| {
                scope.spawn(|| {
                    barrier.wait();
                    store.put(Element::new(key.clone(), format!("fresh{}", round)));
                });
                barrier.wait();
                let _ = store.get(&key);
            });

            assert_eq!(
                store.get_quiet(&key).map(|element| element.value),
                Some(format!("fresh{}", round))
            );
            store.discard(&key);
        }
    }

    #[test]
    fn test_dead_spool_thread_drops_writes_and_keeps_serving() {
        let dir = tempfile::tempdir().unwrap();
        let config = DiskStoreConfig::new("dead", dir.path())
            .with_spool_interval(Duration::from_millis(10));
        let store: DiskStore<String, String> = DiskStore::open(config).unwrap();

        store.put(Element::new("kept".to_string(), "on disk".to_string()));
        store.flush();
        while store.flush_pending() {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(store.disk_block(&"kept".to_string()).is_some());

        store.inner.signal.stop();
        let handle = store.spool_thread.lock().take().unwrap();
        handle.join().unwrap();
        assert!(!store.is_spool_thread_alive());

        store.put(Element::new("lost".to_string(), "never written".to_string()));
        assert_eq!(store.spool_len(), 0);
        assert!(store.get(&"lost".to_string()).is_none());
        assert_eq!(store.get(&"kept".to_string()).unwrap().value, "on disk");
        assert_eq!(store.status(), Status::Alive);
        assert_eq!(store.size(), 1);

        store.dispose();
        assert_eq!(store.status(), Status::Shutdown);
    }
}
