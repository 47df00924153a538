//! Index file persistence.
//!
//! The index file holds a full snapshot of the disk index and the free list.
//! It is never updated incrementally: each write produces a complete snapshot
//! in `<name>.index.tmp`, syncs it and renames it over `<name>.index`.
//!
//! ```text
//! magic "SPIX" | version u16 | reserved u16
//! entry_count u64
//!   { key_len u32 | key | offset u64 | block_size u32 | used_size u32 | expiry u64 | hit_count u64 } *
//! free_count u64
//!   { offset u64 | block_size u32 } *
//! crc32c u32
//! ```
//!
//! On load every block is checked against the data file: a record must lie
//! inside the file, use no more than its allocation, and no two blocks may
//! overlap. Any violation is reported as [`StoreError::IndexCorruption`] and
//! the caller discards both files.

use super::block::DiskBlock;
use crate::codec::{append_checksum, encode_prefixed, verify_checksum, ByteReader, Codec};
use crate::error::{CodecError, StoreError};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const INDEX_MAGIC: &[u8; 4] = b"SPIX";
const INDEX_VERSION: u16 = 1;

/// Blocks recovered from an index file.
#[derive(Debug)]
pub(crate) struct LoadedIndex<K> {
    pub(crate) entries: Vec<(K, DiskBlock)>,
    pub(crate) free: Vec<DiskBlock>,
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Encodes a snapshot into bytes.
pub(crate) fn encode_index<'a, K, E, F>(
    entries: E,
    entry_count: usize,
    free: F,
    free_count: usize,
) -> Result<Vec<u8>, CodecError>
where
    K: Codec + 'a,
    E: Iterator<Item = (&'a K, &'a DiskBlock)>,
    F: Iterator<Item = &'a DiskBlock>,
{
    let mut out = Vec::with_capacity(32 + entry_count * 48 + free_count * 12);
    out.extend_from_slice(INDEX_MAGIC);
    out.extend_from_slice(&INDEX_VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());

    out.extend_from_slice(&(entry_count as u64).to_le_bytes());
    for (key, block) in entries {
        encode_prefixed(key, &mut out)?;
        out.extend_from_slice(&block.offset().to_le_bytes());
        out.extend_from_slice(&block.block_size().to_le_bytes());
        out.extend_from_slice(&block.used_size().to_le_bytes());
        out.extend_from_slice(&block.expiry_time().to_le_bytes());
        out.extend_from_slice(&block.hit_count().to_le_bytes());
    }

    out.extend_from_slice(&(free_count as u64).to_le_bytes());
    for block in free {
        out.extend_from_slice(&block.offset().to_le_bytes());
        out.extend_from_slice(&block.block_size().to_le_bytes());
    }

    append_checksum(&mut out);
    Ok(out)
}

/// Writes `bytes` as the new index file, replacing any previous snapshot.
pub(crate) fn write_index_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = temp_path(path);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

fn corrupt(path: &Path, detail: impl Into<String>) -> StoreError {
    StoreError::IndexCorruption {
        path: path.to_path_buf(),
        detail: detail.into(),
    }
}

fn decode_index<K: Codec>(bytes: &[u8]) -> Result<LoadedIndex<K>, CodecError> {
    let body = verify_checksum(bytes)?;
    let mut reader = ByteReader::new(body);

    if reader.take(4)? != INDEX_MAGIC {
        return Err(CodecError::Invalid("bad index magic".to_string()));
    }
    let version = reader.u16()?;
    if version != INDEX_VERSION {
        return Err(CodecError::Invalid(format!(
            "unsupported index version {}",
            version
        )));
    }
    reader.u16()?;

    let entry_count = reader.u64()?;
    let mut entries = Vec::new();
    for _ in 0..entry_count {
        let key = K::decode(reader.prefixed()?)?;
        let offset = reader.u64()?;
        let block_size = reader.u32()?;
        let used_size = reader.u32()?;
        let expiry_time = reader.u64()?;
        let hit_count = reader.u64()?;
        entries.push((
            key,
            DiskBlock::restore(offset, block_size, used_size, expiry_time, hit_count),
        ));
    }

    let free_count = reader.u64()?;
    let mut free = Vec::new();
    for _ in 0..free_count {
        let offset = reader.u64()?;
        let block_size = reader.u32()?;
        free.push(DiskBlock::new(offset, block_size));
    }

    if reader.remaining() != 0 {
        return Err(CodecError::Invalid(format!(
            "{} trailing bytes after index",
            reader.remaining()
        )));
    }
    Ok(LoadedIndex { entries, free })
}

/// Allocated byte range of `block`, rejecting offsets that overflow.
fn extent(path: &Path, block: &DiskBlock) -> Result<(u64, u64), StoreError> {
    let end = block
        .offset()
        .checked_add(u64::from(block.block_size()))
        .ok_or_else(|| {
            corrupt(
                path,
                format!("block at {} overflows the offset range", block.offset()),
            )
        })?;
    Ok((block.offset(), end))
}

fn validate<K>(path: &Path, index: &LoadedIndex<K>, data_len: u64) -> Result<(), StoreError> {
    let mut extents: Vec<(u64, u64)> = Vec::with_capacity(index.entries.len() + index.free.len());

    for (_, block) in &index.entries {
        if block.used_size() > block.block_size() {
            return Err(corrupt(
                path,
                format!(
                    "block at {} uses {} of {} bytes",
                    block.offset(),
                    block.used_size(),
                    block.block_size()
                ),
            ));
        }
        let (offset, end) = extent(path, block)?;
        // used_size <= block_size, so this cannot overflow once the extent fits
        if offset + u64::from(block.used_size()) > data_len {
            return Err(corrupt(
                path,
                format!("block at {} ends past the data file ({} bytes)", offset, data_len),
            ));
        }
        extents.push((offset, end));
    }
    for block in &index.free {
        let (offset, end) = extent(path, block)?;
        if end > data_len {
            return Err(corrupt(
                path,
                format!("free block at {} ends past the data file", offset),
            ));
        }
        extents.push((offset, end));
    }

    extents.sort_unstable();
    for pair in extents.windows(2) {
        if pair[0].1 > pair[1].0 {
            return Err(corrupt(
                path,
                format!("blocks at {} and {} overlap", pair[0].0, pair[1].0),
            ));
        }
    }
    Ok(())
}

/// Reads and validates the index at `path` against a data file of
/// `data_len` bytes.
///
/// Returns `Ok(None)` when there is no prior state (missing or empty file).
pub(crate) fn read_index_file<K: Codec>(
    path: &Path,
    data_len: u64,
) -> Result<Option<LoadedIndex<K>>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if bytes.is_empty() {
        return Ok(None);
    }

    let index = decode_index(&bytes).map_err(|err| corrupt(path, err.to_string()))?;
    validate(path, &index, data_len)?;
    Ok(Some(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(String, DiskBlock)], free: &[DiskBlock]) -> Vec<u8> {
        encode_index(
            entries.iter().map(|(k, b)| (k, b)),
            entries.len(),
            free.iter(),
            free.len(),
        )
        .unwrap()
    }

    fn used(offset: u64, size: u32) -> DiskBlock {
        DiskBlock::restore(offset, size, size, u64::MAX, 2)
    }

    #[test]
    fn test_index_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.index");
        let entries = vec![
            ("a".to_string(), used(0, 100)),
            ("b".to_string(), used(160, 40)),
        ];
        let free = vec![DiskBlock::new(100, 60)];
        write_index_file(&path, &snapshot(&entries, &free)).unwrap();
        assert!(!temp_path(&path).exists());

        let loaded: LoadedIndex<String> = read_index_file(&path, 200).unwrap().unwrap();
        assert_eq!(loaded.entries, entries);
        assert_eq!(loaded.free, free);
    }

    #[test]
    fn test_missing_or_empty_index_is_no_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.index");
        assert!(read_index_file::<String>(&path, 0).unwrap().is_none());
        File::create(&path).unwrap();
        assert!(read_index_file::<String>(&path, 0).unwrap().is_none());
    }

    #[test]
    fn test_garbage_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.index");
        fs::write(&path, b"definitely not an index").unwrap();
        assert!(matches!(
            read_index_file::<String>(&path, 1_000),
            Err(StoreError::IndexCorruption { .. })
        ));
    }

    #[test]
    fn test_block_past_end_of_data_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.index");
        let entries = vec![("a".to_string(), used(0, 100))];
        write_index_file(&path, &snapshot(&entries, &[])).unwrap();
        assert!(matches!(
            read_index_file::<String>(&path, 50),
            Err(StoreError::IndexCorruption { .. })
        ));
    }

    #[test]
    fn test_overlapping_blocks_are_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.index");
        let entries = vec![("a".to_string(), used(0, 100))];
        let free = vec![DiskBlock::new(50, 100)];
        write_index_file(&path, &snapshot(&entries, &free)).unwrap();
        assert!(read_index_file::<String>(&path, 500).is_err());
    }

    #[test]
    fn test_used_exceeding_allocation_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.index");
        let entries = vec![("a".to_string(), DiskBlock::restore(0, 10, 20, 0, 0))];
        write_index_file(&path, &snapshot(&entries, &[])).unwrap();
        assert!(read_index_file::<String>(&path, 500).is_err());
    }

    #[test]
    fn test_offset_overflow_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.index");
        let entries = vec![("a".to_string(), used(u64::MAX - 4, 100))];
        write_index_file(&path, &snapshot(&entries, &[])).unwrap();
        assert!(matches!(
            read_index_file::<String>(&path, 500),
            Err(StoreError::IndexCorruption { .. })
        ));

        let free = vec![DiskBlock::new(u64::MAX, 1)];
        write_index_file(&path, &snapshot(&[], &free)).unwrap();
        assert!(matches!(
            read_index_file::<String>(&path, 500),
            Err(StoreError::IndexCorruption { .. })
        ));
    }
}
