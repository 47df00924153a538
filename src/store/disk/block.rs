//! Disk block descriptors and the free-block list.
//!
//! A [`DiskBlock`] describes one allocated region of the data file. The
//! owning key is held next to the descriptor in the disk index, so a block on
//! the free list carries no key at all.
//!
//! ```text
//!   data file
//!   ┌──────────┬──────────────┬────────┬──────────────────┐
//!   │ block A  │ block B      │ C      │ block D          │
//!   │ used ███ │ used ██░░░░░ │ free   │ used ████████    │
//!   └──────────┴──────────────┴────────┴──────────────────┘
//!   offset     offset+size    ▲
//!                             └── reusable by any record ≤ its block_size
//! ```
//!
//! Allocation is first fit: the first free block large enough is reused
//! whole. Blocks are never split or coalesced, so the file may fragment.

use core::fmt;

/// Metadata for one region of the data file.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DiskBlock {
    offset: u64,
    block_size: u32,
    used_size: u32,
    expiry_time: u64,
    hit_count: u64,
}

impl DiskBlock {
    pub(crate) fn new(offset: u64, block_size: u32) -> Self {
        Self {
            offset,
            block_size,
            used_size: 0,
            expiry_time: 0,
            hit_count: 0,
        }
    }

    pub(crate) fn restore(
        offset: u64,
        block_size: u32,
        used_size: u32,
        expiry_time: u64,
        hit_count: u64,
    ) -> Self {
        Self {
            offset,
            block_size,
            used_size,
            expiry_time,
            hit_count,
        }
    }

    /// Byte offset of the block in the data file.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Allocated size of the block.
    #[inline]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Bytes of the block occupied by the current record.
    #[inline]
    pub fn used_size(&self) -> u32 {
        self.used_size
    }

    /// Cached expiry deadline of the stored element, ms since the epoch.
    #[inline]
    pub fn expiry_time(&self) -> u64 {
        self.expiry_time
    }

    /// Cached hit count of the stored element.
    #[inline]
    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    /// First byte past the allocated region.
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(u64::from(self.block_size))
    }

    #[inline]
    pub(crate) fn fits(&self, size: u32) -> bool {
        self.block_size >= size
    }

    pub(crate) fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expiry_time
    }

    pub(crate) fn assign(&mut self, used_size: u32, expiry_time: u64, hit_count: u64) {
        debug_assert!(used_size <= self.block_size);
        self.used_size = used_size;
        self.expiry_time = expiry_time;
        self.hit_count = hit_count;
    }

    pub(crate) fn record_hit(&mut self, hit_count: u64, expiry_time: u64) {
        self.hit_count = hit_count;
        self.expiry_time = expiry_time;
    }

    /// Resets everything but the allocation so the block can be reused.
    pub(crate) fn release(&mut self) {
        self.used_size = 0;
        self.expiry_time = 0;
        self.hit_count = 0;
    }
}

impl fmt::Debug for DiskBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskBlock")
            .field("offset", &self.offset)
            .field("block_size", &self.block_size)
            .field("used_size", &self.used_size)
            .field("expiry_time", &self.expiry_time)
            .field("hit_count", &self.hit_count)
            .finish()
    }
}

/// Reclaimed blocks awaiting reuse, kept in release order.
#[derive(Debug, Default)]
pub(crate) struct FreeList {
    blocks: Vec<DiskBlock>,
}

impl FreeList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_blocks(blocks: Vec<DiskBlock>) -> Self {
        let mut list = Self::new();
        for block in blocks {
            list.release(block);
        }
        list
    }

    /// Adds `block` to the list, clearing its payload bookkeeping.
    pub(crate) fn release(&mut self, mut block: DiskBlock) {
        block.release();
        self.blocks.push(block);
    }

    /// Removes and returns the first block with room for `size` bytes.
    pub(crate) fn take_first_fit(&mut self, size: u32) -> Option<DiskBlock> {
        let pos = self.blocks.iter().position(|block| block.fits(size))?;
        Some(self.blocks.remove(pos))
    }

    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &DiskBlock> {
        self.blocks.iter()
    }

    pub(crate) fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Total allocated bytes sitting on the list.
    pub(crate) fn free_bytes(&self) -> u64 {
        self.blocks.iter().map(|b| u64::from(b.block_size)).sum()
    }
}
