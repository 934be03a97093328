//! Free-block bitmap allocator (spec §4.2, C2).
//!
//! Bit `i` of byte `i / 8`, LSB-first, corresponds to block index `i`; `1` means
//! allocated. The bitmap occupies block 0 (and as many following blocks as needed for
//! `total_blocks` bits). Blocks below `data_start` (the bitmap's own blocks plus the
//! inode table, per [`crate::layout::Layout`]) are permanently reserved.

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::util::ceil_division;

/// Persistent free-block map.
pub struct Bitmap {
    bits: Vec<u8>,
    total_blocks: u64,
    free_count: u64,
    /// Number of on-disk blocks the bitmap itself occupies.
    block_count: u64,
    /// First block eligible for allocation; everything below is reserved metadata.
    data_start: u64,
}

impl Bitmap {
    /// Number of blocks needed to store `total_blocks` bits in `block_size`-byte blocks.
    pub fn blocks_needed(total_blocks: u64, block_size: usize) -> u64 {
        ceil_division(ceil_division(total_blocks, 8), block_size as u64)
    }

    /// Builds a fresh, all-free bitmap with blocks `0..data_start` marked allocated.
    pub fn initialize(total_blocks: u64, block_size: usize, data_start: u64) -> Self {
        let block_count = Self::blocks_needed(total_blocks, block_size);
        let bits = vec![0u8; (block_count * block_size as u64) as usize];
        let mut bitmap = Self {
            bits,
            total_blocks,
            free_count: total_blocks,
            block_count,
            data_start,
        };
        for b in 0..data_start.min(total_blocks) {
            bitmap.set_bit(b, true);
            bitmap.free_count -= 1;
        }
        bitmap
    }

    /// Loads the bitmap through the cache, recomputing the free count by scan and
    /// reasserting the reserved bits per spec §4.2.
    pub fn load(cache: &Cache, total_blocks: u64, block_size: usize, data_start: u64) -> Result<Self> {
        let block_count = Self::blocks_needed(total_blocks, block_size);
        let mut bits = vec![0u8; (block_count * block_size as u64) as usize];
        for i in 0..block_count {
            let mut buf = vec![0u8; block_size];
            cache.read_block(i, &mut buf)?;
            let start = (i as usize) * block_size;
            bits[start..start + block_size].copy_from_slice(&buf);
        }
        let mut bitmap = Self {
            bits,
            total_blocks,
            free_count: 0,
            block_count,
            data_start,
        };
        for b in 0..data_start.min(total_blocks) {
            bitmap.set_bit(b, true);
        }
        bitmap.free_count = bitmap.recompute_free_count();
        Ok(bitmap)
    }

    /// Writes the bitmap block(s) through the cache.
    pub fn save(&self, cache: &Cache) -> Result<()> {
        let block_size = self.bits.len() / self.block_count.max(1) as usize;
        for i in 0..self.block_count {
            let start = (i as usize) * block_size;
            cache.write_block(i, &self.bits[start..start + block_size])?;
        }
        Ok(())
    }

    fn recompute_free_count(&self) -> u64 {
        let allocated: u64 = self.bits.iter().map(|b| b.count_ones() as u64).sum();
        self.total_blocks.saturating_sub(allocated)
    }

    fn bit(&self, idx: u64) -> bool {
        if idx >= self.total_blocks {
            // Out-of-range indices report allocated (safer default), per spec.
            return true;
        }
        let byte = (idx / 8) as usize;
        let bit = (idx % 8) as u8;
        (self.bits[byte] >> bit) & 1 == 1
    }

    fn set_bit(&mut self, idx: u64, value: bool) {
        let byte = (idx / 8) as usize;
        let bit = (idx % 8) as u8;
        if value {
            self.bits[byte] |= 1 << bit;
        } else {
            self.bits[byte] &= !(1 << bit);
        }
    }

    /// Whether block `idx` is allocated. Out-of-range indices report `true`.
    pub fn is_allocated(&self, idx: u64) -> bool {
        self.bit(idx)
    }

    /// Number of currently-free blocks.
    pub fn free_count(&self) -> u64 {
        self.free_count
    }

    /// Total number of blocks tracked by the bitmap.
    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    /// Number of on-disk blocks the bitmap structure itself occupies.
    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// First block eligible for allocation.
    pub fn data_start(&self) -> u64 {
        self.data_start
    }

    /// Returns the lowest-index free block at or above `data_start`, allocating it.
    pub fn allocate_one(&mut self) -> Result<u64> {
        for idx in self.data_start..self.total_blocks {
            if !self.bit(idx) {
                self.set_bit(idx, true);
                self.free_count -= 1;
                return Ok(idx);
            }
        }
        Err(Error::NoSpace)
    }

    /// Returns the lowest `start >= data_start` such that `start..start+n` are all free
    /// (first-fit, ties broken by lowest index), allocating the whole run.
    pub fn allocate_contiguous(&mut self, n: u64) -> Result<u64> {
        if n == 0 {
            return Ok(self.data_start);
        }
        if n > self.total_blocks.saturating_sub(self.data_start) {
            return Err(Error::NoSpace);
        }
        let mut start = self.data_start;
        'search: while start + n <= self.total_blocks {
            for i in 0..n {
                if self.bit(start + i) {
                    start += i + 1;
                    continue 'search;
                }
            }
            for i in 0..n {
                self.set_bit(start + i, true);
            }
            self.free_count -= n;
            return Ok(start);
        }
        Err(Error::NoSpace)
    }

    /// Marks `start..start+n` as allocated. Used by in-place tail extension (spec
    /// §4.5, §9) after the caller has verified the range is free under this lock.
    pub fn mark_used(&mut self, start: u64, n: u64) {
        for i in 0..n {
            if !self.bit(start + i) {
                self.set_bit(start + i, true);
                self.free_count -= 1;
            }
        }
    }

    /// Frees block `idx`. Freeing an already-free or reserved block is a no-op.
    pub fn free_one(&mut self, idx: u64) {
        if idx < self.data_start || idx >= self.total_blocks {
            return;
        }
        if self.bit(idx) {
            self.set_bit(idx, false);
            self.free_count += 1;
        }
    }

    /// Frees `start..start+n`, ignoring any blocks in that range which fall within the
    /// reserved region or are already free.
    pub fn free_contiguous(&mut self, start: u64, n: u64) {
        for i in 0..n {
            self.free_one(start + i);
        }
    }

    /// Returns whether `start..start+n` are all currently free (used to verify a
    /// tail-extension candidate range before calling [`Self::mark_used`]).
    pub fn is_range_free(&self, start: u64, n: u64) -> bool {
        (0..n).all(|i| !self.bit(start + i))
    }
}
