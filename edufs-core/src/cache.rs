//! Fixed-capacity block cache with FIFO eviction and write-back (spec §4.3, C3).
//!
//! The cache is the sole owner of block buffers during steady-state operation (spec
//! §4): every other component reaches the backing file only through it. Concurrent
//! access is governed by a single `RwLock` around the frame table: reads take the
//! read lock and only promote to the write lock on a miss, rechecking residency
//! after the promotion (spec §5, §9) so that two readers racing on the same missing
//! block cannot both load it.

use crate::block_device::BlockDevice;
use crate::error::Result;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

/// Default cache capacity in frames.
pub const DEFAULT_CAPACITY: usize = 16;

struct Frame {
    block_idx: Option<u64>,
    dirty: bool,
    data: Vec<u8>,
}

struct CacheInner {
    device: BlockDevice,
    frames: Vec<Frame>,
    /// FIFO eviction order: front is the next victim.
    queue: VecDeque<usize>,
    /// `block_idx -> frame_idx` for O(1) residency lookups.
    index: HashMap<u64, usize>,
}

impl CacheInner {
    /// Returns the lowest-index frame currently holding no block, if any.
    fn find_empty_frame(&self) -> Option<usize> {
        self.frames.iter().position(|f| f.block_idx.is_none())
    }

    /// Evicts the FIFO head, writing it back if dirty, and returns its now-empty
    /// frame index.
    fn evict_one(&mut self) -> Result<usize> {
        let victim = self.queue.pop_front().expect("cache has no frames to evict");
        if self.frames[victim].dirty {
            let idx = self.frames[victim].block_idx.expect("dirty frame must be resident");
            let data = self.frames[victim].data.clone();
            self.device.write_block(idx, &data)?;
        }
        if let Some(idx) = self.frames[victim].block_idx.take() {
            self.index.remove(&idx);
        }
        self.frames[victim].dirty = false;
        Ok(victim)
    }

    /// Returns an empty frame, evicting the FIFO victim if none is free.
    fn get_free_frame(&mut self) -> Result<usize> {
        if let Some(idx) = self.find_empty_frame() {
            return Ok(idx);
        }
        self.evict_one()
    }
}

/// Fixed-capacity page cache over a [`BlockDevice`].
pub struct Cache {
    inner: RwLock<CacheInner>,
    block_size: usize,
}

impl Cache {
    /// Builds a cache with `capacity` frames over `device`. `capacity` must be non-zero.
    pub fn new(device: BlockDevice, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(crate::error::Error::Corruption(
                "cache capacity must be non-zero",
            ));
        }
        let block_size = device.block_size();
        let frames = (0..capacity)
            .map(|_| Frame {
                block_idx: None,
                dirty: false,
                data: vec![0u8; block_size],
            })
            .collect();
        Ok(Self {
            inner: RwLock::new(CacheInner {
                device,
                frames,
                queue: VecDeque::with_capacity(capacity),
                index: HashMap::with_capacity(capacity),
            }),
            block_size,
        })
    }

    /// The block size shared with the underlying device.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The total number of blocks on the underlying device.
    pub fn total_blocks(&self) -> u64 {
        self.inner.read().unwrap().device.total_blocks()
    }

    /// `(resident_count, dirty_count, capacity)`, for the `cache` CLI command.
    pub fn stats(&self) -> (usize, usize, usize) {
        let inner = self.inner.read().unwrap();
        let resident = inner.frames.iter().filter(|f| f.block_idx.is_some()).count();
        let dirty = inner.frames.iter().filter(|f| f.dirty).count();
        (resident, dirty, inner.frames.len())
    }

    /// Reads block `idx` into `buf` (exactly `block_size` bytes), loading it from the
    /// device on a miss.
    pub fn read_block(&self, idx: u64, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.block_size);
        {
            let inner = self.inner.read().unwrap();
            if let Some(&frame_idx) = inner.index.get(&idx) {
                buf.copy_from_slice(&inner.frames[frame_idx].data);
                return Ok(());
            }
        }
        // Miss: promote to a write lock and recheck residency before loading, since
        // another thread may have loaded `idx` between the two lock acquisitions.
        let mut inner = self.inner.write().unwrap();
        if let Some(&frame_idx) = inner.index.get(&idx) {
            buf.copy_from_slice(&inner.frames[frame_idx].data);
            return Ok(());
        }
        let frame_idx = inner.get_free_frame()?;
        inner.device.read_block(idx, buf)?;
        inner.frames[frame_idx].data.copy_from_slice(buf);
        inner.frames[frame_idx].block_idx = Some(idx);
        inner.frames[frame_idx].dirty = false;
        inner.index.insert(idx, frame_idx);
        inner.queue.push_back(frame_idx);
        Ok(())
    }

    /// Overwrites block `idx` with `buf`, marking it dirty. On a miss, the existing
    /// block content is fetched from the device first so a partial-block write
    /// preserves the rest of the block, per spec §4.3.
    pub fn write_block(&self, idx: u64, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.block_size);
        let mut inner = self.inner.write().unwrap();
        if let Some(&frame_idx) = inner.index.get(&idx) {
            inner.frames[frame_idx].data.copy_from_slice(buf);
            inner.frames[frame_idx].dirty = true;
            return Ok(());
        }
        let frame_idx = inner.get_free_frame()?;
        let mut data = vec![0u8; self.block_size];
        inner.device.read_block(idx, &mut data)?;
        data.copy_from_slice(buf);
        inner.frames[frame_idx].data = data;
        inner.frames[frame_idx].block_idx = Some(idx);
        inner.frames[frame_idx].dirty = true;
        inner.index.insert(idx, frame_idx);
        inner.queue.push_back(frame_idx);
        Ok(())
    }

    /// Writes back every dirty frame and clears their dirty bits.
    pub fn flush_all(&self) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        for frame_idx in 0..inner.frames.len() {
            if inner.frames[frame_idx].dirty {
                let block_idx = inner.frames[frame_idx]
                    .block_idx
                    .expect("dirty frame must be resident");
                let data = inner.frames[frame_idx].data.clone();
                inner.device.write_block(block_idx, &data)?;
                inner.frames[frame_idx].dirty = false;
            }
        }
        Ok(())
    }

    /// Whether block `idx` is currently resident in a frame.
    pub fn is_resident(&self, idx: u64) -> bool {
        self.inner.read().unwrap().index.contains_key(&idx)
    }
}
