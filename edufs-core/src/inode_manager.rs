//! Inode table, path resolution, and directory/file operations (spec §4.5, C5).

use crate::bitmap::Bitmap;
use crate::cache::Cache;
use crate::dir::{DirError, DirectoryPage};
use crate::error::{Error, Result};
use crate::inode::{FileType, Inode, INODE_SIZE};
use crate::layout::Layout;
use crate::util::{ceil_division, timestamp};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The root directory always occupies inode id 1.
pub const ROOT_ID: u32 = 1;

/// Illegal characters in a file/directory name, per spec §4.5.
const ILLEGAL_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// A read-only snapshot of an inode's metadata, for the `stat` CLI command.
#[derive(Debug, Clone)]
pub struct Stat {
    pub id: u32,
    pub kind: FileType,
    pub size: u32,
    pub block_count: u32,
    pub parent_id: u32,
    pub create_time: u64,
    pub modify_time: u64,
    pub name: String,
}

impl From<&Inode> for Stat {
    fn from(i: &Inode) -> Self {
        Self {
            id: i.id,
            kind: i.kind,
            size: i.size,
            block_count: i.block_count,
            parent_id: i.parent_id,
            create_time: i.create_time,
            modify_time: i.modify_time,
            name: i.name.clone(),
        }
    }
}

/// Maps a directory-page mutation error onto the facade's error kinds. `Full` means
/// the parent's data block has no room left for another entry — there is no
/// dedicated error kind for that in spec §7, so it is reported as `NoSpace`
/// (allocation of a directory-page slot failed), the same way bitmap exhaustion is.
/// `Duplicate`/`NameTooLong` can't actually occur here (both are checked before
/// `add` is called), but are mapped for completeness.
fn dir_error_to_error(e: DirError) -> Error {
    match e {
        DirError::Full => Error::NoSpace,
        DirError::Duplicate => Error::Exists,
        DirError::NameTooLong => Error::InvalidName,
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 63 {
        return Err(Error::InvalidName);
    }
    if name.contains('\0') || name.chars().any(|c| ILLEGAL_CHARS.contains(&c)) {
        return Err(Error::InvalidName);
    }
    Ok(())
}

/// Inode table, directory cache, and the operations layered over them.
pub struct InodeManager {
    cache: Arc<Cache>,
    layout: Layout,
    /// `used[id]` tells whether inode table slot `id` is occupied. Index 0 is unused.
    used: Mutex<Vec<bool>>,
    /// Write-through cache of directory pages keyed by inode id.
    dir_cache: Mutex<HashMap<u32, DirectoryPage>>,
    /// One lock per inode id, serializing mutations to that inode's content and size.
    inode_locks: Vec<Mutex<()>>,
}

impl InodeManager {
    /// Reconstructs the in-memory `used` vector by scanning the on-disk table, per
    /// spec §9 ("prior code persists the used-inodes vector only implicitly").
    pub fn load(cache: Arc<Cache>, layout: Layout) -> Result<Self> {
        let capacity = layout.inode_capacity as usize;
        let mut used = vec![false; capacity + 1];
        let mgr = Self {
            cache,
            layout,
            used: Mutex::new(Vec::new()),
            dir_cache: Mutex::new(HashMap::new()),
            inode_locks: (0..=capacity).map(|_| Mutex::new(())).collect(),
        };
        for id in 1..=capacity as u32 {
            let inode = mgr.read_inode_record(id)?;
            if inode.is_allocated() {
                used[id as usize] = true;
            }
        }
        *mgr.used.lock().unwrap() = used;
        Ok(mgr)
    }

    /// Zeroes the whole inode table region. Used by `format`.
    pub fn format(cache: &Cache, layout: &Layout) -> Result<()> {
        let zero = vec![0u8; layout.block_size];
        for b in 0..layout.table_blocks {
            cache.write_block(layout.bitmap_blocks + b, &zero)?;
        }
        Ok(())
    }

    /// Creates the root directory (inode 1, self-linked `.`/`..`) if it is not yet
    /// present, per spec §4.6 mount contract.
    pub fn ensure_root(&self, bitmap: &Mutex<Bitmap>) -> Result<()> {
        if self.read_inode_record(ROOT_ID)?.is_allocated() {
            return Ok(());
        }
        let start_block = bitmap.lock().unwrap().allocate_contiguous(1)?;
        let now = timestamp();
        let mut page = DirectoryPage::new(self.layout.block_size);
        page.add(".", ROOT_ID, FileType::Directory).unwrap();
        page.add("..", ROOT_ID, FileType::Directory).unwrap();
        let bytes = page.serialize();
        self.cache.write_block(start_block as u64, &bytes)?;
        let inode = Inode {
            id: ROOT_ID,
            kind: FileType::Directory,
            size: bytes.len() as u32,
            start_block: start_block as u32,
            block_count: 1,
            parent_id: ROOT_ID,
            create_time: now,
            modify_time: now,
            name: "/".to_owned(),
        };
        self.write_inode_record(ROOT_ID, &inode)?;
        self.used.lock().unwrap()[ROOT_ID as usize] = true;
        self.dir_cache.lock().unwrap().insert(ROOT_ID, page);
        Ok(())
    }

    fn with_inode_lock<F, R>(&self, id: u32, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = self.inode_locks[id as usize].lock().unwrap();
        f()
    }

    /// Reads inode `id`'s on-disk record directly (bypassing the `used` vector, so it
    /// can be used to reconstruct that vector at load time).
    pub fn read_inode_record(&self, id: u32) -> Result<Inode> {
        let (block, offset) = self.layout.inode_location(id);
        let mut buf = vec![0u8; self.layout.block_size];
        self.cache.read_block(block, &mut buf)?;
        Inode::decode(&buf[offset..offset + INODE_SIZE])
            .ok_or(Error::Corruption("invalid inode type byte"))
    }

    fn write_inode_record(&self, id: u32, inode: &Inode) -> Result<()> {
        let (block, offset) = self.layout.inode_location(id);
        let mut buf = vec![0u8; self.layout.block_size];
        self.cache.read_block(block, &mut buf)?;
        buf[offset..offset + INODE_SIZE].copy_from_slice(&inode.encode());
        self.cache.write_block(block, &buf)
    }

    fn clear_inode_record(&self, id: u32) -> Result<()> {
        let (block, offset) = self.layout.inode_location(id);
        let mut buf = vec![0u8; self.layout.block_size];
        self.cache.read_block(block, &mut buf)?;
        buf[offset..offset + INODE_SIZE].copy_from_slice(&[0u8; INODE_SIZE]);
        self.cache.write_block(block, &buf)
    }

    fn alloc_slot(&self) -> Result<u32> {
        let mut used = self.used.lock().unwrap();
        for id in 1..used.len() as u32 {
            if !used[id as usize] {
                used[id as usize] = true;
                return Ok(id);
            }
        }
        Err(Error::NoInodes)
    }

    fn free_slot(&self, id: u32) {
        self.used.lock().unwrap()[id as usize] = false;
    }

    /// Total inode table capacity.
    pub fn total_inodes(&self) -> u32 {
        self.layout.inode_capacity
    }

    /// Number of currently-allocated inode slots.
    pub fn used_inodes(&self) -> u32 {
        self.used.lock().unwrap().iter().filter(|&&b| b).count() as u32
    }

    /// Number of free inode table slots.
    pub fn free_inodes(&self) -> u32 {
        self.total_inodes() - self.used_inodes()
    }

    /// Loads directory `id`'s page through the write-through directory cache.
    fn load_dir(&self, id: u32) -> Result<DirectoryPage> {
        if let Some(page) = self.dir_cache.lock().unwrap().get(&id) {
            return Ok(page.clone());
        }
        let inode = self.read_inode_record(id)?;
        if !inode.is_dir() {
            return Err(Error::WrongType);
        }
        let mut buf = vec![0u8; self.layout.block_size];
        self.cache.read_block(inode.start_block as u64, &mut buf)?;
        let page = DirectoryPage::deserialize(&buf, self.layout.block_size);
        self.dir_cache.lock().unwrap().insert(id, page.clone());
        Ok(page)
    }

    /// Writes directory `id`'s page through the cache and refreshes the directory
    /// cache entry (write-through, per spec §4.5's coherence rule).
    fn save_dir(&self, id: u32, page: &DirectoryPage) -> Result<()> {
        let inode = self.read_inode_record(id)?;
        self.cache
            .write_block(inode.start_block as u64, &page.serialize())?;
        self.dir_cache.lock().unwrap().insert(id, page.clone());
        Ok(())
    }

    fn get_dir_inode(&self, id: u32) -> Result<Inode> {
        let inode = self.read_inode_record(id)?;
        if !inode.is_allocated() {
            return Err(Error::NotFound);
        }
        if !inode.is_dir() {
            return Err(Error::WrongType);
        }
        Ok(inode)
    }

    /// Resolves a normalized absolute path (starting with `/`) to an inode id.
    pub fn resolve(&self, path: &str) -> Result<u32> {
        debug_assert!(path.starts_with('/'));
        let mut current = ROOT_ID;
        for segment in path.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            }
            if segment == ".." {
                let page = self.load_dir(current)?;
                current = page
                    .find("..")
                    .map(|e| e.inode_id)
                    .unwrap_or(ROOT_ID);
                continue;
            }
            let page = self.load_dir(current)?;
            let entry = page.find(segment).ok_or(Error::NotFound)?;
            current = entry.inode_id;
        }
        Ok(current)
    }

    /// Returns a read-only metadata snapshot for `id`.
    pub fn stat(&self, id: u32) -> Result<Stat> {
        let inode = self.read_inode_record(id)?;
        if !inode.is_allocated() {
            return Err(Error::NotFound);
        }
        Ok(Stat::from(&inode))
    }

    /// Lists the entries of directory `id`.
    pub fn list_dir(&self, id: u32) -> Result<Vec<crate::dir::DirEntry>> {
        self.get_dir_inode(id)?;
        Ok(self.load_dir(id)?.list().to_vec())
    }

    /// Creates a new, empty-content file `name` inside directory `parent_id`.
    pub fn create_file(
        &self,
        bitmap: &Mutex<Bitmap>,
        parent_id: u32,
        name: &str,
        initial_content: &[u8],
    ) -> Result<u32> {
        validate_name(name)?;
        self.get_dir_inode(parent_id)?;
        let mut parent_page = self.load_dir(parent_id)?;
        if parent_page.find(name).is_some() {
            return Err(Error::Exists);
        }

        let id = self.alloc_slot()?;
        let block_count = ceil_division(initial_content.len().max(1) as u64, self.layout.block_size as u64) as u32;
        let start_block = match bitmap.lock().unwrap().allocate_contiguous(block_count as u64) {
            Ok(b) => b,
            Err(e) => {
                self.free_slot(id);
                return Err(e);
            }
        };

        let write_result: Result<()> = (|| {
            let now = timestamp();
            let inode = Inode {
                id,
                kind: FileType::File,
                size: initial_content.len() as u32,
                start_block: start_block as u32,
                block_count,
                parent_id,
                create_time: now,
                modify_time: now,
                name: name.to_owned(),
            };
            self.write_blocks(start_block, block_count, initial_content)?;
            self.write_inode_record(id, &inode)?;
            parent_page
                .add(name, id, FileType::File)
                .map_err(dir_error_to_error)?;
            self.save_dir(parent_id, &parent_page)?;
            Ok(())
        })();

        if let Err(e) = write_result {
            bitmap
                .lock()
                .unwrap()
                .free_contiguous(start_block, block_count as u64);
            let _ = self.clear_inode_record(id);
            self.free_slot(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Creates a new, empty directory `name` inside directory `parent_id`.
    pub fn create_directory(&self, bitmap: &Mutex<Bitmap>, parent_id: u32, name: &str) -> Result<u32> {
        validate_name(name)?;
        self.get_dir_inode(parent_id)?;
        let mut parent_page = self.load_dir(parent_id)?;
        if parent_page.find(name).is_some() {
            return Err(Error::Exists);
        }

        let id = self.alloc_slot()?;
        let start_block = match bitmap.lock().unwrap().allocate_contiguous(1) {
            Ok(b) => b,
            Err(e) => {
                self.free_slot(id);
                return Err(e);
            }
        };

        let write_result: Result<()> = (|| {
            let now = timestamp();
            let mut page = DirectoryPage::new(self.layout.block_size);
            page.add(".", id, FileType::Directory).unwrap();
            page.add("..", parent_id, FileType::Directory).unwrap();
            let bytes = page.serialize();
            self.cache.write_block(start_block, &bytes)?;
            let inode = Inode {
                id,
                kind: FileType::Directory,
                size: bytes.len() as u32,
                start_block: start_block as u32,
                block_count: 1,
                parent_id,
                create_time: now,
                modify_time: now,
                name: name.to_owned(),
            };
            self.write_inode_record(id, &inode)?;
            self.dir_cache.lock().unwrap().insert(id, page);
            parent_page
                .add(name, id, FileType::Directory)
                .map_err(dir_error_to_error)?;
            self.save_dir(parent_id, &parent_page)?;
            Ok(())
        })();

        if let Err(e) = write_result {
            bitmap.lock().unwrap().free_contiguous(start_block, 1);
            let _ = self.clear_inode_record(id);
            self.free_slot(id);
            self.dir_cache.lock().unwrap().remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Copies `count` blocks from `src` to `dst` through the cache, for relocate-grow.
    fn relocate_blocks(&self, src: u64, dst: u64, count: u64) -> Result<()> {
        let mut buf = vec![0u8; self.layout.block_size];
        for i in 0..count {
            self.cache.read_block(src + i, &mut buf)?;
            self.cache.write_block(dst + i, &buf)?;
        }
        Ok(())
    }

    fn write_blocks(&self, start_block: u64, block_count: u32, content: &[u8]) -> Result<()> {
        let block_size = self.layout.block_size;
        for b in 0..block_count as u64 {
            let mut buf = vec![0u8; block_size];
            let off = (b as usize) * block_size;
            if off < content.len() {
                let end = (off + block_size).min(content.len());
                buf[..end - off].copy_from_slice(&content[off..end]);
            }
            self.cache.write_block(start_block + b, &buf)?;
        }
        Ok(())
    }

    /// Resizes inode `id`'s contiguous extent to hold `new_size` bytes, relocating
    /// the extent if it cannot be extended in place (spec §4.5, §9).
    pub fn resize(&self, bitmap: &Mutex<Bitmap>, id: u32, new_size: u32) -> Result<()> {
        self.with_inode_lock(id, || self.resize_locked(bitmap, id, new_size))
    }

    /// Body of [`Self::resize`], assuming `id`'s inode lock is already held by the
    /// caller. Used by `write_file` so the resize and the subsequent block write
    /// happen under a single lock acquisition instead of two (spec §5: concurrent
    /// operations on the same inode must be linearizable under its lock).
    fn resize_locked(&self, bitmap: &Mutex<Bitmap>, id: u32, new_size: u32) -> Result<()> {
        let mut inode = self.read_inode_record(id)?;
        let new_block_count = ceil_division(new_size as u64, self.layout.block_size as u64).max(1) as u32;

        if new_block_count == inode.block_count {
            inode.size = new_size;
            inode.modify_time = timestamp();
            return self.write_inode_record(id, &inode);
        }

        if new_block_count > inode.block_count {
            let extra = (new_block_count - inode.block_count) as u64;
            let tail_start = inode.start_block as u64 + inode.block_count as u64;
            let mut bm = bitmap.lock().unwrap();
            if bm.is_range_free(tail_start, extra) {
                bm.mark_used(tail_start, extra);
                drop(bm);
                inode.block_count = new_block_count;
                inode.size = new_size;
                inode.modify_time = timestamp();
                return self.write_inode_record(id, &inode);
            }
            let new_start = bm.allocate_contiguous(new_block_count as u64)?;
            drop(bm);
            self.relocate_blocks(inode.start_block as u64, new_start, inode.block_count as u64)?;
            bitmap
                .lock()
                .unwrap()
                .free_contiguous(inode.start_block as u64, inode.block_count as u64);
            inode.start_block = new_start as u32;
            inode.block_count = new_block_count;
            inode.size = new_size;
            inode.modify_time = timestamp();
            return self.write_inode_record(id, &inode);
        }

        // Shrinking: free the tail blocks beyond the new count.
        let freed_start = inode.start_block as u64 + new_block_count as u64;
        let freed_count = (inode.block_count - new_block_count) as u64;
        bitmap.lock().unwrap().free_contiguous(freed_start, freed_count);
        inode.block_count = new_block_count;
        inode.size = new_size;
        inode.modify_time = timestamp();
        self.write_inode_record(id, &inode)
    }

    /// Reads the first `size` bytes of inode `id`'s content.
    pub fn read_file(&self, id: u32) -> Result<Vec<u8>> {
        self.with_inode_lock(id, || {
            let inode = self.read_inode_record(id)?;
            if !inode.is_file() {
                return Err(Error::WrongType);
            }
            let mut out = Vec::with_capacity(inode.size as usize);
            let mut buf = vec![0u8; self.layout.block_size];
            for b in 0..inode.block_count as u64 {
                self.cache.read_block(inode.start_block as u64 + b, &mut buf)?;
                out.extend_from_slice(&buf);
            }
            out.truncate(inode.size as usize);
            Ok(out)
        })
    }

    /// Replaces inode `id`'s content with `content`, resizing as needed. The resize
    /// and the block write happen under one acquisition of `id`'s inode lock, so a
    /// concurrent `write_file` on the same inode cannot interleave its own resize
    /// between this call's resize and its block write (spec §5).
    pub fn write_file(&self, bitmap: &Mutex<Bitmap>, id: u32, content: &[u8]) -> Result<()> {
        self.with_inode_lock(id, || {
            let inode = self.read_inode_record(id)?;
            if !inode.is_file() {
                return Err(Error::WrongType);
            }
            self.resize_locked(bitmap, id, content.len() as u32)?;
            let inode = self.read_inode_record(id)?;
            self.write_blocks(inode.start_block as u64, inode.block_count, content)
        })
    }

    /// Removes file `name` from directory `parent_id`, freeing its extent and slot.
    pub fn delete_file(&self, bitmap: &Mutex<Bitmap>, parent_id: u32, name: &str) -> Result<()> {
        let mut parent_page = self.load_dir(parent_id)?;
        let entry = parent_page.find(name).ok_or(Error::NotFound)?.clone();
        let inode = self.read_inode_record(entry.inode_id)?;
        if !inode.is_file() {
            return Err(Error::WrongType);
        }
        bitmap
            .lock()
            .unwrap()
            .free_contiguous(inode.start_block as u64, inode.block_count as u64);
        self.clear_inode_record(entry.inode_id)?;
        self.free_slot(entry.inode_id);
        parent_page.remove(name);
        self.save_dir(parent_id, &parent_page)
    }

    /// Recursively deletes directory `name` from `parent_id`. The root cannot be
    /// deleted (it is never reachable as a named child of itself under a non-`..`
    /// name, so this is enforced by path resolution never producing such a call).
    pub fn delete_directory(&self, bitmap: &Mutex<Bitmap>, parent_id: u32, name: &str) -> Result<()> {
        let mut parent_page = self.load_dir(parent_id)?;
        let entry = parent_page.find(name).ok_or(Error::NotFound)?.clone();
        let dir_id = entry.inode_id;
        if dir_id == ROOT_ID {
            return Err(Error::InvalidName);
        }
        let inode = self.read_inode_record(dir_id)?;
        if !inode.is_dir() {
            return Err(Error::WrongType);
        }

        let children: Vec<_> = self
            .load_dir(dir_id)?
            .list()
            .iter()
            .filter(|e| e.name != "." && e.name != "..")
            .cloned()
            .collect();
        for child in children {
            match child.kind {
                FileType::File => self.delete_file(bitmap, dir_id, &child.name)?,
                FileType::Directory => self.delete_directory(bitmap, dir_id, &child.name)?,
            }
        }

        bitmap.lock().unwrap().free_contiguous(inode.start_block as u64, 1);
        self.clear_inode_record(dir_id)?;
        self.free_slot(dir_id);
        self.dir_cache.lock().unwrap().remove(&dir_id);
        parent_page.remove(name);
        self.save_dir(parent_id, &parent_page)
    }
}
