//! Mount/format lifecycle, CWD, open-file refcounts, and high-level operations (spec §4.6, C6).

use crate::bitmap::Bitmap;
use crate::block_device::{BlockDevice, BLOCK_SIZE};
use crate::cache::{Cache, DEFAULT_CAPACITY};
use crate::dir::DirEntry;
use crate::error::{Error, Result};
use crate::inode_manager::{InodeManager, Stat, ROOT_ID};
use crate::layout::{Layout, DEFAULT_TOTAL_BLOCKS};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

/// Parameters for [`Filesystem::format`]. Mirrors `Ext2Factory`'s defaulted-field
/// shape in the teacher's `mkfs/src/ext2.rs`, generalized to a caller-constructible
/// struct rather than one only filled in from CLI flags.
#[derive(Debug, Clone, Copy)]
pub struct FormatOptions {
    pub total_blocks: u64,
    pub block_size: usize,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            total_blocks: DEFAULT_TOTAL_BLOCKS,
            block_size: BLOCK_SIZE,
        }
    }
}

/// Parameters for [`Filesystem::mount`].
#[derive(Debug, Clone, Copy)]
pub struct MountOptions {
    pub cache_capacity: usize,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Aggregate space/inode usage report, for the `df` CLI command.
#[derive(Debug, Clone, Copy)]
pub struct DfReport {
    pub block_size: usize,
    pub total_blocks: u64,
    pub used_blocks: u64,
    pub free_blocks: u64,
    pub total_inodes: u32,
    pub used_inodes: u32,
    pub free_inodes: u32,
}

struct FsState {
    cwd: String,
    /// `normalized path -> open count`, per spec §4.6.
    open_files: HashMap<String, u32>,
}

/// The mounted filesystem: ties BlockDevice/Cache/Bitmap/InodeManager together and
/// exposes the high-level operations a CLI or other caller drives.
pub struct Filesystem {
    cache: Arc<Cache>,
    bitmap: Mutex<Bitmap>,
    inodes: InodeManager,
    layout: Layout,
    state: Mutex<FsState>,
    path: PathBuf,
}

/// Backing-file paths currently formatted-or-mounted by this process, guarding the
/// "format/mount require not-mounted" contract of spec §4.6. Keyed by the exact
/// `Path` a caller passed in, not a canonicalized form, so two different spellings
/// of the same file are not caught — a known, narrow limitation of a process-local
/// registry (see DESIGN.md).
fn mounted_paths() -> &'static Mutex<HashSet<PathBuf>> {
    static REGISTRY: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

fn split_path(normalized: &str) -> (String, String) {
    let trimmed = normalized.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => ("/".to_owned(), trimmed[1..].to_owned()),
        Some(pos) => (trimmed[..pos].to_owned(), trimmed[pos + 1..].to_owned()),
        None => ("/".to_owned(), trimmed.to_owned()),
    }
}

/// Joins `cwd` and `input` into a normalized absolute path per spec §4.6: `.`
/// segments dropped, `..` pops the stack (bounded at root), empty segments ignored.
pub fn normalize(cwd: &str, input: &str) -> String {
    let base = if input.starts_with('/') {
        String::new()
    } else {
        cwd.to_owned()
    };
    let mut stack: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
    for segment in input.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            s => stack.push(s),
        }
    }
    format!("/{}", stack.join("/"))
}

impl Filesystem {
    /// Creates a fresh backing file and writes an initialized, empty filesystem to
    /// it (bitmap with reserved bits set, zeroed inode table). Does not mount it.
    /// Fails with `Error::AlreadyMounted` if this process already has `path`
    /// formatted or mounted (spec §4.6: format requires not-mounted).
    pub fn format(path: &Path, opts: FormatOptions) -> Result<()> {
        {
            let registry = mounted_paths().lock().unwrap();
            if registry.contains(path) {
                return Err(Error::AlreadyMounted);
            }
        }
        let device = BlockDevice::create(path, opts.total_blocks, opts.block_size)?;
        let layout = Layout::derive(device.total_blocks(), device.block_size());
        let cache = Cache::new(device, DEFAULT_CAPACITY)?;
        let bitmap = Bitmap::initialize(layout.total_blocks, layout.block_size, layout.data_start);
        bitmap.save(&cache)?;
        InodeManager::format(&cache, &layout)?;
        cache.flush_all()
    }

    /// Opens an existing backing file and brings up the cache, bitmap, and inode
    /// manager over it, creating the root directory if this is its first mount.
    /// Fails with `Error::AlreadyMounted` if this process already has `path`
    /// mounted (spec §4.6: mount requires not-mounted) — two independent `Cache`
    /// instances over the same file would race on write-back with no coordination.
    pub fn mount(path: &Path, opts: MountOptions) -> Result<Arc<Self>> {
        if !mounted_paths().lock().unwrap().insert(path.to_path_buf()) {
            return Err(Error::AlreadyMounted);
        }
        let result = (|| {
            let device = BlockDevice::open(path)?;
            let layout = Layout::derive(device.total_blocks(), device.block_size());
            let cache = Arc::new(Cache::new(device, opts.cache_capacity)?);
            let bitmap = Bitmap::load(&cache, layout.total_blocks, layout.block_size, layout.data_start)?;
            let inodes = InodeManager::load(cache.clone(), layout)?;
            let bitmap = Mutex::new(bitmap);
            inodes.ensure_root(&bitmap)?;
            Ok(Arc::new(Self {
                cache,
                bitmap,
                inodes,
                layout,
                state: Mutex::new(FsState {
                    cwd: "/".to_owned(),
                    open_files: HashMap::new(),
                }),
                path: path.to_path_buf(),
            }))
        })();
        if result.is_err() {
            mounted_paths().lock().unwrap().remove(path);
        }
        result
    }

    /// Flushes the cache and persists the bitmap without tearing down in-memory
    /// state, for the `sync`/`cache` CLI interaction and property 8 (round-trip).
    pub fn sync(&self) -> Result<()> {
        self.cache.flush_all()?;
        self.bitmap.lock().unwrap().save(&self.cache)
    }

    /// Flushes the cache, persists the bitmap, clears open-file refcounts, and
    /// releases this path's entry in the mount registry. The caller drops the
    /// returned `Arc` to release the remaining in-memory state. Fails with
    /// `Error::NotMounted` if this handle was already unmounted.
    pub fn unmount(&self) -> Result<()> {
        if !mounted_paths().lock().unwrap().remove(&self.path) {
            return Err(Error::NotMounted);
        }
        self.sync()?;
        self.state.lock().unwrap().open_files.clear();
        Ok(())
    }

    /// Normalizes `input` against the current working directory.
    pub fn normalize(&self, input: &str) -> String {
        normalize(&self.state.lock().unwrap().cwd, input)
    }

    /// The current working directory.
    pub fn pwd(&self) -> String {
        self.state.lock().unwrap().cwd.clone()
    }

    /// Changes the current working directory to `path`, which must resolve to a
    /// directory.
    pub fn cd(&self, path: &str) -> Result<()> {
        let target = self.normalize(path);
        let id = self.inodes.resolve(&target)?;
        let stat = self.inodes.stat(id)?;
        if !matches!(stat.kind, crate::inode::FileType::Directory) {
            return Err(Error::WrongType);
        }
        self.state.lock().unwrap().cwd = target;
        Ok(())
    }

    fn is_busy(&self, path: &str) -> bool {
        let state = self.state.lock().unwrap();
        let prefix = format!("{path}/");
        state.open_files.iter().any(|(p, &count)| {
            count > 0 && (p == path || p.starts_with(&prefix))
        })
    }

    /// Increments `path`'s open-file refcount.
    pub fn open(&self, path: &str) {
        let target = self.normalize(path);
        *self.state.lock().unwrap().open_files.entry(target).or_insert(0) += 1;
    }

    /// Decrements `path`'s open-file refcount, removing the entry once it hits zero.
    pub fn close(&self, path: &str) {
        let target = self.normalize(path);
        let mut state = self.state.lock().unwrap();
        if let Some(count) = state.open_files.get_mut(&target) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.open_files.remove(&target);
            }
        }
    }

    /// Lists the entries of directory `path` (defaults to cwd when `None`).
    pub fn ls(&self, path: Option<&str>) -> Result<Vec<DirEntry>> {
        let target = self.normalize(path.unwrap_or("."));
        let id = self.inodes.resolve(&target)?;
        self.inodes.list_dir(id)
    }

    /// Metadata snapshot for `path`.
    pub fn stat(&self, path: &str) -> Result<Stat> {
        let target = self.normalize(path);
        let id = self.inodes.resolve(&target)?;
        self.inodes.stat(id)
    }

    /// Creates an empty file at `path`; a no-op (beyond bumping `modify_time`) if it
    /// already exists as a file.
    pub fn touch(&self, path: &str) -> Result<()> {
        let target = self.normalize(path);
        if self.is_busy(&target) {
            return Err(Error::Busy);
        }
        if let Ok(id) = self.inodes.resolve(&target) {
            let stat = self.inodes.stat(id)?;
            if !matches!(stat.kind, crate::inode::FileType::File) {
                return Err(Error::WrongType);
            }
            let content = self.inodes.read_file(id)?;
            return self.inodes.write_file(&self.bitmap, id, &content);
        }
        let (parent, name) = split_path(&target);
        let parent_id = self.inodes.resolve(&parent)?;
        self.inodes.create_file(&self.bitmap, parent_id, &name, &[])?;
        Ok(())
    }

    /// Reads the full content of file `path`.
    pub fn cat(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.normalize(path);
        let id = self.inodes.resolve(&target)?;
        self.open(&target);
        let result = self.inodes.read_file(id);
        self.close(&target);
        result
    }

    /// Overwrites file `path`'s content with `content`, creating it if absent.
    pub fn echo(&self, path: &str, content: &[u8]) -> Result<()> {
        let target = self.normalize(path);
        if self.is_busy(&target) {
            return Err(Error::Busy);
        }
        match self.inodes.resolve(&target) {
            Ok(id) => self.inodes.write_file(&self.bitmap, id, content),
            Err(Error::NotFound) => {
                let (parent, name) = split_path(&target);
                let parent_id = self.inodes.resolve(&parent)?;
                self.inodes.create_file(&self.bitmap, parent_id, &name, content)?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Removes file `path`.
    pub fn rm(&self, path: &str) -> Result<()> {
        let target = self.normalize(path);
        if self.is_busy(&target) {
            return Err(Error::Busy);
        }
        let (parent, name) = split_path(&target);
        let parent_id = self.inodes.resolve(&parent)?;
        self.inodes.delete_file(&self.bitmap, parent_id, &name)
    }

    /// Creates directory `path`.
    pub fn mkdir(&self, path: &str) -> Result<()> {
        let target = self.normalize(path);
        let (parent, name) = split_path(&target);
        let parent_id = self.inodes.resolve(&parent)?;
        self.inodes.create_directory(&self.bitmap, parent_id, &name)?;
        Ok(())
    }

    /// Removes directory `path`, refusing a non-empty directory.
    pub fn rmdir(&self, path: &str) -> Result<()> {
        let target = self.normalize(path);
        if self.is_busy(&target) {
            return Err(Error::Busy);
        }
        let id = self.inodes.resolve(&target)?;
        if id == ROOT_ID {
            return Err(Error::InvalidName);
        }
        let page_empty = self
            .inodes
            .list_dir(id)?
            .iter()
            .all(|e| e.name == "." || e.name == "..");
        if !page_empty {
            return Err(Error::NotEmpty);
        }
        let (parent, name) = split_path(&target);
        let parent_id = self.inodes.resolve(&parent)?;
        self.inodes.delete_directory(&self.bitmap, parent_id, &name)
    }

    /// Space and inode usage report.
    pub fn df(&self) -> DfReport {
        let bitmap = self.bitmap.lock().unwrap();
        DfReport {
            block_size: self.layout.block_size,
            total_blocks: self.layout.total_blocks,
            used_blocks: self.layout.total_blocks - bitmap.free_count(),
            free_blocks: bitmap.free_count(),
            total_inodes: self.inodes.total_inodes(),
            used_inodes: self.inodes.used_inodes(),
            free_inodes: self.inodes.free_inodes(),
        }
    }

    /// Cache occupancy: `(resident_count, dirty_count, capacity)`.
    pub fn cache_stats(&self) -> (usize, usize, usize) {
        self.cache.stats()
    }
}
