//! Fixed-size block I/O over a backing file (spec §4.1, C1).

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

/// The fixed block size used by the filesystem: 4 KiB.
pub const BLOCK_SIZE: usize = 4096;

/// ioctl macro: command, mirrors `utils::disk`'s `ior!` helper.
macro_rules! ioc {
    ($a:expr, $b:expr, $c:expr, $d:expr) => {
        (($a) << 30) | (($b) << 8) | ($c) | (($d) << 16)
    };
}
macro_rules! ior {
    ($b:expr, $c:ty) => {
        ioc!(2i64, $b, 0x12i64, std::mem::size_of::<$c>() as i64)
    };
}
/// ioctl command: get the size of a block device in bytes.
const BLKGETSIZE64: i64 = ior!(114i64, u64);

/// Returns the number of bytes backing `file`, following real block/char devices via
/// `BLKGETSIZE64` the way `utils::disk::get_disk_size` does, and falling back to
/// `File::metadata` for a plain regular file.
fn device_len(file: &File) -> io::Result<u64> {
    let metadata = file.metadata()?;
    let file_type = metadata.file_type();
    if file_type.is_block_device() || file_type.is_char_device() {
        let mut size: u64 = 0;
        let ret = unsafe { libc::ioctl(std::os::fd::AsRawFd::as_raw_fd(file), BLKGETSIZE64 as _, &mut size) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(size)
    } else {
        Ok(metadata.len())
    }
}

/// Fixed-size block I/O over a single host file.
pub struct BlockDevice {
    file: File,
    block_size: usize,
    total_blocks: u64,
}

impl BlockDevice {
    /// Creates a new backing file at `path`, zero-filling it to `total_blocks * block_size`
    /// bytes, then reopens it read/write.
    pub fn create(path: &Path, total_blocks: u64, block_size: usize) -> Result<Self> {
        let size_bytes = total_blocks * block_size as u64;
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)?;
            file.set_len(size_bytes)?;
            // Zero-fill a block at a time rather than one giant buffer, mirroring
            // `mkfs::ext2::fill_bitmap`'s block-sized writes.
            let zero = vec![0u8; block_size];
            let mut f = &file;
            f.seek(SeekFrom::Start(0))?;
            for _ in 0..total_blocks {
                f.write_all(&zero)?;
            }
            f.flush()?;
        }
        Self::open(path)
    }

    /// Opens an existing backing file, deriving `total_blocks` from its size.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = device_len(&file)?;
        let block_size = BLOCK_SIZE;
        if len % block_size as u64 != 0 {
            return Err(Error::Corruption(
                "backing file size is not a multiple of the block size",
            ));
        }
        Ok(Self {
            file,
            block_size,
            total_blocks: len / block_size as u64,
        })
    }

    /// The configured block size in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The total number of addressable blocks.
    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    fn check_index(&self, idx: u64) -> Result<()> {
        if idx >= self.total_blocks {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block index {idx} out of range (0..{})", self.total_blocks),
            )));
        }
        Ok(())
    }

    /// Reads block `idx` into `buf`. `buf` must be exactly `block_size` bytes.
    pub fn read_block(&mut self, idx: u64, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.block_size);
        self.check_index(idx)?;
        self.file.seek(SeekFrom::Start(idx * self.block_size as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes `buf` (exactly `block_size` bytes) to block `idx`, flushing afterwards.
    pub fn write_block(&mut self, idx: u64, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.block_size);
        self.check_index(idx)?;
        self.file.seek(SeekFrom::Start(idx * self.block_size as u64))?;
        self.file.write_all(buf)?;
        self.file.flush()?;
        Ok(())
    }

    /// Byte-exact contiguous copy of `count` blocks from `src` to `dst`, one
    /// read-then-write per block, per spec §4.1.
    pub fn copy_blocks(&mut self, src: u64, dst: u64, count: u64) -> Result<()> {
        let mut buf = vec![0u8; self.block_size];
        for i in 0..count {
            self.read_block(src + i, &mut buf)?;
            self.write_block(dst + i, &buf)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::env;
    use std::fs;

    struct TempPath(std::path::PathBuf);
    impl Drop for TempPath {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.0);
        }
    }
    fn temp_path(name: &str) -> TempPath {
        let mut p = env::temp_dir();
        p.push(format!("edufs-test-{name}-{}", std::process::id()));
        TempPath(p)
    }

    #[test]
    fn create_sizes_file_correctly() {
        let p = temp_path("create-size");
        let dev = BlockDevice::create(&p.0, 16, BLOCK_SIZE).unwrap();
        assert_eq!(dev.total_blocks(), 16);
        assert_eq!(fs::metadata(&p.0).unwrap().len(), 16 * BLOCK_SIZE as u64);
    }

    #[test]
    fn write_then_read_roundtrip() {
        let p = temp_path("rw-roundtrip");
        let mut dev = BlockDevice::create(&p.0, 4, BLOCK_SIZE).unwrap();
        let mut data = vec![0u8; BLOCK_SIZE];
        data[0] = 0xAB;
        data[BLOCK_SIZE - 1] = 0xCD;
        dev.write_block(2, &data).unwrap();
        let mut buf = vec![0u8; BLOCK_SIZE];
        dev.read_block(2, &mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn out_of_range_index_errors() {
        let p = temp_path("oob");
        let mut dev = BlockDevice::create(&p.0, 2, BLOCK_SIZE).unwrap();
        let mut buf = vec![0u8; BLOCK_SIZE];
        assert!(dev.read_block(2, &mut buf).is_err());
        assert!(dev.write_block(5, &buf).is_err());
    }

    #[test]
    fn copy_blocks_is_byte_exact() {
        let p = temp_path("copy");
        let mut dev = BlockDevice::create(&p.0, 8, BLOCK_SIZE).unwrap();
        let mut data = vec![0u8; BLOCK_SIZE];
        data.fill(0x42);
        dev.write_block(0, &data).unwrap();
        dev.copy_blocks(0, 4, 2).unwrap();
        let mut buf = vec![0u8; BLOCK_SIZE];
        dev.read_block(4, &mut buf).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn open_rejects_misaligned_size() {
        let p = temp_path("misaligned");
        fs::write(&p.0, vec![0u8; BLOCK_SIZE + 10]).unwrap();
        assert!(BlockDevice::open(&p.0).is_err());
    }
}
