//! Core of `edufs`: a user-space filesystem backed by a single host file used as a
//! block device (spec §1–§7). See [`fs::Filesystem`] for the top-level facade.

pub mod bitmap;
pub mod block_device;
pub mod cache;
pub mod dir;
pub mod error;
pub mod fs;
pub mod inode;
pub mod inode_manager;
pub mod layout;
mod util;

pub use bitmap::Bitmap;
pub use block_device::{BlockDevice, BLOCK_SIZE};
pub use cache::Cache;
pub use dir::{DirEntry, DirectoryPage};
pub use error::{Error, Result};
pub use fs::{DfReport, Filesystem, FormatOptions, MountOptions};
pub use inode::{FileType, Inode};
pub use inode_manager::{InodeManager, Stat};
pub use layout::Layout;
