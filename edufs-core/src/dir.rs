//! In-memory representation of a directory block (spec §4.4, C4).

use crate::inode::FileType;
use crate::util::{pack_name, unpack_name};

/// Size in bytes of one packed directory entry: `u32 inode_id + u8 type + u8 name_len
/// + [u8; 64] name`.
const ENTRY_SIZE: usize = 4 + 1 + 1 + 64;
/// Size of the `u32` entry-count header.
const HEADER_SIZE: usize = 4;

/// One `(name, inode_id, type)` row of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub inode_id: u32,
    pub kind: FileType,
}

/// Errors specific to directory-page mutation.
#[derive(Debug, PartialEq, Eq)]
pub enum DirError {
    Duplicate,
    NameTooLong,
    Full,
}

/// A directory's data block: a list of entries with a fixed-width serialization.
///
/// A page always belongs to a particular `block_size`, since the number of entries
/// that fit in one block (and therefore the point at which `add` must start
/// returning [`DirError::Full`]) depends on it.
#[derive(Debug, Clone)]
pub struct DirectoryPage {
    entries: Vec<DirEntry>,
    block_size: usize,
}

impl DirectoryPage {
    pub fn new(block_size: usize) -> Self {
        Self { entries: Vec::new(), block_size }
    }

    /// Maximum number of entries that fit in one `block_size`-byte block: the header
    /// plus that many fixed-width entries must not exceed the block.
    pub fn max_entries(block_size: usize) -> usize {
        (block_size - HEADER_SIZE) / ENTRY_SIZE
    }

    /// Adds `name -> (id, type)`. Rejects duplicate names, names longer than 63
    /// bytes, or a page that would overflow its block.
    pub fn add(&mut self, name: &str, id: u32, kind: FileType) -> Result<(), DirError> {
        if name.len() > 63 {
            return Err(DirError::NameTooLong);
        }
        if self.entries.len() >= Self::max_entries(self.block_size) {
            return Err(DirError::Full);
        }
        if self.find(name).is_some() {
            return Err(DirError::Duplicate);
        }
        self.entries.push(DirEntry {
            name: name.to_owned(),
            inode_id: id,
            kind,
        });
        Ok(())
    }

    /// Removes the entry named `name`, if present.
    pub fn remove(&mut self, name: &str) -> Option<DirEntry> {
        let pos = self.entries.iter().position(|e| e.name == name)?;
        Some(self.entries.remove(pos))
    }

    /// Finds the entry named `name`.
    pub fn find(&self, name: &str) -> Option<&DirEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Lists all entries, in insertion order.
    pub fn list(&self) -> &[DirEntry] {
        &self.entries
    }

    /// Whether the directory has no entries beyond `.` and `..`.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.name == "." || e.name == "..")
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Serializes the page to a fixed-size block buffer (`block_size` bytes,
    /// zero-padded past the used portion).
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.block_size];
        buf[0..HEADER_SIZE].copy_from_slice(&(self.entries.len() as u32).to_le_bytes());
        let mut off = HEADER_SIZE;
        for e in &self.entries {
            buf[off..off + 4].copy_from_slice(&e.inode_id.to_le_bytes());
            buf[off + 4] = e.kind as u8;
            buf[off + 5] = e.name.len() as u8;
            let name_buf = pack_name::<64>(&e.name).unwrap_or([0u8; 64]);
            buf[off + 6..off + 6 + 64].copy_from_slice(&name_buf);
            off += ENTRY_SIZE;
        }
        buf
    }

    /// Deserializes a page from a block buffer written by [`Self::serialize`].
    pub fn deserialize(buf: &[u8], block_size: usize) -> Self {
        let count = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        let mut entries = Vec::with_capacity(count);
        let mut off = HEADER_SIZE;
        for _ in 0..count {
            let inode_id = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
            let kind = if buf[off + 4] == 1 {
                FileType::Directory
            } else {
                FileType::File
            };
            let name_len = buf[off + 5] as usize;
            let mut name_buf = [0u8; 64];
            name_buf.copy_from_slice(&buf[off + 6..off + 6 + 64]);
            let mut name = unpack_name(&name_buf);
            name.truncate(name_len.min(name.len()));
            entries.push(DirEntry {
                name,
                inode_id,
                kind,
            });
            off += ENTRY_SIZE;
        }
        Self { entries, block_size }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn page_with(names: &[&str]) -> DirectoryPage {
        let mut p = DirectoryPage::new(4096);
        p.add(".", 1, FileType::Directory).unwrap();
        p.add("..", 1, FileType::Directory).unwrap();
        for (i, n) in names.iter().enumerate() {
            p.add(n, (i + 2) as u32, FileType::File).unwrap();
        }
        p
    }

    #[test]
    fn add_rejects_duplicate() {
        let mut p = page_with(&["a"]);
        assert_eq!(p.add("a", 99, FileType::File), Err(DirError::Duplicate));
    }

    #[test]
    fn add_rejects_name_too_long() {
        let mut p = DirectoryPage::new(4096);
        let long = "a".repeat(64);
        assert_eq!(p.add(&long, 1, FileType::File), Err(DirError::NameTooLong));
    }

    #[test]
    fn max_entries_matches_block_capacity() {
        // 4 header bytes + 58 * 70-byte entries = 4064 <= 4096; a 59th would be 4134.
        assert_eq!(DirectoryPage::max_entries(4096), 58);
    }

    #[test]
    fn add_rejects_when_full() {
        let mut p = DirectoryPage::new(4096);
        for i in 0..DirectoryPage::max_entries(4096) {
            p.add(&format!("f{i}"), i as u32 + 1, FileType::File).unwrap();
        }
        assert_eq!(p.add("overflow", 9999, FileType::File), Err(DirError::Full));
    }

    #[test]
    fn remove_then_find_misses() {
        let mut p = page_with(&["a", "b"]);
        let removed = p.remove("a").unwrap();
        assert_eq!(removed.name, "a");
        assert!(p.find("a").is_none());
        assert!(p.find("b").is_some());
    }

    #[test]
    fn is_empty_ignores_dot_entries() {
        let p = page_with(&[]);
        assert!(p.is_empty());
        let p2 = page_with(&["x"]);
        assert!(!p2.is_empty());
    }

    #[test]
    fn serialize_deserialize_roundtrip() {
        let p = page_with(&["alpha", "beta", "gamma"]);
        let bytes = p.serialize();
        assert_eq!(bytes.len(), 4096);
        let back = DirectoryPage::deserialize(&bytes, 4096);
        assert_eq!(back.list(), p.list());
    }

    #[test]
    fn serialize_zero_pads_past_used_region() {
        let p = page_with(&["a"]);
        let bytes = p.serialize();
        let used = HEADER_SIZE + p.len() * ENTRY_SIZE;
        assert!(bytes[used..].iter().all(|&b| b == 0));
    }
}
