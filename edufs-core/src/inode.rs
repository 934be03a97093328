//! On-disk inode record and its exact byte encoding (spec §3, §6).

use crate::util::{bytes_of, pack_name, unpack_name, value_from_bytes};

/// Inode type discriminator (spec §3): a tagged variant rather than subclassing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileType {
    File = 0,
    Directory = 1,
}

impl FileType {
    fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::File),
            1 => Some(Self::Directory),
            _ => None,
        }
    }
}

/// Maximum length of an inode's name, excluding the terminating NUL.
pub const NAME_MAX: usize = 63;

/// Size in bytes of the on-disk inode encoding (spec §6); must divide `BLOCK_SIZE`.
pub const INODE_SIZE: usize = 128;

/// On-disk representation, little-endian, matching the byte offsets in spec §6.
#[repr(C, packed)]
#[derive(Clone, Copy)]
struct RawInode {
    id: u32,
    type_: u8,
    _pad0: [u8; 3],
    size: u32,
    start_block: u32,
    block_count: u32,
    parent_id: u32,
    create_time: u64,
    modify_time: u64,
    name: [u8; 64],
    _reserved: [u8; 24],
}

const _: () = assert!(std::mem::size_of::<RawInode>() == INODE_SIZE);
const _: () = assert!(4096 % INODE_SIZE == 0);

/// In-memory inode record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub id: u32,
    pub kind: FileType,
    pub size: u32,
    pub start_block: u32,
    pub block_count: u32,
    pub parent_id: u32,
    pub create_time: u64,
    pub modify_time: u64,
    pub name: String,
}

impl Inode {
    /// An all-zero, unallocated slot: an inode with `id == 0` marks a free table slot.
    pub fn empty() -> Self {
        Self {
            id: 0,
            kind: FileType::File,
            size: 0,
            start_block: 0,
            block_count: 0,
            parent_id: 0,
            create_time: 0,
            modify_time: 0,
            name: String::new(),
        }
    }

    /// Whether this slot is in use.
    pub fn is_allocated(&self) -> bool {
        self.id != 0
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileType::File
    }

    /// Encodes this inode to exactly [`INODE_SIZE`] little-endian bytes.
    pub fn encode(&self) -> [u8; INODE_SIZE] {
        let name = pack_name::<64>(&self.name).unwrap_or([0u8; 64]);
        let raw = RawInode {
            id: self.id.to_le(),
            type_: self.kind as u8,
            _pad0: [0; 3],
            size: self.size.to_le(),
            start_block: self.start_block.to_le(),
            block_count: self.block_count.to_le(),
            parent_id: self.parent_id.to_le(),
            create_time: self.create_time.to_le(),
            modify_time: self.modify_time.to_le(),
            name,
            _reserved: [0; 24],
        };
        let bytes = unsafe { bytes_of(&raw) };
        let mut out = [0u8; INODE_SIZE];
        out.copy_from_slice(bytes);
        out
    }

    /// Decodes an inode from exactly [`INODE_SIZE`] bytes. Returns `None` if the
    /// `type` byte is not a recognized discriminator for an allocated slot.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let raw: RawInode = unsafe { value_from_bytes(bytes) };
        let id = u32::from_le(raw.id);
        if id == 0 {
            return Some(Self::empty());
        }
        let kind = FileType::from_u8(raw.type_)?;
        Some(Self {
            id,
            kind,
            size: u32::from_le(raw.size),
            start_block: u32::from_le(raw.start_block),
            block_count: u32::from_le(raw.block_count),
            parent_id: u32::from_le(raw.parent_id),
            create_time: u64::from_le(raw.create_time),
            modify_time: u64::from_le(raw.modify_time),
            name: unpack_name(&raw.name),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let inode = Inode {
            id: 7,
            kind: FileType::Directory,
            size: 4096,
            start_block: 200,
            block_count: 1,
            parent_id: 1,
            create_time: 1000,
            modify_time: 2000,
            name: "subdir".to_owned(),
        };
        let bytes = inode.encode();
        assert_eq!(bytes.len(), INODE_SIZE);
        let decoded = Inode::decode(&bytes).unwrap();
        assert_eq!(decoded, inode);
    }

    #[test]
    fn empty_slot_decodes_as_unallocated() {
        let bytes = [0u8; INODE_SIZE];
        let decoded = Inode::decode(&bytes).unwrap();
        assert!(!decoded.is_allocated());
    }

    #[test]
    fn field_offsets_match_spec() {
        // Spec §6: id@0, type@4, size@8, start_block@12, block_count@16,
        // parent_id@20, create_time@24, modify_time@32, name@40 (64 bytes).
        let inode = Inode {
            id: 0x01020304,
            kind: FileType::Directory,
            size: 0,
            start_block: 0,
            block_count: 0,
            parent_id: 0,
            create_time: 0,
            modify_time: 0,
            name: String::new(),
        };
        let bytes = inode.encode();
        assert_eq!(&bytes[0..4], &0x01020304u32.to_le_bytes());
        assert_eq!(bytes[4], 1); // Directory
        assert_eq!(bytes.len(), 128);
    }
}
