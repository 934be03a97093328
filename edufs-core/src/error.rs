//! Error kinds shared by every layer of the filesystem.

use std::fmt;
use std::io;

/// An error produced by any component of the filesystem.
#[derive(Debug)]
pub enum Error {
    /// An operation requiring a mounted filesystem was attempted on an unmounted one.
    NotMounted,
    /// `format`/`mount` was attempted while already mounted.
    AlreadyMounted,
    /// A name was empty, too long, or contained an illegal character.
    InvalidName,
    /// A path did not resolve to an existing entry.
    NotFound,
    /// A name already exists in the target directory.
    Exists,
    /// An operation expected a file but found a directory, or vice versa.
    WrongType,
    /// `rmdir` was attempted on a non-empty directory.
    NotEmpty,
    /// A destructive operation was attempted on a path with open references.
    Busy,
    /// The bitmap has no free block(s) satisfying the request.
    NoSpace,
    /// The inode table has no free slot.
    NoInodes,
    /// The backing file could not be read or written.
    Io(io::Error),
    /// On-disk metadata violates an invariant of the format.
    Corruption(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotMounted => write!(f, "filesystem is not mounted"),
            Self::AlreadyMounted => write!(f, "filesystem is already mounted"),
            Self::InvalidName => write!(f, "invalid name"),
            Self::NotFound => write!(f, "no such file or directory"),
            Self::Exists => write!(f, "file exists"),
            Self::WrongType => write!(f, "inappropriate type for operation"),
            Self::NotEmpty => write!(f, "directory not empty"),
            Self::Busy => write!(f, "resource busy"),
            Self::NoSpace => write!(f, "no space left on device"),
            Self::NoInodes => write!(f, "no inodes left on device"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Corruption(msg) => write!(f, "corrupted filesystem: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Numeric exit code associated with an error, for the CLI surface (spec §6).
impl Error {
    pub fn code(&self) -> i32 {
        match self {
            Self::NotMounted => 2,
            Self::AlreadyMounted => 3,
            Self::InvalidName => 4,
            Self::NotFound => 5,
            Self::Exists => 6,
            Self::WrongType => 7,
            Self::NotEmpty => 8,
            Self::Busy => 9,
            Self::NoSpace => 10,
            Self::NoInodes => 11,
            Self::Io(_) => 12,
            Self::Corruption(_) => 13,
        }
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
