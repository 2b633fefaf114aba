use thiserror::Error;

/// Errors surfaced by the QuickFS core. Matches the error kinds enumerated
/// for callers: no-space (inode/data), name-too-long, not-found, I/O, and
/// the generic unlink failure when an alias can't be located.
#[derive(Debug, Error)]
pub enum QuickFsError {
    #[error("inode bitmap is full")]
    NoSpaceInode,

    #[error("data bitmap is exhausted")]
    NoSpaceData,

    #[error("name exceeds {max} bytes", max = quickfs::MAX_NAME_LENGTH - 1)]
    NameTooLong,

    #[error("name not found")]
    NotFound,

    #[error("inode number {0} is out of range")]
    InvalidInode(u32),

    #[error("image is not a valid QuickFS image (bad magic)")]
    BadMagic,

    #[error("could not locate the alias to unlink")]
    AliasNotFound,

    #[error("block device error: {0}")]
    Device(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, QuickFsError>;
