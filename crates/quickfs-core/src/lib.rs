//! Core implementation of QuickFS: a single flat-directory filesystem over a
//! fixed-layout block device, with hard links implemented via alias inode
//! records. See the `quickfs` crate for the on-disk layout this builds on.

mod bitmap;
mod cache;
mod device;
mod error;
pub mod format;
mod fs;
mod time;

pub use cache::{CachedInode, HashMapInodeCache, InodeCache};
pub use device::{BlockDevice, FileBlockDevice};
pub use error::{QuickFsError, Result};
pub use fs::FileSystem;
