//! In-memory inode cache abstraction. Per the core's scope, the generic
//! "fetch-or-create in-memory inode object keyed by number" cache is an
//! external collaborator; [`HashMapInodeCache`] is the host-backed default
//! used whenever there's no real kernel inode cache to plug in.

use std::collections::HashMap;

/// The in-memory counterpart of a real (non-alias) on-disk inode. Alias
/// inodes never get promoted to a `CachedInode` -- they are pure directory
/// bookkeeping, read and written directly as on-disk records by
/// create/link/unlink.
#[derive(Debug, Clone)]
pub struct CachedInode {
    pub ino: u32,
    pub is_dir: bool,
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub size: u64,
    pub data_block_count: u32,
    /// Mirrors the on-disk `hard_links` counter. Decremented by unlink,
    /// incremented by link/create; reaching zero triggers `delete_inode`.
    pub hard_links: u32,
    pub dirty: bool,
}

pub trait InodeCache {
    fn get(&self, ino: u32) -> Option<&CachedInode>;
    fn get_mut(&mut self, ino: u32) -> Option<&mut CachedInode>;
    fn insert(&mut self, inode: CachedInode);
    fn remove(&mut self, ino: u32) -> Option<CachedInode>;
}

#[derive(Default)]
pub struct HashMapInodeCache(HashMap<u32, CachedInode>);

impl InodeCache for HashMapInodeCache {
    fn get(&self, ino: u32) -> Option<&CachedInode> {
        self.0.get(&ino)
    }

    fn get_mut(&mut self, ino: u32) -> Option<&mut CachedInode> {
        self.0.get_mut(&ino)
    }

    fn insert(&mut self, inode: CachedInode) {
        self.0.insert(inode.ino, inode);
    }

    fn remove(&mut self, ino: u32) -> Option<CachedInode> {
        self.0.remove(&ino)
    }
}
