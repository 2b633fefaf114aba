//! Mount, inode persistence, the block mapper, directory enumeration, name
//! lookup, and create/link/unlink: the hard part of QuickFS.

use crate::bitmap;
use crate::cache::{CachedInode, HashMapInodeCache, InodeCache};
use crate::device::BlockDevice;
use crate::error::{QuickFsError, Result};
use crate::time::now_unix;
use log::{debug, error, info};
use quickfs::{
    data_bit_to_block_num, inode_num_to_block_num, Inode, SuperBlock, BLOCK_SIZE, DOTDOT_INO,
    DOT_INO, FIRST_DATA_BITMAP_BLOCK_NUM, INODE_BITMAP_BLOCK_NUM, MAX_INODES, MAX_NAME_LENGTH,
    NUM_DATA_BITMAP_BLOCKS, ROOT_INODE_NUM, SUPER_BLOCK_BLOCK_NUM,
};
use zerocopy::FromBytes;

const DATA_BITS_PER_BLOCK: u32 = (BLOCK_SIZE * 8) as u32;

/// A mounted QuickFS image: the in-memory superblock, the block device, and
/// the inode cache. `D` is the block device abstraction; `C` is the inode
/// cache abstraction, defaulted to a plain `HashMap` for hosts with no real
/// kernel cache to plug in.
pub struct FileSystem<D: BlockDevice, C: InodeCache = HashMapInodeCache> {
    superblock: SuperBlock,
    device: D,
    cache: C,
}

impl<D: BlockDevice> FileSystem<D, HashMapInodeCache> {
    /// Loads the superblock, verifies the magic number, and anchors the
    /// root inode. Mismatched magic aborts the mount.
    pub fn mount(mut device: D) -> Result<Self> {
        let mut buf = [0u8; BLOCK_SIZE];
        device.read_block(SUPER_BLOCK_BLOCK_NUM, &mut buf)?;
        let sb = SuperBlock::read_from_prefix(&buf).ok_or(QuickFsError::BadMagic)?;
        if !sb.is_valid() {
            error!("mount: bad magic {:#x}", sb.magic);
            return Err(QuickFsError::BadMagic);
        }

        let mut fs = Self {
            superblock: sb,
            device,
            cache: HashMapInodeCache::default(),
        };
        fs.read_inode(ROOT_INODE_NUM)?;
        info!(
            "mounted quickfs image: {} inodes free, {} data blocks free",
            fs.superblock.inodes_free, fs.superblock.data_blocks_free
        );
        Ok(fs)
    }
}

impl<D: BlockDevice, C: InodeCache> FileSystem<D, C> {
    pub fn superblock(&self) -> &SuperBlock {
        &self.superblock
    }

    /// Direct access to the underlying block device, for callers that read
    /// or write file data blocks themselves once [`Self::map`] has resolved
    /// a physical block number.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Counts inode bitmap bits currently set, including the root. Exposed
    /// for diagnostics and tests that check the superblock stays in sync
    /// with the bitmap.
    pub fn allocated_inode_count(&mut self) -> Result<usize> {
        let buf = self.read_inode_bitmap()?;
        Ok((0..MAX_INODES as u32)
            .filter(|&i| bitmap::test(&buf, i))
            .count())
    }

    // ---- raw block helpers -------------------------------------------------

    fn read_disk_inode(&mut self, ino: u32) -> Result<Inode> {
        if ino as usize >= MAX_INODES {
            return Err(QuickFsError::InvalidInode(ino));
        }
        let mut buf = [0u8; BLOCK_SIZE];
        self.device
            .read_block(inode_num_to_block_num(ino), &mut buf)?;
        Ok(Inode::read_from(&buf[..]).expect("inode record is exactly one block"))
    }

    fn write_disk_inode(&mut self, ino: u32, inode: &Inode) -> Result<()> {
        if ino as usize >= MAX_INODES {
            return Err(QuickFsError::InvalidInode(ino));
        }
        let mut buf = [0u8; BLOCK_SIZE];
        buf.copy_from_slice(zerocopy::AsBytes::as_bytes(inode));
        self.device.write_block(inode_num_to_block_num(ino), &buf)?;
        Ok(())
    }

    fn write_superblock(&mut self) -> Result<()> {
        let mut buf = [0u8; BLOCK_SIZE];
        buf[..core::mem::size_of::<SuperBlock>()]
            .copy_from_slice(zerocopy::AsBytes::as_bytes(&self.superblock));
        self.device.write_block(SUPER_BLOCK_BLOCK_NUM, &buf)?;
        Ok(())
    }

    fn read_inode_bitmap(&mut self) -> Result<[u8; BLOCK_SIZE]> {
        let mut buf = [0u8; BLOCK_SIZE];
        self.device.read_block(INODE_BITMAP_BLOCK_NUM, &mut buf)?;
        Ok(buf)
    }

    fn mark_inode_bit(&mut self, ino: u32) -> Result<()> {
        let mut buf = self.read_inode_bitmap()?;
        bitmap::mark(&mut buf, ino);
        self.device.write_block(INODE_BITMAP_BLOCK_NUM, &buf)?;
        Ok(())
    }

    fn clear_inode_bit(&mut self, ino: u32) -> Result<()> {
        let mut buf = self.read_inode_bitmap()?;
        bitmap::clear(&mut buf, ino);
        self.device.write_block(INODE_BITMAP_BLOCK_NUM, &buf)?;
        Ok(())
    }

    fn data_bitmap_location(bit: u32) -> (u64, u32) {
        let block = FIRST_DATA_BITMAP_BLOCK_NUM + (bit / DATA_BITS_PER_BLOCK) as u64;
        let local = bit % DATA_BITS_PER_BLOCK;
        (block, local)
    }

    fn mark_data_bit(&mut self, bit: u32) -> Result<()> {
        let (block, local) = Self::data_bitmap_location(bit);
        let mut buf = [0u8; BLOCK_SIZE];
        self.device.read_block(block, &mut buf)?;
        bitmap::mark(&mut buf, local);
        self.device.write_block(block, &buf)?;
        Ok(())
    }

    fn clear_data_bit(&mut self, bit: u32) -> Result<()> {
        let (block, local) = Self::data_bitmap_location(bit);
        let mut buf = [0u8; BLOCK_SIZE];
        self.device.read_block(block, &mut buf)?;
        bitmap::clear(&mut buf, local);
        self.device.write_block(block, &buf)?;
        Ok(())
    }

    fn first_free_inode_bit(&mut self) -> Result<Option<u32>> {
        let buf = self.read_inode_bitmap()?;
        Ok(bitmap::first_free(core::slice::from_ref(&buf)))
    }

    fn first_free_data_bit(&mut self) -> Result<Option<u32>> {
        let mut blocks = [[0u8; BLOCK_SIZE]; NUM_DATA_BITMAP_BLOCKS as usize];
        for (i, block) in blocks.iter_mut().enumerate() {
            self.device
                .read_block(FIRST_DATA_BITMAP_BLOCK_NUM + i as u64, block)?;
        }
        Ok(bitmap::first_free(&blocks))
    }

    // ---- §4.3 inode persistence --------------------------------------------

    /// Fetches the in-memory inode for `ino`, populating it from disk on a
    /// cache miss.
    pub fn read_inode(&mut self, ino: u32) -> Result<&CachedInode> {
        if self.cache.get(ino).is_none() {
            let disk = self.read_disk_inode(ino)?;
            self.cache.insert(CachedInode {
                ino,
                is_dir: ino == ROOT_INODE_NUM,
                mode: disk.mode,
                uid: disk.uid,
                gid: disk.gid,
                atime: disk.atime,
                mtime: disk.mtime,
                ctime: disk.ctime,
                size: disk.size as u64,
                data_block_count: disk.data_block_count as u32,
                hard_links: disk.hard_links as u32,
                dirty: false,
            });
        }
        Ok(self.cache.get(ino).expect("just inserted"))
    }

    /// Mutable access to the cached attributes, for callers updating
    /// mode/uid/gid/timestamps/size before calling [`Self::write_inode`].
    pub fn inode_mut(&mut self, ino: u32) -> Option<&mut CachedInode> {
        self.cache.get_mut(ino)
    }

    /// Flushes the cached attributes back to the on-disk record. Does not
    /// touch `name`, `data_blocks`, or `link` -- those are owned by
    /// create/link/unlink/the block mapper.
    pub fn write_inode(&mut self, ino: u32) -> Result<()> {
        let cached = self
            .cache
            .get(ino)
            .ok_or(QuickFsError::InvalidInode(ino))?
            .clone();
        let mut disk = self.read_disk_inode(ino)?;
        disk.mode = cached.mode;
        disk.uid = cached.uid;
        disk.gid = cached.gid;
        disk.size = cached.size as u16;
        disk.data_block_count = cached.data_block_count as u16;
        disk.hard_links = cached.hard_links as u64;
        disk.atime = cached.atime;
        disk.mtime = cached.mtime;
        disk.ctime = cached.ctime;
        self.write_disk_inode(ino, &disk)?;
        if let Some(c) = self.cache.get_mut(ino) {
            c.dirty = false;
        }
        Ok(())
    }

    /// Frees `ino`'s data blocks and inode bitmap bit, and returns the
    /// released counts to the superblock. Called once `hard_links` reaches
    /// zero and no reference remains.
    pub fn delete_inode(&mut self, ino: u32) -> Result<()> {
        let disk = self.read_disk_inode(ino)?;
        let count = disk.data_block_count as usize;
        let freed: Vec<u16> = disk.data_blocks[..count].to_vec();

        // Free path: superblock flushed before the bitmaps, biasing a crash
        // toward a leaked (never reused) block rather than a double-use.
        self.superblock.inodes_free += 1;
        self.superblock.data_blocks_free += count as u64;
        self.write_superblock()?;

        for bit in freed {
            self.clear_data_bit(bit as u32)?;
        }
        self.clear_inode_bit(ino)?;

        self.cache.remove(ino);
        debug!("delete_inode({ino}): freed {count} data blocks");
        Ok(())
    }

    // ---- §4.4 block mapper --------------------------------------------------

    /// Maps `logical_block` of `ino` to a physical data block. With
    /// `create = false`, returns `Ok(None)` past the end of the file instead
    /// of erroring. With `create = true`, allocates on first touch of a new
    /// logical block (append-only: sparse files are not supported).
    pub fn map(&mut self, ino: u32, logical_block: u32, create: bool) -> Result<Option<u64>> {
        let mut disk = self.read_disk_inode(ino)?;
        let count = disk.data_block_count as u32;

        if !create {
            if logical_block >= count {
                return Ok(None);
            }
            return Ok(Some(data_bit_to_block_num(
                disk.data_blocks[logical_block as usize] as u32,
            )));
        }

        if self.superblock.data_blocks_free == 0 {
            return Err(QuickFsError::NoSpaceData);
        }

        if disk.size > 0 && logical_block < count {
            return Ok(Some(data_bit_to_block_num(
                disk.data_blocks[logical_block as usize] as u32,
            )));
        }

        let bit = self
            .first_free_data_bit()?
            .ok_or(QuickFsError::NoSpaceData)?;
        // Allocate path: bitmap flushed before the superblock.
        self.mark_data_bit(bit)?;
        disk.data_blocks[count as usize] = bit as u16;
        disk.data_block_count = count as u16 + 1;
        self.write_disk_inode(ino, &disk)?;
        self.superblock.data_blocks_free -= 1;
        self.write_superblock()?;

        if let Some(c) = self.cache.get_mut(ino) {
            c.data_block_count = count + 1;
        }
        Ok(Some(data_bit_to_block_num(bit)))
    }

    // ---- §4.5 directory enumeration -----------------------------------------

    /// Enumerates `.`, `..`, then every live directory entry in ascending
    /// inode order, calling `sink(name, resolved_ino)` for each. Stops early
    /// if `sink` returns `false`. `cursor` skips that many already-emitted
    /// entries (for resuming a paused enumeration); returns the number of
    /// entries seen (including skipped ones), so a caller can pass it back
    /// in as the next cursor.
    pub fn readdir(
        &mut self,
        cursor: usize,
        mut sink: impl FnMut(&str, u32) -> bool,
    ) -> Result<usize> {
        let mut seen = 0usize;
        for (name, vino) in [(".", DOT_INO), ("..", DOTDOT_INO)] {
            if seen >= cursor && !sink(name, vino) {
                return Ok(seen);
            }
            seen += 1;
        }

        let bitmap = self.read_inode_bitmap()?;
        for ino in 1..MAX_INODES as u32 {
            if !bitmap::test(&bitmap, ino) {
                continue;
            }
            let disk = self.read_disk_inode(ino)?;
            let Some(name) = disk.name_str() else {
                continue;
            };
            if seen < cursor {
                seen += 1;
                continue;
            }
            let resolved = if disk.is_alias() {
                disk.link as u32
            } else {
                ino
            };
            if !sink(name, resolved) {
                return Ok(seen);
            }
            seen += 1;
        }
        Ok(seen)
    }

    // ---- §4.6 name lookup -----------------------------------------------------

    /// Resolves `name` within the single directory, following alias
    /// indirection. `Ok(None)` on a miss; `Err(NameTooLong)` immediately for
    /// an over-length name.
    pub fn lookup(&mut self, name: &str) -> Result<Option<u32>> {
        if name.len() >= MAX_NAME_LENGTH {
            return Err(QuickFsError::NameTooLong);
        }
        let bitmap = self.read_inode_bitmap()?;
        for ino in 0..MAX_INODES as u32 {
            if !bitmap::test(&bitmap, ino) {
                continue;
            }
            let disk = self.read_disk_inode(ino)?;
            if disk.name_str() == Some(name) {
                return Ok(Some(if disk.is_alias() {
                    disk.link as u32
                } else {
                    ino
                }));
            }
        }
        Ok(None)
    }

    fn find_alias(&mut self, name: &str, target: u32) -> Result<Option<u32>> {
        let bitmap = self.read_inode_bitmap()?;
        for ino in 0..MAX_INODES as u32 {
            if !bitmap::test(&bitmap, ino) {
                continue;
            }
            let disk = self.read_disk_inode(ino)?;
            if disk.is_alias() && disk.link as u32 == target && disk.name_str() == Some(name) {
                return Ok(Some(ino));
            }
        }
        Ok(None)
    }

    // ---- §4.7 create -----------------------------------------------------------

    pub fn create(&mut self, name: &str, mode: u16, uid: u32, gid: u32) -> Result<u32> {
        if name.len() >= MAX_NAME_LENGTH {
            return Err(QuickFsError::NameTooLong);
        }
        let ino = self
            .first_free_inode_bit()?
            .ok_or(QuickFsError::NoSpaceInode)?;

        let now = now_unix();
        let mut disk = Inode::default();
        disk.set_name(name);
        disk.size = 0;
        disk.data_block_count = 0;
        disk.hard_links = 1;
        disk.link = -1;
        disk.uid = uid;
        disk.gid = gid;
        disk.mode = mode | quickfs::S_IFREG;
        disk.atime = now;
        disk.mtime = now;
        disk.ctime = now;

        // Record written and marked dirty before the bitmap bit is set, so a
        // half-finished create never looks allocated with garbage contents.
        self.write_disk_inode(ino, &disk)?;
        self.mark_inode_bit(ino)?;
        self.superblock.inodes_free -= 1;
        self.write_superblock()?;

        self.cache.insert(CachedInode {
            ino,
            is_dir: false,
            mode: disk.mode,
            uid,
            gid,
            atime: now,
            mtime: now,
            ctime: now,
            size: 0,
            data_block_count: 0,
            hard_links: 1,
            dirty: false,
        });
        info!("create({name:?}) -> inode {ino}");
        Ok(ino)
    }

    // ---- §4.8 link -----------------------------------------------------------

    pub fn link(&mut self, existing_name: &str, new_name: &str) -> Result<()> {
        if new_name.len() >= MAX_NAME_LENGTH {
            return Err(QuickFsError::NameTooLong);
        }
        let target = self.lookup(existing_name)?.ok_or(QuickFsError::NotFound)?;
        let alias = self
            .first_free_inode_bit()?
            .ok_or(QuickFsError::NoSpaceInode)?;

        let mut alias_disk = Inode::default();
        alias_disk.set_name(new_name);
        alias_disk.link = target as i16;
        self.write_disk_inode(alias, &alias_disk)?;
        self.mark_inode_bit(alias)?;
        self.superblock.inodes_free -= 1;
        self.write_superblock()?;

        self.read_inode(target)?;
        let now = now_unix();
        let mut target_disk = self.read_disk_inode(target)?;
        target_disk.hard_links += 1;
        target_disk.ctime = now;
        target_disk.atime = now;
        self.write_disk_inode(target, &target_disk)?;
        if let Some(c) = self.cache.get_mut(target) {
            c.hard_links += 1;
            c.ctime = now;
            c.atime = now;
        }
        info!("link({existing_name:?} -> {new_name:?}) via alias inode {alias}");
        Ok(())
    }

    // ---- §4.9 unlink -----------------------------------------------------------

    pub fn unlink(&mut self, name: &str) -> Result<()> {
        if name.len() >= MAX_NAME_LENGTH {
            return Err(QuickFsError::NameTooLong);
        }
        let ino = self.lookup(name)?.ok_or(QuickFsError::NotFound)?;
        self.read_inode(ino)?;
        let mut disk = self.read_disk_inode(ino)?;
        let name_matches = disk.name_str() == Some(name);

        if disk.hard_links <= 1 {
            if !name_matches {
                let alias = self
                    .find_alias(name, ino)?
                    .ok_or(QuickFsError::AliasNotFound)?;
                self.free_inode_slot(alias)?;
            }
            // case Ia: hard_links stays 1 on disk; the decrement below drops
            // it to zero and the delete path frees everything.
        } else if name_matches {
            disk.clear_name();
            self.write_disk_inode(ino, &disk)?;
        } else {
            let alias = self
                .find_alias(name, ino)?
                .ok_or(QuickFsError::AliasNotFound)?;
            self.free_inode_slot(alias)?;
        }

        self.decrement_links(ino)
    }

    fn free_inode_slot(&mut self, ino: u32) -> Result<()> {
        // Free path: superblock before the bitmap bit.
        self.superblock.inodes_free += 1;
        self.write_superblock()?;
        self.clear_inode_bit(ino)
    }

    fn decrement_links(&mut self, ino: u32) -> Result<()> {
        let remaining = {
            let cached = self
                .cache
                .get_mut(ino)
                .ok_or(QuickFsError::InvalidInode(ino))?;
            cached.hard_links = cached.hard_links.saturating_sub(1);
            cached.dirty = true;
            cached.hard_links
        };
        if remaining == 0 {
            self.delete_inode(ino)
        } else {
            self.write_inode(ino)
        }
    }
}
