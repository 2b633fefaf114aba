#![no_std]

//! Byte-exact on-disk layout for QuickFS: block geometry, the superblock
//! record, and the inode record. This crate owns nothing but the format --
//! no I/O, no allocation. `quickfs-core` builds the filesystem on top of it.

use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// Size of a single block, in bytes.
pub const BLOCK_SIZE: usize = 512;

/// Filesystem magic, written to the superblock at format time.
pub const MAGIC: u64 = 0xFEED_D0BB;

pub const SUPER_BLOCK_BLOCK_NUM: u64 = 0;
pub const INODE_BITMAP_BLOCK_NUM: u64 = 1;
pub const FIRST_DATA_BITMAP_BLOCK_NUM: u64 = 2;
pub const NUM_DATA_BITMAP_BLOCKS: u64 = 4;
pub const FIRST_INODE_BLOCK_NUM: u64 = 6;
pub const FIRST_DATA_BLOCK_NUM: u64 = 4102;

/// Total inode slots: one bit per slot in the inode bitmap, one block per
/// slot in the inode table.
pub const MAX_INODES: usize = BLOCK_SIZE * 8;
/// Total data block slots addressable by the data bitmap.
pub const MAX_DATA_BLOCKS: usize = BLOCK_SIZE * NUM_DATA_BITMAP_BLOCKS as usize * 8;

pub const MAX_NAME_LENGTH: usize = 256;
pub const MAX_DATA_BLOCKS_PER_INODE: usize = 104;

/// POSIX mode bits the formatter and `create` set directly; QuickFS does not
/// interpret the rest of the mode word.
pub const S_IFDIR: u16 = 0o040_000;
pub const S_IFREG: u16 = 0o100_000;

/// Root inode number. Always allocated on a mounted image.
pub const ROOT_INODE_NUM: u32 = 0;
/// Virtual inode numbers synthesized during enumeration; never stored on disk.
pub const DOT_INO: u32 = 4096;
pub const DOTDOT_INO: u32 = 4097;

/// Maps an inode number to the block holding its on-disk record.
pub const fn inode_num_to_block_num(ino: u32) -> u64 {
    FIRST_INODE_BLOCK_NUM + ino as u64
}

/// Maps a data bitmap bit index to the block holding the corresponding data.
pub const fn data_bit_to_block_num(bit: u32) -> u64 {
    FIRST_DATA_BLOCK_NUM + bit as u64
}

/// On-disk superblock. The source keeps the remainder of block 0 as
/// don't-care; callers are responsible for padding a full block when
/// writing this to disk.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct SuperBlock {
    pub magic: u64,
    pub data_blocks_free: u64,
    pub inodes_free: u64,
}

const _: () = assert!(core::mem::size_of::<SuperBlock>() == 24);

impl SuperBlock {
    pub fn new(data_blocks_free: u64, inodes_free: u64) -> Self {
        Self {
            magic: MAGIC,
            data_blocks_free,
            inodes_free,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == MAGIC
    }
}

/// On-disk inode record, one per 512-byte inode-table block
/// (`FIRST_INODE_BLOCK_NUM + ino`).
///
/// `link <= 0` marks a real inode; `link > 0` marks an alias whose `name` is
/// a directory entry pointing at inode `link`. Aliases hold no data
/// (`data_block_count == 0`).
///
/// Fields are declared widest-alignment-first (the 8-byte fields, then the
/// 4-byte fields, then the 2-byte fields, then `name`) so the record packs
/// into exactly one block under plain `repr(C)` with no compiler-inserted
/// padding -- `name` last keeps every multi-byte field naturally aligned.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes, FromZeroes)]
pub struct Inode {
    pub hard_links: u64,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub uid: u32,
    pub gid: u32,
    pub size: u16,
    pub data_block_count: u16,
    pub link: i16,
    /// `umode_t` in the kernel module this layout is derived from is a
    /// 16-bit field, not 32; matching that width is what makes the record
    /// land exactly on one block.
    pub mode: u16,
    pub data_blocks: [u16; MAX_DATA_BLOCKS_PER_INODE],
    pub name: [u8; MAX_NAME_LENGTH],
}

const _: () = assert!(core::mem::size_of::<Inode>() == BLOCK_SIZE);

impl Default for Inode {
    fn default() -> Self {
        Self::new_zeroed()
    }
}

impl Inode {
    /// Whether this record is an alias: a directory entry that is not the
    /// real inode holding the data.
    pub fn is_alias(&self) -> bool {
        self.link > 0
    }

    /// Whether this record's name has been tombstoned (unlinked while other
    /// aliases kept the real inode alive).
    pub fn is_tombstoned(&self) -> bool {
        self.name[0] == 0
    }

    pub fn name_str(&self) -> Option<&str> {
        if self.is_tombstoned() {
            return None;
        }
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..end]).ok()
    }

    pub fn set_name(&mut self, name: &str) -> bool {
        if name.len() >= MAX_NAME_LENGTH {
            return false;
        }
        self.name = [0; MAX_NAME_LENGTH];
        self.name[..name.len()].copy_from_slice(name.as_bytes());
        true
    }

    pub fn clear_name(&mut self) {
        self.name = [0; MAX_NAME_LENGTH];
    }
}
