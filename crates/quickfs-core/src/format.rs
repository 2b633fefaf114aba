//! Formatter: initializes a raw block device with QuickFS structures.
//!
//! Mirrors `mkquickfs.c`: write the superblock, the inode bitmap with the
//! root bit set, the data bitmap (tail-capped to the device's actual
//! capacity), and the root inode. CLI argument parsing lives in the
//! `quickfs-mkfs` binary, not here.

use crate::bitmap;
use crate::device::BlockDevice;
use crate::error::{QuickFsError, Result};
use log::info;
use quickfs::{
    Inode, SuperBlock, BLOCK_SIZE, FIRST_DATA_BITMAP_BLOCK_NUM, FIRST_INODE_BLOCK_NUM,
    INODE_BITMAP_BLOCK_NUM, MAX_DATA_BLOCKS, NUM_DATA_BITMAP_BLOCKS, ROOT_INODE_NUM,
    SUPER_BLOCK_BLOCK_NUM,
};

/// Number of blocks occupied by the fixed header region (superblock + both
/// bitmaps + inode table) before the data region begins.
pub const HEADER_BLOCKS: u64 = quickfs::FIRST_DATA_BLOCK_NUM;

/// Formats `device`, which must already be sized to the target device
/// length. Fails if the device has no room for at least one data block
/// beyond the fixed header region.
pub fn format(device: &mut dyn BlockDevice) -> Result<()> {
    let total_blocks = device.block_count();
    if total_blocks <= HEADER_BLOCKS {
        return Err(QuickFsError::NoSpaceData);
    }

    let capacity = ((total_blocks - HEADER_BLOCKS) as usize).min(MAX_DATA_BLOCKS);
    info!("formatting image: {} data blocks available", capacity);

    write_superblock(device, capacity as u64)?;
    write_inode_bitmap(device)?;
    write_data_bitmap(device, capacity)?;
    write_root_inode(device)?;

    Ok(())
}

fn write_superblock(device: &mut dyn BlockDevice, data_blocks_free: u64) -> Result<()> {
    let sb = SuperBlock::new(data_blocks_free, quickfs::MAX_INODES as u64 - 1);
    let mut buf = [0u8; BLOCK_SIZE];
    buf[..core::mem::size_of::<SuperBlock>()].copy_from_slice(zerocopy::AsBytes::as_bytes(&sb));
    device.write_block(SUPER_BLOCK_BLOCK_NUM, &buf)?;
    Ok(())
}

fn write_inode_bitmap(device: &mut dyn BlockDevice) -> Result<()> {
    let mut buf = [0u8; BLOCK_SIZE];
    bitmap::mark(&mut buf, ROOT_INODE_NUM);
    device.write_block(INODE_BITMAP_BLOCK_NUM, &buf)?;
    Ok(())
}

/// Writes the (tail-capped) data bitmap. Bits `[capacity..MAX_DATA_BLOCKS)`
/// are set so the nonexistent tail of an undersized image is never handed
/// out as a real block.
fn write_data_bitmap(device: &mut dyn BlockDevice, capacity: usize) -> Result<()> {
    for block_idx in 0..NUM_DATA_BITMAP_BLOCKS {
        let block_start_bit = block_idx as usize * BLOCK_SIZE * 8;
        let mut buf = [0u8; BLOCK_SIZE];
        for bit_in_block in 0..(BLOCK_SIZE * 8) {
            let global_bit = block_start_bit + bit_in_block;
            if global_bit >= capacity {
                bitmap::mark(&mut buf, bit_in_block as u32);
            }
        }
        device.write_block(FIRST_DATA_BITMAP_BLOCK_NUM + block_idx, &buf)?;
    }
    Ok(())
}

fn write_root_inode(device: &mut dyn BlockDevice) -> Result<()> {
    let mut inode = Inode::default();
    inode.set_name(".");
    inode.size = 0;
    inode.data_block_count = 0;
    inode.hard_links = 1;
    inode.link = -1;
    inode.uid = current_uid();
    inode.gid = current_gid();
    inode.mode = quickfs::S_IFDIR | 0o660; // directory, user/group rw
    let now = crate::time::now_unix();
    inode.atime = now;
    inode.mtime = now;
    inode.ctime = now;

    let mut buf = [0u8; BLOCK_SIZE];
    buf.copy_from_slice(zerocopy::AsBytes::as_bytes(&inode));
    device.write_block(FIRST_INODE_BLOCK_NUM, &buf)?;
    Ok(())
}

// std has no portable getuid()/getgid(); every Unix target already links
// libc, so we call through it directly rather than pull in a new crate.
#[cfg(unix)]
fn current_uid() -> u32 {
    extern "C" {
        fn getuid() -> u32;
    }
    unsafe { getuid() }
}
#[cfg(unix)]
fn current_gid() -> u32 {
    extern "C" {
        fn getgid() -> u32;
    }
    unsafe { getgid() }
}
#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}
#[cfg(not(unix))]
fn current_gid() -> u32 {
    0
}
