//! End-to-end scenarios against a real temp-file-backed image: format,
//! mount, create/write/read, hard links, and unlink.

use quickfs_core::{format, BlockDevice, FileBlockDevice, FileSystem, QuickFsError};
use std::fs::OpenOptions;
use tempfile::NamedTempFile;

const BLOCK_SIZE: usize = quickfs::BLOCK_SIZE;

/// Creates a temp image sized for `format::HEADER_BLOCKS + extra_data_blocks`
/// blocks, formats it, and mounts it.
fn mounted_image(extra_data_blocks: u64) -> (NamedTempFile, FileSystem<FileBlockDevice>) {
    let tmp = NamedTempFile::new().expect("create temp file");
    let total_blocks = format::HEADER_BLOCKS + extra_data_blocks;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(tmp.path())
        .expect("reopen temp file");
    file.set_len(total_blocks * BLOCK_SIZE as u64)
        .expect("size image");
    let mut device = FileBlockDevice::open(file).expect("open device");
    format::format(&mut device).expect("format");
    let fs = FileSystem::mount(device).expect("mount");
    (tmp, fs)
}

fn readdir_names(fs: &mut FileSystem<FileBlockDevice>) -> Vec<String> {
    let mut names = Vec::new();
    fs.readdir(0, |name, _ino| {
        names.push(name.to_string());
        true
    })
    .expect("readdir");
    names
}

#[test]
fn format_then_mount_reports_expected_free_counts() {
    let (_tmp, fs) = mounted_image(100);
    let sb = fs.superblock();
    assert_eq!(sb.data_blocks_free, 100);
    // root inode is the only one allocated at format time.
    assert_eq!(sb.inodes_free, quickfs::MAX_INODES as u64 - 1);
}

#[test]
fn undersized_image_tail_caps_the_data_bitmap() {
    // 100 data blocks on an image whose data bitmap has room for 16384.
    let (_tmp, mut fs) = mounted_image(100);
    // Every one of the next 100 allocations must succeed...
    let ino = fs.create("big", 0o644, 1000, 1000).expect("create");
    for i in 0..100u32 {
        fs.map(ino, i, true)
            .unwrap_or_else(|e| panic!("block {i}: {e}"));
    }
    // ...and the 101st must fail: the tail is marked permanently in-use.
    match fs.map(ino, 100, true) {
        Err(QuickFsError::NoSpaceData) => {}
        other => panic!("expected NoSpaceData, got {other:?}"),
    }
}

#[test]
fn create_write_read_round_trip() {
    let (_tmp, mut fs) = mounted_image(16);
    let ino = fs.create("hello.txt", 0o644, 1000, 1000).expect("create");

    let block_num = fs.map(ino, 0, true).expect("map").expect("allocated");
    let mut buf = [0u8; BLOCK_SIZE];
    buf[..5].copy_from_slice(b"howdy");
    fs.device_mut()
        .write_block(block_num, &buf)
        .expect("write data");

    // Re-resolve the mapping without allocating; must be the same block.
    let remapped = fs.map(ino, 0, false).expect("map").expect("still mapped");
    assert_eq!(remapped, block_num);

    let mut readback = [0u8; BLOCK_SIZE];
    fs.device_mut()
        .read_block(remapped, &mut readback)
        .expect("read data");
    assert_eq!(&readback[..5], b"howdy");

    assert_eq!(readdir_names(&mut fs), vec![".", "..", "hello.txt"]);
}

#[test]
fn hard_link_then_unlink_original_keeps_data_reachable() {
    let (_tmp, mut fs) = mounted_image(16);
    let ino = fs.create("a", 0o644, 1000, 1000).expect("create");
    fs.map(ino, 0, true).expect("allocate a block");

    fs.link("a", "b").expect("link");
    assert_eq!(fs.read_inode(ino).unwrap().hard_links, 2);

    fs.unlink("a").expect("unlink a");
    // b is still a valid alias pointing at the same (now tombstoned) inode.
    assert_eq!(fs.lookup("b").unwrap(), Some(ino));
    assert_eq!(fs.lookup("a").unwrap(), None);

    fs.unlink("b").expect("unlink b");
    assert_eq!(fs.lookup("b").unwrap(), None);
    // The underlying data blocks were freed back to the superblock.
    assert_eq!(fs.superblock().data_blocks_free, 16);
}

#[test]
fn unlink_via_alias_first_then_original_also_frees_fully() {
    let (_tmp, mut fs) = mounted_image(16);
    let ino = fs.create("a", 0o644, 1000, 1000).expect("create");
    fs.link("a", "b").expect("link");

    fs.unlink("b").expect("unlink alias first");
    assert_eq!(fs.lookup("a").unwrap(), Some(ino));
    assert_eq!(fs.read_inode(ino).unwrap().hard_links, 1);

    fs.unlink("a").expect("unlink original last");
    assert_eq!(fs.lookup("a").unwrap(), None);
    assert_eq!(fs.superblock().inodes_free, quickfs::MAX_INODES as u64 - 1);
}

#[test]
fn create_fails_once_inode_table_is_exhausted() {
    let (_tmp, mut fs) = mounted_image(4);
    // Root already took inode 0; fill the remaining MAX_INODES - 1 slots.
    for i in 0..(quickfs::MAX_INODES as u64 - 1) {
        fs.create(&format!("f{i}"), 0o644, 0, 0)
            .unwrap_or_else(|e| panic!("create f{i}: {e}"));
    }
    match fs.create("overflow", 0o644, 0, 0) {
        Err(QuickFsError::NoSpaceInode) => {}
        other => panic!("expected NoSpaceInode, got {other:?}"),
    }
}

#[test]
fn mount_rejects_bad_magic() {
    let tmp = NamedTempFile::new().expect("create temp file");
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(tmp.path())
        .expect("reopen");
    file.set_len((format::HEADER_BLOCKS + 1) * BLOCK_SIZE as u64)
        .expect("size image");
    let device = FileBlockDevice::open(file).expect("open device");
    let err = FileSystem::mount(device)
        .err()
        .expect("mount of an unformatted image must fail");
    assert!(
        matches!(err, QuickFsError::BadMagic),
        "expected BadMagic, got {err}"
    );
}
