//! Property-based tests for the invariants a mounted image must hold across
//! arbitrary sequences of create/link/unlink.

use proptest::prelude::*;
use quickfs_core::{format, FileBlockDevice, FileSystem, QuickFsError};
use std::fs::OpenOptions;
use tempfile::NamedTempFile;

const BLOCK_SIZE: usize = quickfs::BLOCK_SIZE;
const DATA_BLOCKS: u64 = 32;

fn fresh_fs() -> (NamedTempFile, FileSystem<FileBlockDevice>) {
    let tmp = NamedTempFile::new().expect("create temp file");
    let total_blocks = format::HEADER_BLOCKS + DATA_BLOCKS;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(tmp.path())
        .expect("reopen temp file");
    file.set_len(total_blocks * BLOCK_SIZE as u64)
        .expect("size image");
    let mut device = FileBlockDevice::open(file).expect("open device");
    format::format(&mut device).expect("format");
    (tmp, FileSystem::mount(device).expect("mount"))
}

#[derive(Debug, Clone)]
enum Op {
    Create(String),
    Link(usize, String),
    Unlink(usize),
}

fn op_strategy(max_names: usize) -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..max_names).prop_map(|i| Op::Create(format!("f{i}"))),
        (0..max_names, 0..max_names).prop_map(|(target, i)| Op::Link(target, format!("l{i}"))),
        (0..max_names).prop_map(Op::Unlink),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// P1: `inodes_free` always equals `MAX_INODES - 1 - (live inode-bitmap bits set)`.
    #[test]
    fn inodes_free_matches_allocated_count(ops in prop::collection::vec(op_strategy(6), 0..40)) {
        let (_tmp, mut fs) = fresh_fs();
        let mut created: Vec<String> = Vec::new();

        for op in ops {
            match op {
                Op::Create(name) => {
                    if fs.lookup(&name).unwrap().is_some() {
                        continue;
                    }
                    if fs.create(&name, 0o644, 0, 0).is_ok() {
                        created.push(name);
                    }
                }
                Op::Link(idx, new_name) => {
                    if created.is_empty() {
                        continue;
                    }
                    let target = &created[idx % created.len()];
                    if fs.lookup(&new_name).unwrap().is_some() {
                        continue;
                    }
                    if fs.link(target, &new_name).is_ok() {
                        created.push(new_name);
                    }
                }
                Op::Unlink(idx) => {
                    if created.is_empty() {
                        continue;
                    }
                    let i = idx % created.len();
                    let name = created.remove(i);
                    let _ = fs.unlink(&name);
                }
            }

            // The superblock's free count must always mirror the inode
            // bitmap's population, including orphaned real inodes kept
            // alive only by a surviving alias.
            let allocated = fs.allocated_inode_count().unwrap() as u64;
            prop_assert_eq!(fs.superblock().inodes_free, quickfs::MAX_INODES as u64 - allocated);
        }
    }

    /// P7: repeated allocation always returns the lowest free inode number.
    #[test]
    fn create_allocates_lowest_free_slot(n in 1usize..8) {
        let (_tmp, mut fs) = fresh_fs();
        let mut last = 0u32;
        for i in 0..n {
            let ino = fs.create(&format!("f{i}"), 0o644, 0, 0).expect("create");
            if i > 0 {
                prop_assert!(ino > last);
            }
            last = ino;
        }
        // deleting the lowest-numbered file frees its slot back up first.
        fs.unlink("f0").expect("unlink f0");
        let reused = fs.create("reused", 0o644, 0, 0).expect("create");
        prop_assert_eq!(reused, 1);
    }
}

#[test]
fn data_blocks_free_matches_sum_of_allocations() {
    let (_tmp, mut fs) = fresh_fs();
    let a = fs.create("a", 0o644, 0, 0).unwrap();
    let b = fs.create("b", 0o644, 0, 0).unwrap();

    for i in 0..5u32 {
        fs.map(a, i, true).unwrap();
    }
    for i in 0..3u32 {
        fs.map(b, i, true).unwrap();
    }
    assert_eq!(fs.superblock().data_blocks_free, DATA_BLOCKS - 8);

    fs.unlink("a").unwrap();
    assert_eq!(fs.superblock().data_blocks_free, DATA_BLOCKS - 3);
}

#[test]
fn hard_links_counter_tracks_alias_count() {
    let (_tmp, mut fs) = fresh_fs();
    let ino = fs.create("a", 0o644, 0, 0).unwrap();
    assert_eq!(fs.read_inode(ino).unwrap().hard_links, 1);
    fs.link("a", "b").unwrap();
    assert_eq!(fs.read_inode(ino).unwrap().hard_links, 2);
    fs.link("a", "c").unwrap();
    assert_eq!(fs.read_inode(ino).unwrap().hard_links, 3);
    fs.unlink("b").unwrap();
    assert_eq!(fs.read_inode(ino).unwrap().hard_links, 2);
}

#[test]
fn lookup_rejects_overlong_names() {
    let (_tmp, mut fs) = fresh_fs();
    let long = "x".repeat(quickfs::MAX_NAME_LENGTH);
    assert!(matches!(fs.lookup(&long), Err(QuickFsError::NameTooLong)));
    assert!(matches!(
        fs.create(&long, 0o644, 0, 0),
        Err(QuickFsError::NameTooLong)
    ));
}

#[test]
fn map_without_create_stops_at_end_of_file() {
    let (_tmp, mut fs) = fresh_fs();
    let ino = fs.create("a", 0o644, 0, 0).unwrap();
    fs.map(ino, 0, true).unwrap();
    assert!(fs.map(ino, 1, false).unwrap().is_none());
    assert!(fs.map(ino, 0, false).unwrap().is_some());
}
