//! Block device abstraction. Per the core's scope, generic VFS buffer-cache
//! dispatch is an external collaborator -- all the core asks of it is "read
//! block N", "write block N", and a block count. [`FileBlockDevice`] is a
//! host-backed implementation over a plain file, used by the formatter, the
//! test suite, and any caller without a real kernel buffer cache.

use quickfs::BLOCK_SIZE;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

pub trait BlockDevice {
    /// Reads the 512-byte block at `block_num` into `buf`.
    fn read_block(&mut self, block_num: u64, buf: &mut [u8; BLOCK_SIZE]) -> std::io::Result<()>;

    /// Writes `buf` to the 512-byte block at `block_num`.
    fn write_block(&mut self, block_num: u64, buf: &[u8; BLOCK_SIZE]) -> std::io::Result<()>;

    /// Total number of 512-byte blocks backing this device.
    fn block_count(&self) -> u64;
}

/// A QuickFS image backed by a plain file, sized to the device's intended
/// length ahead of time (the formatter uses it as-is, per spec).
pub struct FileBlockDevice {
    file: File,
    block_count: u64,
}

impl FileBlockDevice {
    pub fn open(file: File) -> std::io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            block_count: len / BLOCK_SIZE as u64,
        })
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_block(&mut self, block_num: u64, buf: &mut [u8; BLOCK_SIZE]) -> std::io::Result<()> {
        self.file
            .seek(SeekFrom::Start(block_num * BLOCK_SIZE as u64))?;
        self.file.read_exact(buf)
    }

    fn write_block(&mut self, block_num: u64, buf: &[u8; BLOCK_SIZE]) -> std::io::Result<()> {
        self.file
            .seek(SeekFrom::Start(block_num * BLOCK_SIZE as u64))?;
        self.file.write_all(buf)
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }
}
