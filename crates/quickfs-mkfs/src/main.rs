use anyhow::{bail, Context};
use clap::Parser;
use quickfs::BLOCK_SIZE;
use quickfs_core::format;
use quickfs_core::BlockDevice as _;
use std::fs::OpenOptions;
use std::path::PathBuf;

/// Formats a disk image (or regular file) with the QuickFS layout.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Path to the disk image to format.
    disk: PathBuf,

    /// Size to create the image at, in bytes, if it doesn't already exist.
    /// Ignored for an existing file.
    #[arg(short, long)]
    size: Option<u64>,

    /// Overwrite an existing, already-formatted image.
    #[arg(short, long)]
    force: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let exists = cli.disk.exists();
    if exists && !cli.force {
        bail!(
            "{} already exists; pass --force to reformat it",
            cli.disk.display()
        );
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&cli.disk)
        .with_context(|| format!("opening {}", cli.disk.display()))?;

    if !exists {
        let size = cli.size.unwrap_or(8 * 1024 * 1024);
        file.set_len(size)
            .with_context(|| format!("sizing {} to {size} bytes", cli.disk.display()))?;
    }

    let mut device = quickfs_core::FileBlockDevice::open(file)
        .with_context(|| format!("opening {} as a block device", cli.disk.display()))?;
    let blocks = device.block_count();
    if blocks == 0 {
        bail!(
            "{} is not large enough to hold a single block ({BLOCK_SIZE} bytes)",
            cli.disk.display()
        );
    }

    format::format(&mut device).context("formatting image")?;
    println!(
        "formatted {} ({} blocks, {} bytes per block)",
        cli.disk.display(),
        blocks,
        BLOCK_SIZE
    );
    Ok(())
}
