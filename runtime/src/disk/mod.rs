//! Raw disk assembly.
//!
//! Merges three partition images into one bootable raw disk:
//!
//! ```text
//! offset 0            MBR image (over the freshly written partition table)
//! offset boot_offset  boot partition image     (default 4 MiB)
//! offset root_offset  root partition image     (default 104 MiB)
//! capacity            end of disk              (default 2 GiB)
//! ```

mod table;

pub use self::table::{GptPartitioner, PlannedPartition, DEFAULT_DISK_SIGNATURE};

use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use gom_core::config::DiskLayout;
use gom_core::error::{MachineError, Result};

/// The three partition image files a disk is assembled from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionFiles {
    pub mbr: PathBuf,
    pub boot: PathBuf,
    pub root: PathBuf,
}

impl PartitionFiles {
    pub const MBR_FILE_NAME: &'static str = "mbr.img";
    pub const BOOT_FILE_NAME: &'static str = "boot.img";
    pub const ROOT_FILE_NAME: &'static str = "root.img";

    /// Conventional partition file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            mbr: dir.join(Self::MBR_FILE_NAME),
            boot: dir.join(Self::BOOT_FILE_NAME),
            root: dir.join(Self::ROOT_FILE_NAME),
        }
    }

    /// Whether all three files exist.
    pub fn exist(&self) -> bool {
        self.mbr.is_file() && self.boot.is_file() && self.root.is_file()
    }
}

/// Writes a partition table into a freshly sized disk file.
pub trait PartitionTableWriter: Send + Sync {
    fn write_table(&self, disk: &mut File, capacity: u64) -> Result<()>;
}

/// Builds raw disk images from partition files.
pub struct DiskAssembler {
    layout: DiskLayout,
    partitioner: Box<dyn PartitionTableWriter>,
}

impl DiskAssembler {
    /// Create an assembler writing a GPT for `layout`.
    pub fn new(layout: DiskLayout) -> Self {
        Self::with_partitioner(layout, Box::new(GptPartitioner::new(layout)))
    }

    pub fn with_partitioner(layout: DiskLayout, partitioner: Box<dyn PartitionTableWriter>) -> Self {
        Self {
            layout,
            partitioner,
        }
    }

    pub fn layout(&self) -> &DiskLayout {
        &self.layout
    }

    /// Check that every partition image fits its region of the disk.
    pub fn check_sizes(&self, parts: &PartitionFiles) -> Result<()> {
        let regions = [
            ("mbr", &parts.mbr, self.layout.mbr_limit()),
            ("boot", &parts.boot, self.layout.boot_limit()),
            ("root", &parts.root, self.layout.root_limit()),
        ];

        for (partition, path, limit) in regions {
            let size = fs::metadata(path)
                .map_err(|e| {
                    MachineError::DiskError(format!(
                        "error reading {} partition file {}: {}",
                        partition,
                        path.display(),
                        e
                    ))
                })?
                .len();

            if size > limit {
                return Err(MachineError::PartitionTooLarge {
                    partition: partition.to_string(),
                    size,
                    limit,
                });
            }
        }

        Ok(())
    }

    /// Assemble `parts` into a raw disk at `dest`.
    ///
    /// On failure the partially written destination is left in place.
    pub fn assemble(&self, parts: &PartitionFiles, dest: &Path) -> Result<()> {
        self.check_sizes(parts)?;

        tracing::info!(
            mbr = %parts.mbr.display(),
            boot = %parts.boot.display(),
            root = %parts.root.display(),
            dest = %dest.display(),
            "Merging partition images into a single disk image"
        );

        // Read access too: the table writer reads back what it wrote
        let mut disk = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(dest)
            .map_err(|e| {
                MachineError::DiskError(format!(
                    "error creating destination disk file {}: {}",
                    dest.display(),
                    e
                ))
            })?;

        disk.set_len(self.layout.capacity)
            .map_err(|e| MachineError::DiskError(format!("error preparing disk file: {}", e)))?;

        self.partitioner.write_table(&mut disk, self.layout.capacity)?;

        // The MBR goes after the table so it lands on top of it
        copy_at(&mut disk, self.layout.boot_offset, &parts.boot, "boot")?;
        copy_at(&mut disk, 0, &parts.mbr, "mbr")?;
        copy_at(&mut disk, self.layout.root_offset, &parts.root, "root")?;

        tracing::debug!(dest = %dest.display(), capacity = self.layout.capacity, "Disk image assembled");

        Ok(())
    }
}

/// Copy all of `source` into `disk` starting at `offset`.
fn copy_at(disk: &mut File, offset: u64, source: &Path, partition: &str) -> Result<u64> {
    disk.seek(SeekFrom::Start(offset)).map_err(|e| {
        MachineError::DiskError(format!(
            "error seeking to {} partition start: {}",
            partition, e
        ))
    })?;

    let mut src = File::open(source).map_err(|e| {
        MachineError::DiskError(format!(
            "error opening {} partition file {}: {}",
            partition,
            source.display(),
            e
        ))
    })?;

    io::copy(&mut src, disk).map_err(|e| {
        MachineError::DiskError(format!(
            "error writing {} partition to disk file: {}",
            partition, e
        ))
    })
}
