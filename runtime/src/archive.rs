//! Bundle archive extraction.
//!
//! A bundle is a zip container holding exactly four named entries:
//!
//! ```text
//! disk.gaf
//! ├── mbr.img     (partition table + bootstrap code)
//! ├── boot.img    (boot partition image)
//! ├── root.img    (root filesystem image)
//! └── sbom.json   (software bill of materials)
//! ```
//!
//! Other entries are ignored. A bundle missing any of the four is rejected
//! as a whole.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use gom_core::error::{MachineError, Result};
use zip::ZipArchive;

use crate::disk::PartitionFiles;

/// Conventional file name of a bundle inside a pulled artifact.
pub const BUNDLE_FILE_NAME: &str = "disk.gaf";

/// The fixed entries of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveEntry {
    Mbr,
    Boot,
    Root,
    Sbom,
}

impl ArchiveEntry {
    pub const ALL: [ArchiveEntry; 4] = [
        ArchiveEntry::Mbr,
        ArchiveEntry::Boot,
        ArchiveEntry::Root,
        ArchiveEntry::Sbom,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            ArchiveEntry::Mbr => "mbr.img",
            ArchiveEntry::Boot => "boot.img",
            ArchiveEntry::Root => "root.img",
            ArchiveEntry::Sbom => "sbom.json",
        }
    }
}

/// Read-only window over the first `size` bytes of a seekable source.
struct SizedSource<R> {
    inner: R,
    size: u64,
    pos: u64,
}

impl<R: Seek> SizedSource<R> {
    fn new(mut inner: R, size: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            size,
            pos: 0,
        })
    }
}

impl<R: Read> Read for SizedSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size {
            return Ok(0);
        }
        let max = (self.size - self.pos).min(buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..max])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Seek> Seek for SizedSource<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(off) => self.size.checked_add_signed(off),
            SeekFrom::Current(off) => self.pos.checked_add_signed(off),
        }
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of archive")
        })?;

        self.inner.seek(SeekFrom::Start(target))?;
        self.pos = target;
        Ok(target)
    }
}

/// Files written by [`ArchiveParts::unpack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackedArchive {
    pub partitions: PartitionFiles,
    pub sbom: PathBuf,
}

/// A parsed bundle with all four fixed entries present.
pub struct ArchiveParts<R> {
    archive: ZipArchive<SizedSource<R>>,
}

/// Parse the first `size` bytes of `source` as a bundle archive.
///
/// Fails with [`MachineError::MalformedArchive`] when any fixed entry is
/// missing, and with [`MachineError::ArchiveError`] when the source is not a
/// readable zip container.
pub fn extract<R: Read + Seek>(source: R, size: u64) -> Result<ArchiveParts<R>> {
    let window = SizedSource::new(source, size)?;
    let archive = ZipArchive::new(window)
        .map_err(|e| MachineError::ArchiveError(format!("error reading zip archive: {}", e)))?;

    let complete = {
        let names: HashSet<&str> = archive.file_names().collect();
        ArchiveEntry::ALL
            .iter()
            .all(|entry| names.contains(entry.file_name()))
    };
    if !complete {
        return Err(MachineError::MalformedArchive);
    }

    Ok(ArchiveParts { archive })
}

/// Open the bundle at `path` and extract it.
pub fn extract_file(path: &Path) -> Result<ArchiveParts<File>> {
    let file = File::open(path).map_err(|e| {
        MachineError::ArchiveError(format!("unable to open archive {}: {}", path.display(), e))
    })?;
    let size = file.metadata()?.len();
    extract(file, size)
}

impl<R: Read + Seek> ArchiveParts<R> {
    /// Stream the decompressed content of one entry.
    pub fn open(&mut self, entry: ArchiveEntry) -> Result<Box<dyn Read + '_>> {
        let file = self.archive.by_name(entry.file_name()).map_err(|e| {
            MachineError::ArchiveError(format!("unable to open {}: {}", entry.file_name(), e))
        })?;
        Ok(Box::new(file))
    }

    /// Persist every fixed entry into `dir` under its fixed name.
    ///
    /// Existing files with the same names are overwritten.
    pub fn unpack(&mut self, dir: &Path) -> Result<UnpackedArchive> {
        for entry in ArchiveEntry::ALL {
            let dest = dir.join(entry.file_name());
            let mut out = File::create(&dest)?;
            let mut reader = self.open(entry)?;
            let written = io::copy(&mut reader, &mut out).map_err(|e| {
                MachineError::ArchiveError(format!(
                    "unable to extract {}: {}",
                    entry.file_name(),
                    e
                ))
            })?;

            tracing::debug!(
                entry = entry.file_name(),
                bytes = written,
                dest = %dest.display(),
                "Extracted archive entry"
            );
        }

        Ok(UnpackedArchive {
            partitions: PartitionFiles::in_dir(dir),
            sbom: dir.join(ArchiveEntry::Sbom.file_name()),
        })
    }
}
