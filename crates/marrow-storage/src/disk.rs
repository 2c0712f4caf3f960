//! File-backed disk manager for page-level I/O.

use marrow_buffer::DiskManager;
use marrow_common::config::StorageConfig;
use marrow_common::page::{PageId, PAGE_SIZE};
use marrow_common::{MarrowError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Manages reading and writing pages to a single data file.
///
/// Page `n` lives at byte offset `n * PAGE_SIZE`. Reads past the end of
/// the file yield zeroed bytes, which covers pages the pool has
/// allocated but never written back yet.
pub struct FileDiskManager {
    /// Path to the data file.
    path: PathBuf,
    /// Enable fsync after writes.
    fsync_enabled: bool,
    /// The data file handle.
    file: Mutex<File>,
}

impl FileDiskManager {
    /// Opens the data file named by the storage configuration.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::open(&config.data_path, config.fsync_enabled)
    }

    /// Opens or creates the data file at `path`.
    pub fn open(path: impl AsRef<Path>, fsync_enabled: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        Ok(Self {
            path,
            fsync_enabled,
            file: Mutex::new(file),
        })
    }

    /// Returns the data file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of whole pages currently in the file.
    pub fn num_pages(&self) -> Result<u32> {
        let file = self.file.lock();
        let len = file.metadata()?.len();
        Ok((len / PAGE_SIZE as u64) as u32)
    }
}

impl DiskManager for FileDiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        if !page_id.is_valid() {
            return Err(MarrowError::PageNotFound(page_id));
        }

        let mut file = self.file.lock();
        let offset = page_id.0 as u64 * PAGE_SIZE as u64;
        let len = file.metadata()?.len();
        if offset >= len {
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < PAGE_SIZE {
            let n = file.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        // Short read at EOF: the tail reads as zeroes.
        buf[total..].fill(0);
        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        if !page_id.is_valid() {
            return Err(MarrowError::PageNotFound(page_id));
        }

        let mut file = self.file.lock();
        let offset = page_id.0 as u64 * PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;

        if self.fsync_enabled {
            file.sync_all()?;
        }
        Ok(())
    }
}
