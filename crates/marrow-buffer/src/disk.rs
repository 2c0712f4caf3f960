//! Disk interface consumed by the buffer pool.

use marrow_common::page::{PageId, PAGE_SIZE};
use marrow_common::Result;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Page-granular persistent storage.
///
/// The buffer pool reads pages through this interface on fetch and
/// writes them back on eviction and flush. Implementations must be safe
/// to call from multiple threads.
pub trait DiskManager: Send + Sync {
    /// Fills `buf` with the contents of the given page.
    ///
    /// Pages that were never written read back as zeroes.
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()>;

    /// Durably writes `buf` as the contents of the given page.
    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()>;
}

/// In-memory disk manager backed by a page map.
///
/// Used by tests and ephemeral databases.
pub struct MemoryDiskManager {
    pages: Mutex<HashMap<PageId, Box<[u8; PAGE_SIZE]>>>,
}

impl MemoryDiskManager {
    /// Creates an empty in-memory disk manager.
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the number of distinct pages ever written.
    pub fn page_count(&self) -> usize {
        self.pages.lock().len()
    }
}

impl Default for MemoryDiskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskManager for MemoryDiskManager {
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let pages = self.pages.lock();
        match pages.get(&page_id) {
            Some(data) => buf.copy_from_slice(&**data),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        self.pages.lock().insert(page_id, Box::new(*buf));
        Ok(())
    }
}
