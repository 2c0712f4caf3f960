//! Scoped page leases over the buffer pool.
//!
//! A guard owns exactly one pin on a page, optionally together with the
//! page's reader or writer latch. Dropping a guard releases the latch
//! first and then returns the pin to the pool; the latch must come off
//! before the unpin so that no other thread can evict a page whose latch
//! is still held.

use crate::frame::BufferFrame;
use crate::pool::BufferPool;
use marrow_common::page::{PageId, PAGE_SIZE};
use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

type PageData = Box<[u8; PAGE_SIZE]>;

/// Lease of a pinned page with no latch held.
///
/// `read` and `write` take the page latch per access; `write` records a
/// dirty hint that reaches the pool when the guard drops.
pub struct PageGuard<'a> {
    pool: &'a BufferPool,
    frame: &'a BufferFrame,
    page_id: PageId,
    dirty: bool,
}

impl<'a> PageGuard<'a> {
    pub(crate) fn new(pool: &'a BufferPool, frame: &'a BufferFrame, page_id: PageId) -> Self {
        Self {
            pool,
            frame,
            page_id,
            dirty: false,
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Takes the shared latch and returns the page data.
    pub fn read(&self) -> RwLockReadGuard<'_, PageData> {
        self.frame.read_data()
    }

    /// Takes the exclusive latch, marks the lease dirty, and returns the
    /// page data.
    pub fn write(&mut self) -> RwLockWriteGuard<'_, PageData> {
        self.dirty = true;
        self.frame.write_data()
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page_id, self.dirty);
    }
}

/// Lease of a pinned page holding the shared page latch for its whole
/// lifetime.
pub struct PageReadGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    latch: Option<RwLockReadGuard<'a, PageData>>,
}

impl<'a> PageReadGuard<'a> {
    pub(crate) fn new(
        pool: &'a BufferPool,
        page_id: PageId,
        latch: RwLockReadGuard<'a, PageData>,
    ) -> Self {
        Self {
            pool,
            page_id,
            latch: Some(latch),
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page data.
    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        let latch = self.latch.as_ref().expect("read guard already released");
        latch
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        if let Some(latch) = self.latch.take() {
            // Latch before pin.
            drop(latch);
            self.pool.unpin_page(self.page_id, false);
        }
    }
}

/// Lease of a pinned page holding the exclusive page latch for its whole
/// lifetime.
///
/// `data_mut` marks the lease dirty; the hint reaches the pool on unpin.
pub struct PageWriteGuard<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    dirty: bool,
    latch: Option<RwLockWriteGuard<'a, PageData>>,
}

impl<'a> PageWriteGuard<'a> {
    pub(crate) fn new(
        pool: &'a BufferPool,
        page_id: PageId,
        latch: RwLockWriteGuard<'a, PageData>,
    ) -> Self {
        Self {
            pool,
            page_id,
            dirty: false,
            latch: Some(latch),
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page data without marking the lease dirty.
    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        let latch = self.latch.as_ref().expect("write guard already released");
        latch
    }

    /// Returns the page data mutably, marking the lease dirty.
    pub fn data_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        self.dirty = true;
        let latch = self.latch.as_mut().expect("write guard already released");
        latch
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        if let Some(latch) = self.latch.take() {
            // Latch before pin.
            drop(latch);
            self.pool.unpin_page(self.page_id, self.dirty);
        }
    }
}
