//! Buffer pool manager.

use crate::disk::DiskManager;
use crate::frame::{BufferFrame, FrameId};
use crate::guard::{PageGuard, PageReadGuard, PageWriteGuard};
use crate::replacer::LruKReplacer;
use log::{debug, trace};
use marrow_common::config::BufferPoolConfig;
use marrow_common::page::{PageId, PAGE_SIZE};
use marrow_common::{MarrowError, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use sysinfo::System;

/// Buffer pool manager.
///
/// Translates between page ids and frame-resident pages:
/// - Page table mapping resident page ids to frames
/// - Free frame list for pages entering the pool
/// - LRU-K replacement for eviction, with dirty write-back
/// - Pin counting, surfaced to callers as guarded page leases
///
/// All bookkeeping lives behind a single mutex. The per-page latch is
/// never acquired while that mutex is held; guards take it after their
/// pin is secured.
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Persistent storage for pages.
    disk: Arc<dyn DiskManager>,
    /// Page table, free list, replacer, and id allocation.
    inner: Mutex<PoolInner>,
}

struct PoolInner {
    /// Resident page id -> frame id.
    page_table: HashMap<PageId, FrameId>,
    /// Frames holding no page.
    free_list: VecDeque<FrameId>,
    /// Page replacement policy.
    replacer: LruKReplacer,
    /// Next page id to hand out.
    next_page_id: i32,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig, disk: Arc<dyn DiskManager>) -> Self {
        let pool_size = config.pool_size;

        let frames: Vec<_> = (0..pool_size)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // All frames start in the free list.
        let free_list: VecDeque<_> = (0..pool_size).map(|i| FrameId(i as u32)).collect();

        Self {
            frames,
            disk,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
                replacer: LruKReplacer::new(pool_size, config.replacer_k),
                next_page_id: 0,
            }),
            config,
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames to ensure useful caching even on low-memory
    /// systems.
    pub fn auto_sized(disk: Arc<dyn DiskManager>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let pool_size = Self::frames_for_memory(sys.available_memory() as usize);
        Self::new(
            BufferPoolConfig {
                pool_size,
                ..BufferPoolConfig::default()
            },
            disk,
        )
    }

    /// Frame count targeting 25% of `available_bytes`, floored at 1,000
    /// frames.
    fn frames_for_memory(available_bytes: usize) -> usize {
        ((available_bytes / 4) / PAGE_SIZE).max(1_000)
    }

    /// Returns the number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.config.pool_size
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.inner.lock().free_list.len()
    }

    /// Returns the number of pages currently resident.
    pub fn page_count(&self) -> usize {
        self.inner.lock().page_table.len()
    }

    /// Returns the number of evictable frames.
    pub fn evictable_count(&self) -> usize {
        self.inner.lock().replacer.size()
    }

    /// Checks if a page is resident in the pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.inner.lock().page_table.contains_key(&page_id)
    }

    /// Acquires a frame for a new resident page, evicting if necessary.
    ///
    /// On return the frame is absent from both the free list and the
    /// replacer, and any previous occupant has been written back and
    /// unmapped.
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let victim = inner.replacer.evict().ok_or(MarrowError::PoolExhausted)?;
        let frame = &self.frames[victim.0 as usize];
        let old_page_id = frame.page_id().expect("evicted frame holds a page");

        if frame.is_dirty() {
            debug!("evicting dirty {old_page_id} from {victim}");
            let data = frame.read_data();
            if let Err(e) = self.disk.write_page(old_page_id, &data) {
                drop(data);
                // Write-back failed: put the victim back so the pool
                // state stays consistent.
                inner.replacer.record_access(victim);
                inner.replacer.set_evictable(victim, true);
                return Err(e);
            }
            frame.set_dirty(false);
        }

        inner.page_table.remove(&old_page_id);
        Ok(victim)
    }

    /// Allocates a fresh page id, installs it in a frame, and pins it.
    ///
    /// The frame's bytes are zeroed.
    fn new_page_pinned(&self) -> Result<(PageId, &BufferFrame)> {
        let mut inner = self.inner.lock();
        let frame_id = self.acquire_frame(&mut inner)?;

        let page_id = PageId(inner.next_page_id);
        inner.next_page_id += 1;

        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);

        Ok((page_id, frame))
    }

    /// Pins the given page, reading it from disk if not resident.
    fn fetch_page_pinned(&self, page_id: PageId) -> Result<&BufferFrame> {
        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            let prev = frame.pin();
            inner.replacer.record_access(frame_id);
            if prev == 0 {
                inner.replacer.set_evictable(frame_id, false);
            }
            return Ok(frame);
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        {
            let mut data = frame.write_data();
            if let Err(e) = self.disk.read_page(page_id, &mut data) {
                drop(data);
                inner.free_list.push_front(frame_id);
                return Err(e);
            }
        }
        frame.set_page_id(Some(page_id));
        frame.pin();

        inner.page_table.insert(page_id, frame_id);
        inner.replacer.record_access(frame_id);
        inner.replacer.set_evictable(frame_id, false);

        Ok(frame)
    }

    /// Allocates a new page and returns it behind a basic (latch-free)
    /// lease.
    pub fn new_page(&self) -> Result<(PageId, PageGuard<'_>)> {
        let (page_id, frame) = self.new_page_pinned()?;
        Ok((page_id, PageGuard::new(self, frame, page_id)))
    }

    /// Allocates a new page and returns it behind a write-latched lease.
    pub fn new_page_write(&self) -> Result<(PageId, PageWriteGuard<'_>)> {
        let (page_id, frame) = self.new_page_pinned()?;
        let latch = frame.write_data();
        Ok((page_id, PageWriteGuard::new(self, page_id, latch)))
    }

    /// Fetches a page behind a basic (latch-free) lease.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PageGuard<'_>> {
        let frame = self.fetch_page_pinned(page_id)?;
        Ok(PageGuard::new(self, frame, page_id))
    }

    /// Fetches a page behind a read-latched lease.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        let frame = self.fetch_page_pinned(page_id)?;
        let latch = frame.read_data();
        Ok(PageReadGuard::new(self, page_id, latch))
    }

    /// Fetches a page behind a write-latched lease.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        let frame = self.fetch_page_pinned(page_id)?;
        let latch = frame.write_data();
        Ok(PageWriteGuard::new(self, page_id, latch))
    }

    /// Drops one pin on a page, OR-ing in the dirty hint.
    ///
    /// Returns `false` if the page is not resident or already unpinned.
    /// When the pin count reaches zero the frame becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.0 as usize];
        if frame.pin_count() == 0 {
            return false;
        }
        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            inner.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes a page to disk unconditionally and clears its dirty flag.
    ///
    /// Returns `Ok(false)` if the page is not resident. The pool mutex
    /// is not held while waiting for the page latch; the frame is
    /// pinned instead so it cannot be repurposed underneath the flush.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let frame = {
            let mut inner = self.inner.lock();
            let Some(&frame_id) = inner.page_table.get(&page_id) else {
                return Ok(false);
            };
            let frame = &self.frames[frame_id.0 as usize];
            if frame.pin() == 0 {
                inner.replacer.set_evictable(frame_id, false);
            }
            frame
        };

        let write_result = {
            let data = frame.read_data();
            let result = self.disk.write_page(page_id, &data);
            if result.is_ok() {
                frame.set_dirty(false);
            }
            result
        };
        self.unpin_page(page_id, false);
        write_result?;
        trace!("flushed {page_id}");
        Ok(true)
    }

    /// Writes every resident page to disk and clears all dirty flags.
    pub fn flush_all_pages(&self) -> Result<()> {
        // Collect first; pages evicted in the meantime flush as no-ops.
        let page_ids: Vec<PageId> = self.inner.lock().page_table.keys().copied().collect();
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Removes a page from the pool, returning its frame to the free
    /// list.
    ///
    /// Returns `Ok(true)` if the page is absent or was removed,
    /// `Ok(false)` if it is pinned. Dirty pages are written back first.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.inner.lock();
        let Some(&frame_id) = inner.page_table.get(&page_id) else {
            return Ok(true);
        };
        let frame = &self.frames[frame_id.0 as usize];
        if frame.pin_count() > 0 {
            return Ok(false);
        }
        if frame.is_dirty() {
            let data = frame.read_data();
            self.disk.write_page(page_id, &data)?;
            frame.set_dirty(false);
        }
        inner.page_table.remove(&page_id);
        inner.replacer.remove(frame_id);
        frame.reset();
        inner.free_list.push_back(frame_id);
        Ok(true)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let inner = self.inner.lock();
        let mut pinned_count = 0;
        let mut dirty_count = 0;

        for &frame_id in inner.page_table.values() {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                pinned_count += 1;
            }
            if frame.is_dirty() {
                dirty_count += 1;
            }
        }

        BufferPoolStats {
            total_frames: self.config.pool_size,
            free_frames: inner.free_list.len(),
            resident_pages: inner.page_table.len(),
            pinned_frames: pinned_count,
            dirty_frames: dirty_count,
            evictable_frames: inner.replacer.size(),
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of resident pages.
    pub resident_pages: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
    /// Number of evictable frames.
    pub evictable_frames: usize,
}
