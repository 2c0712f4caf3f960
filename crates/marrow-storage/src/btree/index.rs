//! Concurrent B+ tree index over the buffer pool.

use super::iter::IndexIterator;
use super::page::{
    BTreeHeaderPage, BTreeHeaderPageMut, BTreeInternalPage, BTreeInternalPageMut, BTreeLeafPage,
    BTreeLeafPageMut, BTreePage, INTERNAL_PAGE_CAPACITY, LEAF_PAGE_CAPACITY,
};
use log::debug;
use marrow_buffer::{BufferPool, PageWriteGuard};
use marrow_common::page::{PageId, Rid};
use marrow_common::{MarrowError, Result};
use std::sync::Arc;

/// Which mutation a write descent serves.
///
/// The two differ only in when a child counts as safe: an insert cannot
/// propagate a split past a child with room, a remove cannot propagate
/// a merge past a child above its minimum.
#[derive(Clone, Copy)]
enum WriteOp {
    Insert,
    Remove,
}

/// Leases held during a write descent.
///
/// `write_set` is the chain of write leases from the shallowest unsafe
/// node down to the current node; `header` is the tree-level lease that
/// pins the root id until the root is proven stable.
struct WriteContext<'a> {
    header: Option<PageWriteGuard<'a>>,
    write_set: Vec<PageWriteGuard<'a>>,
    root_page_id: PageId,
}

impl WriteContext<'_> {
    /// Keeps only the deepest lease, dropping every ancestor and the
    /// header lease.
    fn release_ancestors(&mut self) {
        if let Some(last) = self.write_set.pop() {
            self.write_set.clear();
            self.write_set.push(last);
        }
        self.header = None;
    }
}

/// B+ tree index mapping `i64` keys to record ids.
///
/// Keys are unique; `insert` reports duplicates through its boolean
/// return. Concurrent operations coordinate by latch crabbing over the
/// buffer pool's page leases: searches hold at most two read leases at
/// a time, and mutations grow a chain of write leases downward,
/// releasing all ancestors as soon as the newly latched child is safe.
///
/// The pool must have room to pin a root-to-leaf path plus a few split
/// pages at once, and it must outlive the tree; operations surface the
/// pool's `PoolExhausted` error unchanged.
pub struct BPlusTree {
    name: String,
    header_page_id: PageId,
    bpm: Arc<BufferPool>,
    leaf_max_size: i32,
    internal_max_size: i32,
}

impl BPlusTree {
    /// Creates an index whose header page is `header_page_id`.
    ///
    /// The header page must already be allocated from the pool; its
    /// root pointer is reset, so the tree starts out empty.
    pub fn new(
        name: impl Into<String>,
        header_page_id: PageId,
        bpm: Arc<BufferPool>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        if leaf_max_size < 2 || leaf_max_size > LEAF_PAGE_CAPACITY {
            return Err(MarrowError::InvalidParameter {
                name: "leaf_max_size".to_string(),
                value: leaf_max_size.to_string(),
            });
        }
        if internal_max_size < 3 || internal_max_size > INTERNAL_PAGE_CAPACITY {
            return Err(MarrowError::InvalidParameter {
                name: "internal_max_size".to_string(),
                value: internal_max_size.to_string(),
            });
        }

        let name = name.into();
        {
            let mut header = bpm.fetch_page_write(header_page_id)?;
            BTreeHeaderPageMut::new(header.data_mut()).set_root_page_id(PageId::INVALID);
        }
        debug!("created index {name}: leaf_max={leaf_max_size} internal_max={internal_max_size}");

        Ok(Self {
            name,
            header_page_id,
            bpm,
            leaf_max_size: leaf_max_size as i32,
            internal_max_size: internal_max_size as i32,
        })
    }

    /// Returns true if the tree holds no keys.
    pub fn is_empty(&self) -> Result<bool> {
        let guard = self.bpm.fetch_page(self.header_page_id)?;
        let data = guard.read();
        Ok(!BTreeHeaderPage::new(&data[..]).root_page_id().is_valid())
    }

    /// Returns the current root page id, `PageId::INVALID` when empty.
    pub fn root_page_id(&self) -> Result<PageId> {
        let guard = self.bpm.fetch_page_read(self.header_page_id)?;
        Ok(BTreeHeaderPage::new(guard.data()).root_page_id())
    }

    /// Point query: the rid stored under `key`, if any.
    ///
    /// Descends with read crabbing, releasing each ancestor lease the
    /// moment the child lease is in hand.
    pub fn get_value(&self, key: i64) -> Result<Option<Rid>> {
        let header = self.bpm.fetch_page_read(self.header_page_id)?;
        let root_id = BTreeHeaderPage::new(header.data()).root_page_id();
        if !root_id.is_valid() {
            return Ok(None);
        }

        let mut guard = self.bpm.fetch_page_read(root_id)?;
        drop(header);
        loop {
            if BTreePage::new(guard.data()).try_is_leaf()? {
                break;
            }
            let child = BTreeInternalPage::new(guard.data()).child_for(key);
            // The child lease is acquired before the assignment drops
            // the parent's.
            guard = self.bpm.fetch_page_read(child)?;
        }

        let leaf = BTreeLeafPage::new(guard.data());
        Ok(leaf.find_key(key).map(|i| leaf.rid_at(i)))
    }

    /// Inserts `key -> rid`. Returns false if the key already exists.
    pub fn insert(&self, key: i64, rid: Rid) -> Result<bool> {
        let mut header = self.bpm.fetch_page_write(self.header_page_id)?;
        let root_id = BTreeHeaderPage::new(header.data()).root_page_id();

        if !root_id.is_valid() {
            // Empty tree: the new leaf becomes the root.
            let (leaf_id, mut leaf) = self.bpm.new_page_write()?;
            let mut view = BTreeLeafPageMut::new(leaf.data_mut());
            view.init(self.leaf_max_size);
            view.insert_at(0, key, rid);
            BTreeHeaderPageMut::new(header.data_mut()).set_root_page_id(leaf_id);
            debug!("index {}: started tree at root leaf {leaf_id}", self.name);
            return Ok(true);
        }

        let mut ctx = WriteContext {
            header: Some(header),
            write_set: Vec::new(),
            root_page_id: root_id,
        };
        ctx.write_set.push(self.bpm.fetch_page_write(root_id)?);
        self.descend_to_leaf(&mut ctx, key, WriteOp::Insert)?;

        let (pos, duplicate, full) = {
            let guard = ctx.write_set.last().expect("descent ends at a leaf");
            let leaf = BTreeLeafPage::new(guard.data());
            let pos = leaf.lower_bound(key);
            let duplicate = pos < leaf.size() as usize && leaf.key_at(pos) == key;
            (pos, duplicate, leaf.size() >= leaf.max_size())
        };
        if duplicate {
            return Ok(false);
        }
        if !full {
            let guard = ctx.write_set.last_mut().expect("descent ends at a leaf");
            BTreeLeafPageMut::new(guard.data_mut()).insert_at(pos, key, rid);
            return Ok(true);
        }

        let split = self.split_leaf(&mut ctx, pos, key, rid)?;
        self.insert_into_parent(&mut ctx, split)?;
        Ok(true)
    }

    /// Removes `key` if present, rebalancing as needed.
    pub fn remove(&self, key: i64) -> Result<()> {
        let header = self.bpm.fetch_page_write(self.header_page_id)?;
        let root_id = BTreeHeaderPage::new(header.data()).root_page_id();
        if !root_id.is_valid() {
            return Ok(());
        }

        let mut ctx = WriteContext {
            header: Some(header),
            write_set: Vec::new(),
            root_page_id: root_id,
        };
        ctx.write_set.push(self.bpm.fetch_page_write(root_id)?);
        self.descend_to_leaf(&mut ctx, key, WriteOp::Remove)?;

        let removed = {
            let guard = ctx.write_set.last_mut().expect("descent ends at a leaf");
            match BTreeLeafPage::new(guard.data()).find_key(key) {
                None => false,
                Some(i) => {
                    BTreeLeafPageMut::new(guard.data_mut()).remove_at(i);
                    true
                }
            }
        };
        if !removed {
            return Ok(());
        }
        self.rebalance(&mut ctx)
    }

    /// Iterator positioned at the smallest key.
    pub fn iter(&self) -> Result<IndexIterator<'_>> {
        let header = self.bpm.fetch_page_read(self.header_page_id)?;
        let root_id = BTreeHeaderPage::new(header.data()).root_page_id();
        if !root_id.is_valid() {
            return Ok(IndexIterator::end(&self.bpm));
        }

        let mut guard = self.bpm.fetch_page_read(root_id)?;
        drop(header);
        loop {
            if BTreePage::new(guard.data()).try_is_leaf()? {
                break;
            }
            let child = BTreeInternalPage::new(guard.data()).child_at(0);
            guard = self.bpm.fetch_page_read(child)?;
        }
        Ok(IndexIterator::new(&self.bpm, guard, 0))
    }

    /// Iterator positioned at the first key >= `key`.
    ///
    /// Yields the end iterator when no such slot exists on the leaf the
    /// probe lands in.
    pub fn iter_from(&self, key: i64) -> Result<IndexIterator<'_>> {
        let header = self.bpm.fetch_page_read(self.header_page_id)?;
        let root_id = BTreeHeaderPage::new(header.data()).root_page_id();
        if !root_id.is_valid() {
            return Ok(IndexIterator::end(&self.bpm));
        }

        let mut guard = self.bpm.fetch_page_read(root_id)?;
        drop(header);
        loop {
            if BTreePage::new(guard.data()).try_is_leaf()? {
                break;
            }
            let child = BTreeInternalPage::new(guard.data()).child_for(key);
            guard = self.bpm.fetch_page_read(child)?;
        }

        let pos = BTreeLeafPage::new(guard.data()).lower_bound(key);
        if pos == BTreeLeafPage::new(guard.data()).size() as usize {
            return Ok(IndexIterator::end(&self.bpm));
        }
        Ok(IndexIterator::new(&self.bpm, guard, pos))
    }

    /// Extends the write-lease chain down to the leaf covering `key`.
    ///
    /// Each newly latched child that is safe for `op` cuts the chain:
    /// every ancestor lease, the header's included, is released before
    /// descending further.
    fn descend_to_leaf<'a>(
        &'a self,
        ctx: &mut WriteContext<'a>,
        key: i64,
        op: WriteOp,
    ) -> Result<()> {
        loop {
            let child_id = {
                let guard = ctx.write_set.last().expect("descent requires a root lease");
                if BTreePage::new(guard.data()).try_is_leaf()? {
                    return Ok(());
                }
                BTreeInternalPage::new(guard.data()).child_for(key)
            };

            let child = self.bpm.fetch_page_write(child_id)?;
            let safe = {
                let page = BTreePage::new(child.data());
                match op {
                    WriteOp::Insert => page.size() < page.max_size(),
                    WriteOp::Remove => page.size() > page.min_size(),
                }
            };
            ctx.write_set.push(child);
            if safe {
                ctx.release_ancestors();
            }
        }
    }

    /// Splits the full leaf at the bottom of the chain, inserting the
    /// new pair in the process.
    ///
    /// Returns `(separator, left id, right id)` for the parent. The
    /// leaf's lease is popped; split propagation continues bottom-up
    /// over the remaining chain.
    fn split_leaf<'a>(
        &'a self,
        ctx: &mut WriteContext<'a>,
        pos: usize,
        key: i64,
        rid: Rid,
    ) -> Result<(i64, PageId, PageId)> {
        let mut old_guard = ctx.write_set.pop().expect("leaf split requires a lease");
        let old_id = old_guard.page_id();
        let (new_id, mut new_guard) = self.bpm.new_page_write()?;

        let mut old_leaf = BTreeLeafPageMut::new(old_guard.data_mut());
        let mut new_leaf = BTreeLeafPageMut::new(new_guard.data_mut());
        new_leaf.init(self.leaf_max_size);

        // Conceptual max+1 sequence with the new pair at its sorted
        // position.
        let size = old_leaf.size() as usize;
        let mut entries: Vec<(i64, Rid)> = Vec::with_capacity(size + 1);
        for i in 0..pos {
            entries.push((old_leaf.key_at(i), old_leaf.rid_at(i)));
        }
        entries.push((key, rid));
        for i in pos..size {
            entries.push((old_leaf.key_at(i), old_leaf.rid_at(i)));
        }

        let min = ((self.leaf_max_size + 1) / 2) as usize;
        for (i, &(k, r)) in entries[..min].iter().enumerate() {
            old_leaf.set_entry(i, k, r);
        }
        old_leaf.set_size(min as i32);
        for (i, &(k, r)) in entries[min..].iter().enumerate() {
            new_leaf.set_entry(i, k, r);
        }
        new_leaf.set_size((entries.len() - min) as i32);

        new_leaf.set_next_page_id(old_leaf.next_page_id());
        old_leaf.set_next_page_id(new_id);

        debug!("index {}: split leaf {old_id} -> {new_id}", self.name);
        Ok((entries[min].0, old_id, new_id))
    }

    /// Installs a split's separator into the parent, splitting upward
    /// as long as parents are full; an empty chain means the root
    /// itself split and the tree grows a level.
    fn insert_into_parent<'a>(
        &'a self,
        ctx: &mut WriteContext<'a>,
        mut split: (i64, PageId, PageId),
    ) -> Result<()> {
        loop {
            let (key, old_id, new_id) = split;

            if ctx.write_set.is_empty() {
                let (root_id, mut root_guard) = self.bpm.new_page_write()?;
                {
                    let mut root = BTreeInternalPageMut::new(root_guard.data_mut());
                    root.init(self.internal_max_size);
                    root.set_child_at(0, old_id);
                    root.set_entry(1, key, new_id);
                    root.set_size(2);
                }
                let header = ctx
                    .header
                    .as_mut()
                    .expect("root split requires the header lease");
                BTreeHeaderPageMut::new(header.data_mut()).set_root_page_id(root_id);
                debug!("index {}: grew to new root {root_id}", self.name);
                return Ok(());
            }

            let full = {
                let guard = ctx.write_set.last().expect("checked non-empty");
                let page = BTreePage::new(guard.data());
                page.size() >= page.max_size()
            };
            if !full {
                let guard = ctx.write_set.last_mut().expect("checked non-empty");
                let mut parent = BTreeInternalPageMut::new(guard.data_mut());
                let pos = parent.find_child(old_id).ok_or_else(|| {
                    MarrowError::TreeCorrupted(format!("split child {old_id} missing from parent"))
                })?;
                parent.insert_at(pos + 1, key, new_id);
                return Ok(());
            }

            split = self.split_internal(ctx, key, old_id, new_id)?;
        }
    }

    /// Splits the full internal node at the bottom of the chain while
    /// inserting `(key, new_child)` after `old_child`.
    ///
    /// The entry at the split boundary is promoted: its key returns to
    /// the caller for the grandparent, its child becomes the new node's
    /// leftmost pointer.
    fn split_internal<'a>(
        &'a self,
        ctx: &mut WriteContext<'a>,
        key: i64,
        old_child: PageId,
        new_child: PageId,
    ) -> Result<(i64, PageId, PageId)> {
        let mut old_guard = ctx.write_set.pop().expect("internal split requires a lease");
        let old_id = old_guard.page_id();
        let (new_id, mut new_guard) = self.bpm.new_page_write()?;

        let mut old_page = BTreeInternalPageMut::new(old_guard.data_mut());
        let mut new_page = BTreeInternalPageMut::new(new_guard.data_mut());
        new_page.init(self.internal_max_size);

        let size = old_page.size() as usize;
        let pos = old_page.find_child(old_child).ok_or_else(|| {
            MarrowError::TreeCorrupted(format!("split child {old_child} missing from parent"))
        })?;

        // Conceptual max+1 sequence of (key, child) entries with the new
        // child spliced in after its left sibling; slot 0's key is
        // carried along but never read.
        let mut entries: Vec<(i64, PageId)> = Vec::with_capacity(size + 1);
        for i in 0..=pos {
            entries.push((old_page.key_at(i), old_page.child_at(i)));
        }
        entries.push((key, new_child));
        for i in pos + 1..size {
            entries.push((old_page.key_at(i), old_page.child_at(i)));
        }

        let min = ((self.internal_max_size + 1) / 2) as usize;
        for (i, &(k, c)) in entries[..min].iter().enumerate() {
            old_page.set_entry(i, k, c);
        }
        old_page.set_size(min as i32);

        let (promoted, boundary_child) = entries[min];
        new_page.set_child_at(0, boundary_child);
        for (i, &(k, c)) in entries[min + 1..].iter().enumerate() {
            new_page.set_entry(i + 1, k, c);
        }
        new_page.set_size((entries.len() - min) as i32);

        debug!("index {}: split internal {old_id} -> {new_id}", self.name);
        Ok((promoted, old_id, new_id))
    }

    /// Walks the held chain upward after a deletion, shrinking the root
    /// or merging/borrowing at each underfull node.
    fn rebalance<'a>(&'a self, ctx: &mut WriteContext<'a>) -> Result<()> {
        loop {
            let (node_id, size, min, is_leaf) = {
                let guard = ctx.write_set.last().expect("rebalance requires a lease");
                let page = BTreePage::new(guard.data());
                let is_leaf = page.try_is_leaf()?;
                (guard.page_id(), page.size(), page.min_size(), is_leaf)
            };

            if node_id == ctx.root_page_id {
                if is_leaf && size == 0 {
                    // The last key is gone: the tree is empty again.
                    let header = ctx
                        .header
                        .as_mut()
                        .expect("root change requires the header lease");
                    BTreeHeaderPageMut::new(header.data_mut()).set_root_page_id(PageId::INVALID);
                    debug!("index {}: tree emptied", self.name);
                } else if !is_leaf && size == 1 {
                    // An internal root with one child collapses a level.
                    let child = {
                        let guard = ctx.write_set.last().expect("checked above");
                        BTreeInternalPage::new(guard.data()).child_at(0)
                    };
                    let header = ctx
                        .header
                        .as_mut()
                        .expect("root change requires the header lease");
                    BTreeHeaderPageMut::new(header.data_mut()).set_root_page_id(child);
                    debug!("index {}: root collapsed to {child}", self.name);
                }
                return Ok(());
            }

            if size >= min {
                return Ok(());
            }

            // Underflow. The parent lease is still held because this
            // node was not remove-safe during the descent.
            let mut victim = ctx.write_set.pop().expect("rebalance requires a lease");
            let merged = {
                let parent_guard = ctx.write_set.last_mut().ok_or_else(|| {
                    MarrowError::TreeCorrupted(format!(
                        "underflow at {node_id} with no parent lease"
                    ))
                })?;
                self.fix_underflow(parent_guard, &mut victim, node_id, is_leaf)?
            };
            drop(victim);
            if !merged {
                return Ok(());
            }
            // A merge removed a separator from the parent; re-check it.
        }
    }

    /// Repairs one underfull node via its sibling.
    ///
    /// Prefers the left sibling; leftmost children take the right.
    /// Merges when both nodes fit in one (returning true, since the
    /// parent lost a separator), otherwise borrows a single entry
    /// across the boundary and refreshes the separator in place.
    fn fix_underflow<'a>(
        &'a self,
        parent_guard: &mut PageWriteGuard<'a>,
        victim: &mut PageWriteGuard<'a>,
        victim_id: PageId,
        is_leaf: bool,
    ) -> Result<bool> {
        let (pos, sibling_pos, sep_idx) = {
            let parent = BTreeInternalPage::new(parent_guard.data());
            let pos = parent.find_child(victim_id).ok_or_else(|| {
                MarrowError::TreeCorrupted(format!("child {victim_id} missing from parent"))
            })?;
            if pos > 0 {
                (pos, pos - 1, pos)
            } else {
                (pos, pos + 1, pos + 1)
            }
        };
        let (sibling_id, sep_key) = {
            let parent = BTreeInternalPage::new(parent_guard.data());
            (parent.child_at(sibling_pos), parent.key_at(sep_idx))
        };
        let mut sibling = self.bpm.fetch_page_write(sibling_id)?;

        let victim_size = BTreePage::new(victim.data()).size();
        let sibling_size = BTreePage::new(sibling.data()).size();
        let max_size = BTreePage::new(victim.data()).max_size();

        if victim_size + sibling_size <= max_size {
            // Merge the right node into the left.
            let (left, right) = if pos > 0 {
                (&mut sibling, victim)
            } else {
                (victim, &mut sibling)
            };
            if is_leaf {
                let mut left_view = BTreeLeafPageMut::new(left.data_mut());
                let right_view = BTreeLeafPage::new(right.data());
                let left_size = left_view.size() as usize;
                let right_size = right_view.size() as usize;
                for i in 0..right_size {
                    left_view.set_entry(left_size + i, right_view.key_at(i), right_view.rid_at(i));
                }
                left_view.set_size((left_size + right_size) as i32);
                left_view.set_next_page_id(right_view.next_page_id());
            } else {
                let mut left_view = BTreeInternalPageMut::new(left.data_mut());
                let right_view = BTreeInternalPage::new(right.data());
                let left_size = left_view.size() as usize;
                let right_size = right_view.size() as usize;
                // The separator comes down between the two halves.
                left_view.set_entry(left_size, sep_key, right_view.child_at(0));
                for i in 1..right_size {
                    left_view.set_entry(
                        left_size + i,
                        right_view.key_at(i),
                        right_view.child_at(i),
                    );
                }
                left_view.set_size((left_size + right_size) as i32);
            }
            // Drop the separator and the right node's pointer.
            BTreeInternalPageMut::new(parent_guard.data_mut()).remove_at(sep_idx);
            debug!("index {}: merged into {}", self.name, left.page_id());
            return Ok(true);
        }

        if pos > 0 {
            // Borrow the rightmost entry of the left sibling.
            if is_leaf {
                let (key, rid) = {
                    let mut sib = BTreeLeafPageMut::new(sibling.data_mut());
                    let s = sib.size() as usize;
                    let entry = (sib.key_at(s - 1), sib.rid_at(s - 1));
                    sib.set_size(s as i32 - 1);
                    entry
                };
                BTreeLeafPageMut::new(victim.data_mut()).insert_at(0, key, rid);
                BTreeInternalPageMut::new(parent_guard.data_mut()).set_key_at(sep_idx, key);
            } else {
                let (borrowed_key, borrowed_child) = {
                    let mut sib = BTreeInternalPageMut::new(sibling.data_mut());
                    let s = sib.size() as usize;
                    let entry = (sib.key_at(s - 1), sib.child_at(s - 1));
                    sib.set_size(s as i32 - 1);
                    entry
                };
                {
                    // The old separator comes down as the first real key;
                    // the borrowed child becomes the leftmost pointer.
                    let mut vic = BTreeInternalPageMut::new(victim.data_mut());
                    vic.insert_at(0, 0, borrowed_child);
                    vic.set_key_at(1, sep_key);
                }
                BTreeInternalPageMut::new(parent_guard.data_mut())
                    .set_key_at(sep_idx, borrowed_key);
            }
        } else {
            // Borrow the leftmost entry of the right sibling.
            if is_leaf {
                let (key, rid, new_first) = {
                    let mut sib = BTreeLeafPageMut::new(sibling.data_mut());
                    let entry = (sib.key_at(0), sib.rid_at(0));
                    sib.remove_at(0);
                    (entry.0, entry.1, sib.key_at(0))
                };
                {
                    let mut vic = BTreeLeafPageMut::new(victim.data_mut());
                    let s = vic.size() as usize;
                    vic.insert_at(s, key, rid);
                }
                BTreeInternalPageMut::new(parent_guard.data_mut()).set_key_at(sep_idx, new_first);
            } else {
                let (replacement, borrowed_child) = {
                    let mut sib = BTreeInternalPageMut::new(sibling.data_mut());
                    let entry = (sib.key_at(1), sib.child_at(0));
                    sib.remove_at(0);
                    entry
                };
                {
                    // The old separator comes down as the last key; the
                    // borrowed child is appended after it.
                    let mut vic = BTreeInternalPageMut::new(victim.data_mut());
                    let s = vic.size() as usize;
                    vic.set_entry(s, sep_key, borrowed_child);
                    vic.set_size(s as i32 + 1);
                }
                BTreeInternalPageMut::new(parent_guard.data_mut()).set_key_at(sep_idx, replacement);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marrow_buffer::{BufferPoolConfig, MemoryDiskManager};

    fn rid(n: i64) -> Rid {
        Rid::new(PageId(n as i32), n as u32)
    }

    fn create_tree(pool_size: usize, leaf_max: usize, internal_max: usize) -> BPlusTree {
        let pool = Arc::new(BufferPool::new(
            BufferPoolConfig {
                pool_size,
                replacer_k: 2,
            },
            Arc::new(MemoryDiskManager::new()),
        ));
        let (header_id, guard) = pool.new_page().unwrap();
        drop(guard);
        BPlusTree::new("test_index", header_id, pool, leaf_max, internal_max).unwrap()
    }

    #[test]
    fn test_new_tree_is_empty() {
        let tree = create_tree(16, 4, 4);
        assert!(tree.is_empty().unwrap());
        assert_eq!(tree.root_page_id().unwrap(), PageId::INVALID);
        assert_eq!(tree.get_value(1).unwrap(), None);
    }

    #[test]
    fn test_parameter_validation() {
        let pool = Arc::new(BufferPool::new(
            BufferPoolConfig {
                pool_size: 4,
                replacer_k: 2,
            },
            Arc::new(MemoryDiskManager::new()),
        ));
        let (header_id, guard) = pool.new_page().unwrap();
        drop(guard);

        assert!(BPlusTree::new("t", header_id, Arc::clone(&pool), 1, 4).is_err());
        assert!(BPlusTree::new("t", header_id, Arc::clone(&pool), 4, 2).is_err());
        assert!(BPlusTree::new("t", header_id, Arc::clone(&pool), 10_000, 4).is_err());
    }

    #[test]
    fn test_insert_and_get_single() {
        let tree = create_tree(16, 4, 4);

        assert!(tree.insert(42, rid(42)).unwrap());
        assert!(!tree.is_empty().unwrap());
        assert_eq!(tree.get_value(42).unwrap(), Some(rid(42)));
        assert_eq!(tree.get_value(41).unwrap(), None);
    }

    #[test]
    fn test_duplicate_insert_returns_false() {
        let tree = create_tree(16, 4, 4);

        assert!(tree.insert(7, rid(7)).unwrap());
        assert!(!tree.insert(7, rid(99)).unwrap());
        // The original value is untouched.
        assert_eq!(tree.get_value(7).unwrap(), Some(rid(7)));
    }

    #[test]
    fn test_duplicate_insert_into_full_leaf() {
        let tree = create_tree(16, 4, 4);

        for k in 1..=4 {
            assert!(tree.insert(k, rid(k)).unwrap());
        }
        // Leaf is full; a duplicate must not trigger a split.
        let root_before = tree.root_page_id().unwrap();
        assert!(!tree.insert(3, rid(3)).unwrap());
        assert_eq!(tree.root_page_id().unwrap(), root_before);
    }

    #[test]
    fn test_insert_splits_root_leaf() {
        let tree = create_tree(16, 4, 4);

        for k in 1..=5 {
            assert!(tree.insert(k, rid(k)).unwrap());
        }
        for k in 1..=5 {
            assert_eq!(tree.get_value(k).unwrap(), Some(rid(k)), "key {k}");
        }
    }

    #[test]
    fn test_insert_descending_order() {
        let tree = create_tree(32, 4, 4);

        for k in (1..=50).rev() {
            assert!(tree.insert(k, rid(k)).unwrap());
        }
        for k in 1..=50 {
            assert_eq!(tree.get_value(k).unwrap(), Some(rid(k)), "key {k}");
        }
    }

    #[test]
    fn test_remove_absent_key_is_noop() {
        let tree = create_tree(16, 4, 4);

        tree.remove(1).unwrap();
        tree.insert(2, rid(2)).unwrap();
        tree.remove(1).unwrap();
        assert_eq!(tree.get_value(2).unwrap(), Some(rid(2)));
    }

    #[test]
    fn test_insert_remove_get_absent() {
        let tree = create_tree(16, 4, 4);

        tree.insert(10, rid(10)).unwrap();
        tree.remove(10).unwrap();
        assert_eq!(tree.get_value(10).unwrap(), None);
        assert!(tree.is_empty().unwrap());
    }

    #[test]
    fn test_tree_empties_and_restarts() {
        let tree = create_tree(32, 4, 4);

        for k in 1..=20 {
            tree.insert(k, rid(k)).unwrap();
        }
        for k in 1..=20 {
            tree.remove(k).unwrap();
        }
        assert!(tree.is_empty().unwrap());
        assert_eq!(tree.root_page_id().unwrap(), PageId::INVALID);

        // The tree still works after emptying out.
        assert!(tree.insert(5, rid(5)).unwrap());
        assert_eq!(tree.get_value(5).unwrap(), Some(rid(5)));
    }

    #[test]
    fn test_pool_exhaustion_surfaces() {
        // A one-frame pool cannot hold the header plus a new root.
        let tree = create_tree(1, 4, 4);
        let result = tree.insert(1, rid(1));
        assert!(matches!(result, Err(MarrowError::PoolExhausted)));
    }
}
