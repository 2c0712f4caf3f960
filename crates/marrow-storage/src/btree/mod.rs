//! B+ tree index implementation.
//!
//! The tree lives entirely in buffer pool pages. A well-known header
//! page stores the root page id; internal and leaf pages share a common
//! header followed by a sorted entry array. All access goes through the
//! pool's guarded page leases, and mutations follow the latch-crabbing
//! protocol: the chain of write leases grows downward and is cut back
//! to the deepest unsafe node as children prove themselves safe.

mod index;
mod iter;
mod page;

pub use index::BPlusTree;
pub use iter::IndexIterator;
pub use page::{
    BTreeHeaderPage, BTreeInternalPage, BTreeLeafPage, BTreePage, INTERNAL_PAGE_CAPACITY,
    LEAF_PAGE_CAPACITY, PAGE_TYPE_INTERNAL, PAGE_TYPE_LEAF,
};
