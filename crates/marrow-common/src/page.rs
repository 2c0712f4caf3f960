//! Page identity and record locator types for MarrowDB storage.

use serde::{Deserialize, Serialize};

/// Size of a page in bytes (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// Unique identifier for a page in the data file.
///
/// Page ids are non-negative and strictly increasing as pages are
/// allocated. The on-disk encoding is a little-endian `i32` with `-1`
/// standing for "no page".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub i32);

impl PageId {
    /// Sentinel for the absence of a page.
    pub const INVALID: PageId = PageId(-1);

    /// Returns true if this id refers to an actual page.
    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

/// Locator for a record: the page holding it plus the slot within the page.
///
/// The B+ tree maps keys to these; heap storage hands them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    /// Page the record lives on.
    pub page_id: PageId,
    /// Slot number within the page.
    pub slot: u32,
}

impl Rid {
    /// Size of the encoded form in bytes.
    pub const ENCODED_LEN: usize = 8;

    /// Creates a new record id.
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    /// Encodes as 8 little-endian bytes (page id, then slot).
    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[0..4].copy_from_slice(&self.page_id.0.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot.to_le_bytes());
        buf
    }

    /// Decodes from the first 8 bytes of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Self {
        let page_id = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let slot = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Self {
            page_id: PageId(page_id),
            slot,
        }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_id.0, self.slot)
    }
}
