//! Error types for MarrowDB.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using MarrowError.
pub type Result<T> = std::result::Result<T, MarrowError>;

/// Errors that can occur in MarrowDB storage operations.
#[derive(Debug, Error)]
pub enum MarrowError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Buffer pool errors
    #[error("buffer pool exhausted, every frame is pinned")]
    PoolExhausted,

    #[error("page not found: {0}")]
    PageNotFound(PageId),

    #[error("replacer contract violation: {0}")]
    ReplacerViolation(String),

    // B+ tree errors
    #[error("invalid node type: {0}")]
    InvalidNodeType(u32),

    #[error("b+ tree corrupted: {0}")]
    TreeCorrupted(String),

    // Configuration errors
    #[error("invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },
}
