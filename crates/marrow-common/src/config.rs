//! Configuration structures for MarrowDB.

use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the buffer pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub pool_size: usize,
    /// The K in LRU-K replacement.
    pub replacer_k: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 1024,
            replacer_k: 2,
        }
    }
}

/// Storage configuration for the MarrowDB engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the data file.
    pub data_path: PathBuf,
    /// Buffer pool size in number of frames.
    pub pool_size: usize,
    /// The K in LRU-K replacement.
    pub replacer_k: usize,
    /// Maximum number of (key, rid) pairs in a B+ tree leaf.
    pub leaf_max_size: usize,
    /// Maximum number of children in a B+ tree internal node.
    pub internal_max_size: usize,
    /// Enable fsync for durability.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./marrow.db"),
            pool_size: 1024,
            replacer_k: 2,
            // Largest node sizes that fit a 4 KB page.
            leaf_max_size: 255,
            internal_max_size: 340,
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Returns the buffer pool portion of this configuration.
    pub fn buffer_pool(&self) -> BufferPoolConfig {
        BufferPoolConfig {
            pool_size: self.pool_size,
            replacer_k: self.replacer_k,
        }
    }

    /// Returns the total buffer pool size in bytes.
    pub fn buffer_pool_size_bytes(&self) -> usize {
        self.pool_size * PAGE_SIZE
    }
}
