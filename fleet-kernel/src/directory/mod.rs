//! Directory service seam.
//!
//! The discovery watcher only needs two reads: the direct children of a
//! directory, and the value of one key. Any key/value store exposing a
//! directory tree can sit behind [`Directory`]; [`etcd::EtcdDirectory`] is the
//! production backend.

pub mod etcd;

use async_trait::async_trait;

use crate::error::DirectoryError;

pub use etcd::EtcdDirectory;

/// One direct child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub key: String,
    pub is_dir: bool,
}

/// Result of listing a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirListing {
    /// False when the listed key holds a plain value.
    pub is_dir: bool,
    pub children: Vec<DirEntry>,
}

#[async_trait]
pub trait Directory: Send + Sync {
    /// Direct (non-recursive) children of `path`.
    async fn list(&self, path: &str) -> Result<DirListing, DirectoryError>;

    /// Value stored under `key`.
    async fn get(&self, key: &str) -> Result<String, DirectoryError>;
}
