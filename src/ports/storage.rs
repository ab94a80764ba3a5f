//! Storage capability.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::Result;

/// Uniform blob operations over a local filesystem or an S3-compatible
/// object store.
///
/// Paths are the canonical relative forward-slash strings from
/// `domain::paths`; implementations must never leak backend-specific
/// separators or absolute prefixes back to callers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist bytes at a path, creating intermediate directories.
    /// Returns the canonical path as stored.
    async fn save(&self, bytes: &[u8], path: &str) -> Result<String>;

    /// Read a blob. `Error::BlobMissing` when absent.
    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Remove a blob. `Error::BlobMissing` when absent.
    async fn delete(&self, path: &str) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Create a directory (a no-op on object stores).
    async fn mkdir(&self, path: &str) -> Result<()>;

    /// Recursively remove everything under a path. Idempotent.
    async fn rmdir(&self, path: &str) -> Result<()>;

    /// Where this path already lives as a file on this machine, its absolute
    /// location; `None` for remote backends.
    fn local_path(&self, path: &str) -> Option<PathBuf>;
}
