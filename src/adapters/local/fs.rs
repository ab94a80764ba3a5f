//! Local filesystem storage.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::ports::storage::Storage;

/// Storage rooted at a base directory. Stored paths stay relative so they
/// roundtrip through the database independent of deployment topology.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    base: PathBuf,
}

impl LocalStorage {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Resolve a canonical relative path under the base directory, rejecting
    /// absolute paths and parent-directory traversal.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path);
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(Error::storage(format!("invalid storage path '{}'", path)));
                }
            }
        }
        Ok(self.base.join(rel))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn save(&self, bytes: &[u8], path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes).await?;
        Ok(path.to_string())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::BlobMissing(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::BlobMissing(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&full).await?)
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        tokio::fs::create_dir_all(&full).await?;
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_dir_all(&full).await {
            Ok(()) => Ok(()),
            // Idempotent: removing an absent tree is fine
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn local_path(&self, path: &str) -> Option<PathBuf> {
        self.resolve(path).ok()
    }
}
