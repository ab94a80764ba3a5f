//! Concrete implementations of the ports.

pub mod aws;
pub mod local;
pub mod postgres;

use std::sync::Arc;

use crate::config::{Config, StorageDriver};
use crate::error::{Error, Result};
use crate::ports::storage::Storage;

/// Build the storage backend selected by configuration.
pub async fn make_storage(config: &Config) -> Result<Arc<dyn Storage>> {
    match config.storage_driver {
        StorageDriver::Local => Ok(Arc::new(local::fs::LocalStorage::new(
            &config.storage_path,
        ))),
        StorageDriver::S3 => {
            let s3 = config
                .s3
                .as_ref()
                .ok_or_else(|| Error::config("S3 driver selected without R2_* settings"))?;
            Ok(Arc::new(aws::s3::ObjectStorage::connect(s3).await))
        }
    }
}
