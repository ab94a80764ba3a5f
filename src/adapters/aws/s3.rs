//! Object storage over an S3-compatible API (R2, MinIO, S3).

use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::S3Config;
use crate::error::{Error, Result};
use crate::ports::storage::Storage;

/// Per-call timeout for blob transfers.
const BLOB_TIMEOUT: Duration = Duration::from_secs(300);
/// Per-call timeout for metadata operations (HEAD, LIST).
const METADATA_TIMEOUT: Duration = Duration::from_secs(30);
/// S3 DeleteObjects accepts at most 1000 keys per request.
const DELETE_BATCH: usize = 1000;

/// `Storage` over a bucket, with all keys nested under an optional base
/// prefix joined with POSIX semantics.
#[derive(Clone)]
pub struct ObjectStorage {
    client: Client,
    bucket: String,
    base_prefix: String,
}

impl ObjectStorage {
    /// Connect with explicit endpoint and static credentials.
    pub async fn connect(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "env",
        );
        let timeouts = aws_config::timeout::TimeoutConfig::builder()
            .operation_timeout(BLOB_TIMEOUT)
            .connect_timeout(METADATA_TIMEOUT)
            .build();
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .credentials_provider(credentials)
            .region(Region::new("auto"))
            .timeout_config(timeouts)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket_name.clone(),
            base_prefix: String::new(),
        }
    }

    pub fn with_base_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.base_prefix = prefix.into().trim_matches('/').to_string();
        self
    }

    #[cfg(test)]
    fn for_key_tests(base_prefix: &str) -> Self {
        // Only `key()` is exercised; the client never sends a request.
        let conf = aws_sdk_s3::Config::builder()
            .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
            .build();
        Self {
            client: Client::from_conf(conf),
            bucket: "test".into(),
            base_prefix: base_prefix.trim_matches('/').to_string(),
        }
    }

    /// Object key for a canonical path.
    fn key(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if self.base_prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.base_prefix, path)
        }
    }

    async fn delete_batch(&self, keys: Vec<String>) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let objects: Vec<ObjectIdentifier> = keys
            .into_iter()
            .map(|key| {
                ObjectIdentifier::builder()
                    .key(key)
                    .build()
                    .map_err(|e| Error::storage(format!("bad delete key: {}", e)))
            })
            .collect::<Result<_>>()?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .build()
            .map_err(|e| Error::storage(format!("bad delete request: {}", e)))?;
        self.client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| Error::storage(format!("batch delete failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl Storage for ObjectStorage {
    async fn save(&self, bytes: &[u8], path: &str) -> Result<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(|e| Error::storage(format!("put {} failed: {}", path, e)))?;
        Ok(path.to_string())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(service) if service.is_no_such_key() => Error::BlobMissing(path.to_string()),
                _ => Error::storage(format!("get {} failed: {}", path, e)),
            })?;
        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| Error::storage(format!("read body of {} failed: {}", path, e)))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
            .map_err(|e| Error::storage(format!("delete {} failed: {}", path, e)))?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            // A 404 from HEAD is a definite "no"; anything else is a failure
            // we must not mistake for absence.
            Err(e) => match e.as_service_error() {
                Some(service) if service.is_not_found() => Ok(false),
                _ => Err(Error::storage(format!("head {} failed: {}", path, e))),
            },
        }
    }

    async fn mkdir(&self, _path: &str) -> Result<()> {
        // Object stores have no directories.
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> Result<()> {
        let prefix = format!("{}/", self.key(path).trim_end_matches('/'));
        let mut continuation: Option<String> = None;

        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .max_keys(DELETE_BATCH as i32);
            if let Some(token) = continuation.take() {
                req = req.continuation_token(token);
            }
            let page = req
                .send()
                .await
                .map_err(|e| Error::storage(format!("list {} failed: {}", path, e)))?;

            let keys: Vec<String> = page
                .contents()
                .iter()
                .filter_map(|o| o.key().map(str::to_string))
                .collect();
            self.delete_batch(keys).await?;

            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(())
    }

    fn local_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_join_with_posix_semantics() {
        let storage = ObjectStorage::for_key_tests("");
        assert_eq!(storage.key("hls/v/master.m3u8"), "hls/v/master.m3u8");

        let storage = ObjectStorage::for_key_tests("media/prod/");
        assert_eq!(
            storage.key("hls/v/master.m3u8"),
            "media/prod/hls/v/master.m3u8"
        );
        assert_eq!(storage.key("/uploads/raw/v.mp4"), "media/prod/uploads/raw/v.mp4");
    }

    #[test]
    fn object_backend_has_no_local_paths() {
        let storage = ObjectStorage::for_key_tests("media");
        assert!(storage.local_path("hls/v/master.m3u8").is_none());
    }
}
