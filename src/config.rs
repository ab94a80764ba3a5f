//! Configuration loaded from the environment.

use std::env;

use crate::error::{Error, Result};

/// Deployment environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
    Test,
}

impl AppEnv {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "development" => Ok(AppEnv::Development),
            "production" => Ok(AppEnv::Production),
            "test" => Ok(AppEnv::Test),
            other => Err(Error::config(format!("unknown APP_ENV '{}'", other))),
        }
    }
}

/// Storage backend selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageDriver {
    Local,
    S3,
}

/// Credentials and endpoint for an S3-compatible object store (R2, MinIO, S3).
#[derive(Clone, Debug)]
pub struct S3Config {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
}

/// Service configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub app_name: String,
    pub app_env: AppEnv,
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: u16,
    /// Postgres connection URL
    pub database_url: String,
    /// Redis connection URL, assembled from REDIS_{HOST,PORT,PASSWORD}
    pub redis_url: String,
    /// Max delivery attempts per transcoding job
    pub queue_retry_attempts: u32,
    /// Base retry delay in seconds (doubled per attempt)
    pub queue_retry_delay_secs: u64,
    pub storage_driver: StorageDriver,
    /// Base directory for the local storage backend
    pub storage_path: String,
    /// Populated iff storage_driver is S3
    pub s3: Option<S3Config>,
    /// Directory for in-flight multipart uploads
    pub upload_dir: String,
    /// Public URL root used in API responses
    pub public_root: String,
    pub cors_origin: String,
    /// Number of concurrent transcoding workers
    pub worker_count: usize,
    /// Remove the raw upload once the video reaches READY
    pub delete_source_after_transcode: bool,
    /// Upload size cap in bytes
    pub max_upload_bytes: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let app_env = AppEnv::parse(
            &env::var("APP_ENV").unwrap_or_else(|_| String::from("development")),
        )?;

        let storage_driver = match env::var("STORAGE_DRIVER")
            .unwrap_or_else(|_| String::from("local"))
            .as_str()
        {
            "local" => StorageDriver::Local,
            "s3" => StorageDriver::S3,
            other => {
                return Err(Error::config(format!("unknown STORAGE_DRIVER '{}'", other)));
            }
        };

        if app_env == AppEnv::Production && storage_driver != StorageDriver::S3 {
            return Err(Error::config("STORAGE_DRIVER must be 's3' in production"));
        }

        let s3 = match storage_driver {
            StorageDriver::S3 => Some(S3Config {
                endpoint: require("R2_ENDPOINT")?,
                access_key_id: require("R2_ACCESS_KEY_ID")?,
                secret_access_key: require("R2_SECRET_ACCESS_KEY")?,
                bucket_name: require("R2_BUCKET_NAME")?,
            }),
            StorageDriver::Local => None,
        };

        let redis_host = env::var("REDIS_HOST").unwrap_or_else(|_| String::from("127.0.0.1"));
        let redis_port = env::var("REDIS_PORT").unwrap_or_else(|_| String::from("6379"));
        let redis_url = match env::var("REDIS_PASSWORD") {
            Ok(password) if !password.is_empty() => {
                format!("redis://:{}@{}:{}/", password, redis_host, redis_port)
            }
            _ => format!("redis://{}:{}/", redis_host, redis_port),
        };

        Ok(Self {
            app_name: env::var("APP_NAME").unwrap_or_else(|_| String::from("presley")),
            app_env,
            addr: env::var("ADDR").unwrap_or_else(|_| String::from("127.0.0.1")),
            port: parse_var("PORT", 3000)?,
            database_url: require("DATABASE_URL")?,
            redis_url,
            queue_retry_attempts: parse_var("QUEUE_RETRY_ATTEMPTS", 3)?,
            queue_retry_delay_secs: parse_var("QUEUE_RETRY_DELAY", 2)?,
            storage_driver,
            storage_path: env::var("STORAGE_PATH").unwrap_or_else(|_| String::from("./storage")),
            s3,
            upload_dir: env::var("UPLOAD_DIR").unwrap_or_else(|_| String::from("./uploads")),
            public_root: env::var("PUBLIC_ROOT")
                .unwrap_or_else(|_| String::from("http://localhost:3000")),
            cors_origin: env::var("CORS_ORIGIN").unwrap_or_else(|_| String::from("*")),
            worker_count: parse_var("WORKER_COUNT", 4)?,
            delete_source_after_transcode: env::var("DELETE_SOURCE_AFTER_TRANSCODE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", 2 * 1024 * 1024 * 1024)?,
        })
    }
}

fn require(key: &str) -> Result<String> {
    env::var(key).map_err(|_| Error::config(format!("{} env var required", key)))
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::config(format!("invalid value for {}: '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_env_rejects_unknown_values() {
        assert!(AppEnv::parse("development").is_ok());
        assert!(AppEnv::parse("staging").is_err());
    }
}
