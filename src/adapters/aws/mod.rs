//! S3-compatible object storage adapter.

pub mod s3;

pub use s3::ObjectStorage;
