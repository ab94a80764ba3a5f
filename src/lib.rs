//! Presley - Video ingestion and adaptive-bitrate streaming service
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (entities, resolution ladder, paths, HLS, FFmpeg)
//! - ports/: Trait definitions (Storage, JobQueue, VideoRepository)
//! - adapters/: Concrete implementations (local FS, S3-compatible, Redis, Postgres)
//! - application/: Services (Producer, Worker, Streamer)
//! - api/: HTTP edge (axum)
//! - config: Environment configuration

pub mod adapters;
pub mod api;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;

// Re-exports for convenience
pub use config::Config;
pub use error::{Error, ErrorCode, Result};
