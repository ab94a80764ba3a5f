//! Local adapters: filesystem storage and the Redis job queue.

pub mod fs;
pub mod redis;

pub use fs::LocalStorage;
pub use redis::RedisJobQueue;
