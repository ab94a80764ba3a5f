//! Redis-backed job queue.

pub mod queue;

pub use queue::RedisJobQueue;
