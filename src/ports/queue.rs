//! Job queue capability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::job::{JobPriority, JobType, ProgressDetail, TranscodePayload};
use crate::error::Result;

/// Options for `enqueue`.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOpts {
    pub priority: JobPriority,
    /// Initial dispatch delay in seconds
    pub delay_secs: u64,
}

/// What `enqueue` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new job was queued under this id
    Enqueued { job_id: String },
    /// An un-terminal job already exists under this id; the call was a no-op
    Duplicate { job_id: String },
}

impl EnqueueOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            EnqueueOutcome::Enqueued { job_id } | EnqueueOutcome::Duplicate { job_id } => job_id,
        }
    }
}

/// What `fail` decided.
#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    /// Another attempt was scheduled
    Retrying { next_retry_at: DateTime<Utc> },
    /// The job is terminally failed
    Exhausted,
}

/// An exclusively held job. The holder must resolve it with `complete`,
/// `fail`, or `release`; otherwise the visibility timeout returns it to the
/// ready set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLease {
    pub job_id: String,
    pub job_type: JobType,
    pub payload: TranscodePayload,
    /// 1-based attempt number for this delivery
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Queue depth counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

/// Durable, prioritized, retrying job queue with at-least-once delivery.
///
/// The queue is the source of truth for in-flight state; the repository is
/// the source of truth for historical and business state. The worker keeps
/// the two consistent.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job under a deterministic id. A duplicate id in an
    /// un-terminal state makes this a no-op returning the existing handle.
    async fn enqueue(
        &self,
        job_id: &str,
        job_type: JobType,
        payload: &TranscodePayload,
        opts: EnqueueOpts,
    ) -> Result<EnqueueOutcome>;

    /// Pull the next eligible job, respecting priority then FIFO.
    /// Acquisition is exclusive; returns None on timeout.
    async fn dequeue(&self, types: &[JobType], timeout_secs: f64) -> Result<Option<JobLease>>;

    async fn complete(&self, lease: &JobLease) -> Result<()>;

    /// Record a failure. With `retry` and attempts remaining, the next
    /// attempt is scheduled with exponential backoff.
    async fn fail(&self, lease: &JobLease, error: &str, retry: bool) -> Result<FailOutcome>;

    /// Return a lease to the ready set without counting an attempt
    /// (cancellation/shutdown path).
    async fn release(&self, lease: &JobLease) -> Result<()>;

    async fn set_progress(&self, job_id: &str, progress: &ProgressDetail) -> Result<()>;

    async fn get_progress(&self, job_id: &str) -> Result<Option<ProgressDetail>>;

    async fn stats(&self) -> Result<QueueStats>;
}
