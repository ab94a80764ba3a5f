//! Durable, prioritized, retrying job queue over Redis.
//!
//! Layout (all keys under the `presley:` namespace):
//! - `job:{id}`            HASH with payload, status, attempts, priority
//! - `queue:{name}:p{N}`   ready list per job type and priority (LPUSH/BRPOP)
//! - `delayed`             ZSET of job ids scored by their due time
//! - `active`              ZSET of job ids scored by their visibility deadline
//! - `stats:{completed,failed}` counters
//!
//! Ready lists are popped in priority order in a single BRPOP, which gives
//! priority-then-FIFO dispatch with exclusive, atomic acquisition. A
//! maintenance task promotes due delayed jobs and requeues leases whose
//! visibility deadline passed (at-least-once delivery).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::{Config, Pool, Runtime};
use tokio_util::sync::CancellationToken;

use crate::domain::job::{JobPriority, JobType, ProgressDetail, TranscodePayload};
use crate::error::Result;
use crate::ports::queue::{
    EnqueueOpts, EnqueueOutcome, FailOutcome, JobLease, JobQueue, QueueStats,
};

const NS: &str = "presley";
/// How long a dequeued job stays invisible before a crashed worker's lease
/// is returned to the ready set.
const VISIBILITY_TIMEOUT_SECS: i64 = 300;
/// Upper bound on the retry backoff.
const BACKOFF_CAP_SECS: u64 = 300;
/// Terminal job hashes are kept around this long for observability.
const TERMINAL_TTL_SECS: i64 = 86_400;
/// Batch size for promotion/requeue sweeps.
const SWEEP_BATCH: isize = 100;

fn job_key(job_id: &str) -> String {
    format!("{}:job:{}", NS, job_id)
}

fn ready_key(job_type: JobType, priority: JobPriority) -> String {
    format!("{}:queue:{}:p{}", NS, job_type.queue_name(), priority.as_u8())
}

fn delayed_key() -> String {
    format!("{}:delayed", NS)
}

fn active_key() -> String {
    format!("{}:active", NS)
}

fn stat_key(name: &str) -> String {
    format!("{}:stats:{}", NS, name)
}

/// Ready list keys for a dequeue call, highest priority first per type.
fn dequeue_keys(types: &[JobType]) -> Vec<String> {
    let mut keys = Vec::with_capacity(types.len() * JobPriority::ALL.len());
    for priority in JobPriority::ALL {
        for job_type in types {
            keys.push(ready_key(*job_type, priority));
        }
    }
    keys
}

/// Exponential backoff: `base * 2^attempt` seconds, capped.
pub(crate) fn backoff_delay_secs(base_secs: u64, attempt: u32) -> u64 {
    let factor = 1u64 << attempt.min(16);
    base_secs.saturating_mul(factor).min(BACKOFF_CAP_SECS)
}

/// `JobQueue` over a deadpool-redis pool.
pub struct RedisJobQueue {
    pool: Pool,
    base_delay_secs: u64,
    default_max_attempts: u32,
}

impl RedisJobQueue {
    pub fn new(redis_url: &str, base_delay_secs: u64, default_max_attempts: u32) -> Result<Self> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self {
            pool,
            base_delay_secs,
            default_max_attempts,
        })
    }

    /// Connectivity check for startup and health probes.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.pool.get().await?;
        deadpool_redis::redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Run promotion and visibility sweeps until cancelled.
    pub fn spawn_maintenance(self: Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        if let Err(e) = self.promote_due().await {
                            tracing::warn!(error = %e, "delayed-job promotion failed");
                        }
                        if let Err(e) = self.requeue_expired().await {
                            tracing::warn!(error = %e, "visibility requeue failed");
                        }
                    }
                }
            }
        })
    }

    /// Move due delayed jobs back to their ready lists.
    pub async fn promote_due(&self) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now().timestamp() as f64;
        let due: Vec<String> = conn
            .zrangebyscore_limit(delayed_key(), f64::NEG_INFINITY, now, 0, SWEEP_BATCH)
            .await?;

        for job_id in &due {
            self.move_to_ready(&mut conn, job_id, &delayed_key()).await?;
        }
        Ok(due.len())
    }

    /// Return jobs whose visibility deadline passed to the ready set.
    pub async fn requeue_expired(&self) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now().timestamp() as f64;
        let expired: Vec<String> = conn
            .zrangebyscore_limit(active_key(), f64::NEG_INFINITY, now, 0, SWEEP_BATCH)
            .await?;

        for job_id in &expired {
            tracing::warn!(job_id = %job_id, "visibility timeout expired, requeuing");
            self.move_to_ready(&mut conn, job_id, &active_key()).await?;
        }
        Ok(expired.len())
    }

    async fn move_to_ready(
        &self,
        conn: &mut deadpool_redis::Connection,
        job_id: &str,
        from_zset: &str,
    ) -> Result<()> {
        let key = job_key(job_id);
        let (job_type, priority) = match self.job_routing(conn, &key).await? {
            Some(routing) => routing,
            None => {
                // Hash expired or was deleted; drop the dangling member.
                let _: () = conn.zrem(from_zset, job_id).await?;
                return Ok(());
            }
        };

        let mut pipe = deadpool_redis::redis::pipe();
        pipe.atomic()
            .zrem(from_zset, job_id)
            .ignore()
            .hset(&key, "status", "waiting")
            .ignore()
            // Requeued jobs go to the consumer end: they were already owed.
            .rpush(ready_key(job_type, priority), job_id)
            .ignore();
        pipe.query_async::<()>(conn).await?;
        Ok(())
    }

    async fn job_routing(
        &self,
        conn: &mut deadpool_redis::Connection,
        key: &str,
    ) -> Result<Option<(JobType, JobPriority)>> {
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let job_type = fields
            .get("type")
            .map(|t| JobType::parse(t))
            .transpose()?
            .unwrap_or(JobType::HlsTranscode);
        let priority = fields
            .get("priority")
            .and_then(|p| p.parse::<u8>().ok())
            .map(JobPriority::from_u8)
            .unwrap_or_default();
        Ok(Some((job_type, priority)))
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(
        &self,
        job_id: &str,
        job_type: JobType,
        payload: &TranscodePayload,
        opts: EnqueueOpts,
    ) -> Result<EnqueueOutcome> {
        let mut conn = self.pool.get().await?;
        let key = job_key(job_id);

        // HSETNX is the dedup gate: whoever creates the status field owns
        // the enqueue. Losing the race against an un-terminal twin is a
        // no-op returning the existing handle.
        let created: bool = conn.hset_nx(&key, "status", "waiting").await?;
        if !created {
            let status: Option<String> = conn.hget(&key, "status").await?;
            match status.as_deref() {
                Some("completed") | Some("failed") | None => {
                    // Terminal twin: fall through and reset it below.
                }
                _ => {
                    return Ok(EnqueueOutcome::Duplicate {
                        job_id: job_id.to_string(),
                    });
                }
            }
        }

        let status = if opts.delay_secs > 0 { "delayed" } else { "waiting" };
        let fields: Vec<(&str, String)> = vec![
            ("payload", serde_json::to_string(payload)?),
            ("type", job_type.as_str().to_string()),
            ("status", status.to_string()),
            ("priority", opts.priority.as_u8().to_string()),
            ("attempts", "0".to_string()),
            ("max_attempts", self.default_max_attempts.to_string()),
            ("error", String::new()),
            ("created_at", Utc::now().timestamp().to_string()),
        ];

        let mut pipe = deadpool_redis::redis::pipe();
        pipe.atomic()
            .hset_multiple(&key, &fields)
            .ignore()
            .persist(&key)
            .ignore();
        if opts.delay_secs > 0 {
            let due = Utc::now().timestamp() + opts.delay_secs as i64;
            pipe.zadd(delayed_key(), job_id, due as f64).ignore();
        } else {
            pipe.lpush(ready_key(job_type, opts.priority), job_id).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;

        Ok(EnqueueOutcome::Enqueued {
            job_id: job_id.to_string(),
        })
    }

    async fn dequeue(&self, types: &[JobType], timeout_secs: f64) -> Result<Option<JobLease>> {
        let mut conn = self.pool.get().await?;
        let keys = dequeue_keys(types);

        // BRPOP scans the keys in order, which is exactly our priority order.
        let popped: Option<(String, String)> = conn.brpop(&keys, timeout_secs).await?;
        let Some((_list, job_id)) = popped else {
            return Ok(None);
        };

        let key = job_key(&job_id);
        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        let Some(raw_payload) = fields.get("payload") else {
            // Ghost id without a hash; nothing to lease.
            tracing::warn!(job_id = %job_id, "dequeued job without a record, dropping");
            return Ok(None);
        };
        let payload: TranscodePayload = serde_json::from_str(raw_payload)?;
        let job_type = fields
            .get("type")
            .map(|t| JobType::parse(t))
            .transpose()?
            .unwrap_or(JobType::HlsTranscode);
        let max_attempts = fields
            .get("max_attempts")
            .and_then(|m| m.parse().ok())
            .unwrap_or(self.default_max_attempts);

        let attempt: u32 = conn.hincr(&key, "attempts", 1u32).await?;
        let deadline = Utc::now().timestamp() + VISIBILITY_TIMEOUT_SECS;
        let mut pipe = deadpool_redis::redis::pipe();
        pipe.atomic()
            .hset(&key, "status", "active")
            .ignore()
            .zadd(active_key(), &job_id, deadline as f64)
            .ignore();
        pipe.query_async::<()>(&mut conn).await?;

        Ok(Some(JobLease {
            job_id,
            job_type,
            payload,
            attempt,
            max_attempts,
        }))
    }

    async fn complete(&self, lease: &JobLease) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let key = job_key(&lease.job_id);
        let mut pipe = deadpool_redis::redis::pipe();
        pipe.atomic()
            .hset(&key, "status", "completed")
            .ignore()
            .zrem(active_key(), &lease.job_id)
            .ignore()
            .incr(stat_key("completed"), 1u64)
            .ignore()
            .expire(&key, TERMINAL_TTL_SECS)
            .ignore();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn fail(&self, lease: &JobLease, error: &str, retry: bool) -> Result<FailOutcome> {
        let mut conn = self.pool.get().await?;
        let key = job_key(&lease.job_id);

        if retry && lease.attempt < lease.max_attempts {
            let delay = backoff_delay_secs(self.base_delay_secs, lease.attempt);
            let due = Utc::now().timestamp() + delay as i64;
            let mut pipe = deadpool_redis::redis::pipe();
            pipe.atomic()
                .hset(&key, "status", "delayed")
                .ignore()
                .hset(&key, "error", error)
                .ignore()
                .hset(&key, "next_retry_at", due)
                .ignore()
                .zrem(active_key(), &lease.job_id)
                .ignore()
                .zadd(delayed_key(), &lease.job_id, due as f64)
                .ignore();
            pipe.query_async::<()>(&mut conn).await?;
            let next_retry_at = Utc
                .timestamp_opt(due, 0)
                .single()
                .unwrap_or_else(Utc::now);
            return Ok(FailOutcome::Retrying { next_retry_at });
        }

        let mut pipe = deadpool_redis::redis::pipe();
        pipe.atomic()
            .hset(&key, "status", "failed")
            .ignore()
            .hset(&key, "error", error)
            .ignore()
            .zrem(active_key(), &lease.job_id)
            .ignore()
            .incr(stat_key("failed"), 1u64)
            .ignore()
            .expire(&key, TERMINAL_TTL_SECS)
            .ignore();
        pipe.query_async::<()>(&mut conn).await?;
        Ok(FailOutcome::Exhausted)
    }

    async fn release(&self, lease: &JobLease) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let key = job_key(&lease.job_id);
        // A released lease never counts as an attempt.
        let mut pipe = deadpool_redis::redis::pipe();
        pipe.atomic()
            .hincr(&key, "attempts", -1)
            .ignore()
            .hset(&key, "status", "waiting")
            .ignore()
            .zrem(active_key(), &lease.job_id)
            .ignore();
        pipe.query_async::<()>(&mut conn).await?;

        let (job_type, priority) = self
            .job_routing(&mut conn, &key)
            .await?
            .unwrap_or((lease.job_type, JobPriority::default()));
        let _: () = conn
            .rpush(ready_key(job_type, priority), &lease.job_id)
            .await?;
        Ok(())
    }

    async fn set_progress(&self, job_id: &str, progress: &ProgressDetail) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn
            .hset(job_key(job_id), "progress", serde_json::to_string(progress)?)
            .await?;
        Ok(())
    }

    async fn get_progress(&self, job_id: &str) -> Result<Option<ProgressDetail>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.hget(job_key(job_id), "progress").await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut conn = self.pool.get().await?;

        let mut waiting = 0u64;
        for job_type in [JobType::HlsTranscode, JobType::Thumbnail] {
            for priority in JobPriority::ALL {
                let len: u64 = conn.llen(ready_key(job_type, priority)).await?;
                waiting += len;
            }
        }
        let active: u64 = conn.zcard(active_key()).await?;
        let delayed: u64 = conn.zcard(delayed_key()).await?;
        let completed: Option<u64> = conn.get(stat_key("completed")).await?;
        let failed: Option<u64> = conn.get(stat_key("failed")).await?;

        Ok(QueueStats {
            waiting,
            active,
            completed: completed.unwrap_or(0),
            failed: failed.unwrap_or(0),
            delayed,
        })
    }
}
