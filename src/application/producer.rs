//! Producer: create a job's database twin and enqueue it.

use std::sync::Arc;

use crate::domain::job::{transcode_job_key, JobPriority, JobType, TranscodingJob};
use crate::domain::video::Video;
use crate::error::{Error, Result};
use crate::ports::queue::{EnqueueOpts, EnqueueOutcome, JobQueue};
use crate::ports::repository::VideoRepository;

/// Submits transcode work: one durable DB row plus one queue entry, de-duped
/// by the deterministic `transcode-{videoId}` key.
pub struct Producer {
    repo: Arc<dyn VideoRepository>,
    queue: Arc<dyn JobQueue>,
    max_attempts: i32,
}

impl Producer {
    pub fn new(
        repo: Arc<dyn VideoRepository>,
        queue: Arc<dyn JobQueue>,
        max_attempts: i32,
    ) -> Self {
        Self {
            repo,
            queue,
            max_attempts,
        }
    }

    /// Create the video and its QUEUED job in one transaction, then enqueue.
    ///
    /// A duplicate submission returns the existing job. If the queue is
    /// unavailable the DB row stays QUEUED as a retry candidate and the
    /// error surfaces.
    pub async fn submit_transcode(
        &self,
        video: &Video,
        resolutions: Vec<String>,
        priority: JobPriority,
    ) -> Result<TranscodingJob> {
        let job = TranscodingJob::new(
            video.id,
            video.upload_path.clone(),
            resolutions,
            self.max_attempts,
        );

        let job = match self.repo.create_video_and_job(video, &job).await {
            Ok(()) => job,
            Err(Error::Database(e)) if is_unique_violation(&e) => {
                // The video (and its job twin) already exist; resubmission
                // returns the existing handle.
                match self.repo.find_job(video.id).await? {
                    Some(existing) => existing,
                    None => return Err(Error::Database(e)),
                }
            }
            Err(e) => return Err(e),
        };

        let outcome = self
            .queue
            .enqueue(
                &transcode_job_key(video.id),
                JobType::HlsTranscode,
                &job.job_data,
                EnqueueOpts {
                    priority,
                    delay_secs: 0,
                },
            )
            .await?;

        if let EnqueueOutcome::Duplicate { job_id } = &outcome {
            tracing::info!(video_id = %video.id, job_id = %job_id, "transcode already queued");
        }

        Ok(job)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}
