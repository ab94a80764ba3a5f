//! Transcoding worker: pulls jobs, drives the transcoder, and keeps the
//! repository and queue consistent.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::av::transcoder::SEGMENT_DURATION_SECS;
use crate::domain::av::{
    HlsTranscoder, MediaProber, ProgressCallback, TranscodeOutcome, TranscodeRequest,
};
use crate::domain::job::{JobResult, JobStatus, JobType, ProgressDetail};
use crate::domain::paths;
use crate::domain::video::{OutputStatus, VideoOutput, VideoStatus};
use crate::error::{Error, Result};
use crate::ports::queue::{FailOutcome, JobLease, JobQueue};
use crate::ports::repository::VideoRepository;
use crate::ports::storage::Storage;

/// How long one dequeue poll blocks before the loop re-checks cancellation.
const DEQUEUE_POLL_SECS: f64 = 5.0;

/// One worker task. Owns at most one job at a time; all status writes for
/// that job's video are linearized through it.
pub struct Worker {
    worker_id: String,
    repo: Arc<dyn VideoRepository>,
    queue: Arc<dyn JobQueue>,
    storage: Arc<dyn Storage>,
    prober: MediaProber,
    transcoder: HlsTranscoder,
    delete_source: bool,
}

impl Worker {
    pub fn new(
        worker_id: impl Into<String>,
        repo: Arc<dyn VideoRepository>,
        queue: Arc<dyn JobQueue>,
        storage: Arc<dyn Storage>,
        prober: MediaProber,
        transcoder: HlsTranscoder,
        delete_source: bool,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            repo,
            queue,
            storage,
            prober,
            transcoder,
            delete_source,
        }
    }

    /// Main loop: dequeue and process until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(worker_id = %self.worker_id, "worker started");
        loop {
            let lease = tokio::select! {
                _ = cancel.cancelled() => break,
                lease = self.queue.dequeue(&[JobType::HlsTranscode], DEQUEUE_POLL_SECS) => lease,
            };

            match lease {
                Ok(Some(lease)) => self.process(lease, &cancel).await,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(worker_id = %self.worker_id, error = %e, "dequeue failed");
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                }
            }
        }
        tracing::info!(worker_id = %self.worker_id, "worker stopped");
    }

    /// Run one job attempt through the state machine:
    ///
    /// ```text
    /// QUEUED --dequeue--> PROCESSING --success--> COMPLETED
    ///                          |--recoverable--> RETRYING --delay--> QUEUED
    ///                          |--exhausted   --> FAILED
    /// ```
    pub async fn process(&self, lease: JobLease, cancel: &CancellationToken) {
        let video_id = lease.payload.video_id;
        tracing::info!(
            worker_id = %self.worker_id,
            video_id = %video_id,
            attempt = lease.attempt,
            "processing transcode job"
        );

        match self.process_attempt(&lease, cancel).await {
            Ok(()) => {
                if let Err(e) = self.queue.complete(&lease).await {
                    tracing::error!(video_id = %video_id, error = %e, "failed to complete lease");
                }
                tracing::info!(video_id = %video_id, "transcode completed");
            }
            Err(Error::Cancelled) => {
                // Shutdown: hand the job back untouched; no DB writes.
                tracing::info!(video_id = %video_id, "cancelled mid-job, releasing lease");
                if let Err(e) = self.queue.release(&lease).await {
                    tracing::error!(video_id = %video_id, error = %e, "failed to release lease");
                }
            }
            Err(err) => self.record_failure(&lease, video_id, err).await,
        }
    }

    async fn process_attempt(&self, lease: &JobLease, cancel: &CancellationToken) -> Result<()> {
        let payload = &lease.payload;
        let video_id = payload.video_id;

        self.repo
            .update_job_status(video_id, JobStatus::Processing, 0, None)
            .await?;
        self.repo.assign_worker(video_id, &self.worker_id).await?;
        self.repo
            .update_video_status(video_id, VideoStatus::Processing)
            .await?;

        let metadata = self.prober.probe(&payload.input_path).await?;
        self.repo.update_video_metadata(video_id, &metadata).await?;

        let (progress_cb, progress_task) =
            self.spawn_progress_writer(lease.job_id.clone(), video_id);

        let request = TranscodeRequest {
            video_id,
            input_path: payload.input_path.clone(),
            requested_resolutions: payload.resolutions.clone(),
            metadata: metadata.clone(),
        };
        let outcome = self
            .transcoder
            .transcode_to_hls(&request, Some(progress_cb), cancel.clone())
            .await;
        // The callback owning the sender was dropped with the transcode
        // call; await the writer so progress lands before status flips.
        let _ = progress_task.await;
        let outcome = outcome?;

        let thumbnail_path = self
            .transcoder
            .thumbnail(
                &payload.input_path,
                video_id,
                metadata.duration_sec,
                cancel.clone(),
            )
            .await?;

        let outputs = build_outputs(video_id, &outcome);
        self.repo
            .save_outputs(video_id, &outputs, &thumbnail_path)
            .await?;
        self.repo
            .save_job_result(video_id, &job_result(&outcome))
            .await?;
        self.repo
            .update_video_status(video_id, VideoStatus::Ready)
            .await?;
        self.repo
            .update_job_status(video_id, JobStatus::Completed, 100, None)
            .await?;

        if self.delete_source {
            if let Err(e) = self.storage.delete(&payload.input_path).await {
                tracing::warn!(video_id = %video_id, error = %e, "source cleanup failed");
            }
        }

        Ok(())
    }

    /// Bridge the transcoder's sync progress callback into async repository
    /// and queue writes. The transcoder already debounces to 1% granularity.
    fn spawn_progress_writer(
        &self,
        job_id: String,
        video_id: Uuid,
    ) -> (ProgressCallback, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) =
            tokio::sync::mpsc::unbounded_channel::<crate::domain::av::TranscodeProgress>();
        let repo = self.repo.clone();
        let queue = self.queue.clone();

        let task = tokio::spawn(async move {
            while let Some(p) = rx.recv().await {
                let detail = ProgressDetail::new(p.percent, "transcoding")
                    .with_resolution(&p.current_resolution);
                if let Err(e) = repo.update_job_progress(video_id, &detail).await {
                    tracing::warn!(video_id = %video_id, error = %e, "progress write failed");
                }
                if let Err(e) = queue.set_progress(&job_id, &detail).await {
                    tracing::debug!(video_id = %video_id, error = %e, "queue progress write failed");
                }
            }
        });

        let cb: ProgressCallback = Arc::new(move |p| {
            let _ = tx.send(p);
        });
        (cb, task)
    }

    async fn record_failure(&self, lease: &JobLease, video_id: Uuid, err: Error) {
        tracing::error!(
            worker_id = %self.worker_id,
            video_id = %video_id,
            attempt = lease.attempt,
            error = %err,
            "transcode attempt failed"
        );

        let message = format!("{}: {}", err.code().as_str(), err);
        if let Err(e) = self
            .repo
            .update_video_status(video_id, VideoStatus::Failed)
            .await
        {
            tracing::error!(video_id = %video_id, error = %e, "failed to mark video FAILED");
        }
        if let Err(e) = self
            .repo
            .update_job_status(video_id, JobStatus::Failed, 0, Some(message.clone()))
            .await
        {
            tracing::error!(video_id = %video_id, error = %e, "failed to mark job FAILED");
        }

        match self.queue.fail(lease, &message, true).await {
            Ok(FailOutcome::Retrying { next_retry_at }) => {
                if let Err(e) = self.repo.mark_job_retrying(video_id, next_retry_at).await {
                    tracing::error!(video_id = %video_id, error = %e, "failed to mark job RETRYING");
                }
            }
            Ok(FailOutcome::Exhausted) => {
                tracing::warn!(video_id = %video_id, "retries exhausted, job terminally failed");
            }
            Err(e) => {
                tracing::error!(video_id = %video_id, error = %e, "failed to fail lease");
            }
        }
    }
}

/// Repository rows for a transcode outcome.
fn build_outputs(video_id: Uuid, outcome: &TranscodeOutcome) -> Vec<VideoOutput> {
    let now = Utc::now();
    outcome
        .outputs
        .iter()
        .map(|o| VideoOutput {
            id: Uuid::new_v4(),
            video_id,
            resolution: o.resolution.clone(),
            width: o.width as i32,
            height: o.height as i32,
            bitrate_kbps: o.bitrate_kbps as i32,
            playlist_path: o.playlist_path.clone(),
            segment_dir: paths::segment_dir(video_id, &o.resolution),
            file_size: o.file_size as i64,
            segment_count: o.segment_paths.len() as i32,
            segment_duration: SEGMENT_DURATION_SECS,
            status: OutputStatus::Ready,
            completed_at: Some(now),
        })
        .collect()
}

fn job_result(outcome: &TranscodeOutcome) -> JobResult {
    JobResult {
        completed_resolutions: outcome
            .outputs
            .iter()
            .map(|o| o.resolution.clone())
            .collect(),
        failed_resolutions: outcome.failed_resolutions.clone(),
        skipped_resolutions: outcome.skipped_resolutions.clone(),
        total_output_bytes: outcome.outputs.iter().map(|o| o.file_size as i64).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::fs::LocalStorage;
    use crate::domain::av::cmd::{EncodeOutcome, MockEncodeRunner, MockProbeRunner};
    use crate::domain::job::TranscodePayload;
    use crate::ports::queue::MockJobQueue;
    use crate::ports::repository::MockVideoRepository;
    use mockall::predicate::eq;
    use std::path::PathBuf;

    const PROBE_JSON: &str = r#"{
        "format": { "duration": "60.0", "bit_rate": "6000000" },
        "streams": [{
            "codec_type": "video", "codec_name": "h264",
            "width": 1920, "height": 1080,
            "r_frame_rate": "30/1", "display_aspect_ratio": "16:9"
        }]
    }"#;

    fn lease(video_id: Uuid, attempt: u32) -> JobLease {
        JobLease {
            job_id: format!("transcode-{}", video_id),
            job_type: JobType::HlsTranscode,
            payload: TranscodePayload {
                video_id,
                input_path: paths::upload_path(video_id, ".mp4"),
                resolutions: vec!["480p".into(), "720p".into(), "1080p".into()],
            },
            attempt,
            max_attempts: 3,
        }
    }

    fn fabricate_rendition(args: &[String], segments: usize) {
        let playlist = PathBuf::from(args.last().unwrap());
        let dir = playlist.parent().unwrap();
        let mut content = String::from("#EXTM3U\n#EXT-X-PLAYLIST-TYPE:VOD\n");
        for i in 0..segments {
            let name = paths::segment_name(i as u32);
            std::fs::write(dir.join(&name), vec![0u8; 32]).unwrap();
            content.push_str("#EXTINF:10.0,\n");
            content.push_str(&name);
            content.push('\n');
        }
        content.push_str("#EXT-X-ENDLIST\n");
        std::fs::write(&playlist, content).unwrap();
    }

    /// Encode runner that fabricates renditions and thumbnails alike.
    fn happy_runner() -> MockEncodeRunner {
        let mut runner = MockEncodeRunner::new();
        runner
            .expect_run_encode()
            .returning(|args, _duration, sink, _cancel| {
                let out = PathBuf::from(args.last().unwrap());
                if out.extension().and_then(|e| e.to_str()) == Some("jpg") {
                    std::fs::write(&out, b"jpeg").unwrap();
                } else {
                    fabricate_rendition(args, 6);
                    if let Some(sink) = sink {
                        sink(100.0);
                    }
                }
                Ok(EncodeOutcome {
                    success: true,
                    stderr_tail: String::new(),
                })
            });
        runner
    }

    fn worker_with(
        repo: MockVideoRepository,
        queue: MockJobQueue,
        storage: Arc<LocalStorage>,
        encode: MockEncodeRunner,
        delete_source: bool,
    ) -> Worker {
        let mut probe = MockProbeRunner::new();
        probe
            .expect_run_probe()
            .returning(|_| Ok(PROBE_JSON.as_bytes().to_vec()));

        let storage_dyn: Arc<dyn Storage> = storage;
        let encode: Arc<dyn crate::domain::av::EncodeRunner> = Arc::new(encode);
        Worker::new(
            "worker-0",
            Arc::new(repo),
            Arc::new(queue),
            storage_dyn.clone(),
            MediaProber::new(storage_dyn.clone(), Arc::new(probe)),
            HlsTranscoder::new(storage_dyn, encode),
            delete_source,
        )
    }

    #[tokio::test]
    async fn happy_path_walks_the_full_state_machine() {
        let video_id = Uuid::new_v4();
        let base = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(base.path()));
        storage
            .save(b"src", &paths::upload_path(video_id, ".mp4"))
            .await
            .unwrap();

        let mut repo = MockVideoRepository::new();
        repo.expect_update_job_status()
            .with(eq(video_id), eq(JobStatus::Processing), eq(0), eq(None))
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        repo.expect_assign_worker()
            .with(eq(video_id), eq("worker-0"))
            .times(1)
            .returning(|_, _| Ok(()));
        repo.expect_update_video_status()
            .with(eq(video_id), eq(VideoStatus::Processing))
            .times(1)
            .returning(|_, _| Ok(()));
        repo.expect_update_video_metadata()
            .withf(|_, meta| meta.height == 1080 && meta.duration_sec == 60.0)
            .times(1)
            .returning(|_, _| Ok(()));
        repo.expect_update_job_progress().returning(|_, _| Ok(()));
        repo.expect_save_outputs()
            .withf(move |id, outputs, thumb| {
                *id == video_id
                    && outputs.len() == 3
                    && outputs
                        .iter()
                        .all(|o| o.status == OutputStatus::Ready && o.segment_count == 6)
                    && thumb == paths::thumbnail_path(video_id)
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        repo.expect_save_job_result()
            .withf(|_, result| {
                result.completed_resolutions == vec!["480p", "720p", "1080p"]
                    && result.failed_resolutions.is_empty()
            })
            .times(1)
            .returning(|_, _| Ok(()));
        repo.expect_update_video_status()
            .with(eq(video_id), eq(VideoStatus::Ready))
            .times(1)
            .returning(|_, _| Ok(()));
        repo.expect_update_job_status()
            .with(eq(video_id), eq(JobStatus::Completed), eq(100), eq(None))
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let mut queue = MockJobQueue::new();
        queue.expect_set_progress().returning(|_, _| Ok(()));
        queue.expect_complete().times(1).returning(|_| Ok(()));

        let worker = worker_with(repo, queue, storage, happy_runner(), false);
        worker
            .process(lease(video_id, 1), &CancellationToken::new())
            .await;
    }

    #[tokio::test]
    async fn upscale_only_request_fails_and_schedules_retry() {
        let video_id = Uuid::new_v4();
        let base = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(base.path()));
        storage
            .save(b"src", &paths::upload_path(video_id, ".mp4"))
            .await
            .unwrap();

        let mut repo = MockVideoRepository::new();
        repo.expect_update_job_status()
            .with(eq(video_id), eq(JobStatus::Processing), eq(0), eq(None))
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        repo.expect_assign_worker()
            .with(eq(video_id), eq("worker-0"))
            .times(1)
            .returning(|_, _| Ok(()));
        repo.expect_update_video_status()
            .with(eq(video_id), eq(VideoStatus::Processing))
            .times(1)
            .returning(|_, _| Ok(()));
        repo.expect_update_video_metadata().returning(|_, _| Ok(()));
        repo.expect_update_video_status()
            .with(eq(video_id), eq(VideoStatus::Failed))
            .times(1)
            .returning(|_, _| Ok(()));
        repo.expect_update_job_status()
            .withf(|_, status, _, error| {
                *status == JobStatus::Failed
                    && error
                        .as_deref()
                        .map(|e| e.starts_with("ALL_RENDITIONS_FAILED"))
                        .unwrap_or(false)
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        repo.expect_mark_job_retrying()
            .times(1)
            .returning(|_, _| Ok(()));

        let mut queue = MockJobQueue::new();
        queue.expect_set_progress().returning(|_, _| Ok(()));
        queue
            .expect_fail()
            .withf(|_, error, retry| error.starts_with("ALL_RENDITIONS_FAILED") && *retry)
            .times(1)
            .returning(|_, _, _| {
                Ok(FailOutcome::Retrying {
                    next_retry_at: Utc::now(),
                })
            });

        // Never reaches an encode: the whole request is filtered out.
        let runner = MockEncodeRunner::new();
        let worker = worker_with(repo, queue, storage, runner, false);

        let mut lease = lease(video_id, 1);
        lease.payload.resolutions = vec!["4k".into()];
        worker.process(lease, &CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn exhausted_attempts_are_terminal() {
        let video_id = Uuid::new_v4();
        let base = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(base.path()));
        // No source saved: the probe fails with SourceUnreadable.

        let mut repo = MockVideoRepository::new();
        repo.expect_update_job_status()
            .with(eq(video_id), eq(JobStatus::Processing), eq(0), eq(None))
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        repo.expect_assign_worker()
            .with(eq(video_id), eq("worker-0"))
            .times(1)
            .returning(|_, _| Ok(()));
        repo.expect_update_video_status()
            .with(eq(video_id), eq(VideoStatus::Processing))
            .times(1)
            .returning(|_, _| Ok(()));
        repo.expect_update_video_status()
            .with(eq(video_id), eq(VideoStatus::Failed))
            .times(1)
            .returning(|_, _| Ok(()));
        repo.expect_update_job_status()
            .withf(|_, status, _, _| *status == JobStatus::Failed)
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        // No mark_job_retrying expectation: the queue says exhausted.

        let mut queue = MockJobQueue::new();
        queue
            .expect_fail()
            .times(1)
            .returning(|_, _, _| Ok(FailOutcome::Exhausted));

        let worker = worker_with(repo, queue, storage, MockEncodeRunner::new(), false);
        worker
            .process(lease(video_id, 3), &CancellationToken::new())
            .await;
    }

    #[tokio::test]
    async fn source_is_deleted_after_success_when_configured() {
        let video_id = Uuid::new_v4();
        let base = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(base.path()));
        let input = paths::upload_path(video_id, ".mp4");
        storage.save(b"src", &input).await.unwrap();

        let mut repo = MockVideoRepository::new();
        repo.expect_update_job_status().returning(|_, _, _, _| Ok(()));
        repo.expect_assign_worker().returning(|_, _| Ok(()));
        repo.expect_update_video_status().returning(|_, _| Ok(()));
        repo.expect_update_video_metadata().returning(|_, _| Ok(()));
        repo.expect_update_job_progress().returning(|_, _| Ok(()));
        repo.expect_save_outputs().returning(|_, _, _| Ok(()));
        repo.expect_save_job_result().returning(|_, _| Ok(()));

        let mut queue = MockJobQueue::new();
        queue.expect_set_progress().returning(|_, _| Ok(()));
        queue.expect_complete().times(1).returning(|_| Ok(()));

        let worker = worker_with(repo, queue, storage.clone(), happy_runner(), true);
        worker
            .process(lease(video_id, 1), &CancellationToken::new())
            .await;

        assert!(!storage.exists(&input).await.unwrap());
    }
}
