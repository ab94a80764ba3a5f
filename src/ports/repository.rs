//! Relational repository capability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::av::MediaMetadata;
use crate::domain::job::{JobStatus, ProgressDetail, TranscodingJob};
use crate::domain::video::{Video, VideoOutput, VideoStatus};
use crate::error::Result;

/// Sort order for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl Default for SortOrder {
    fn default() -> Self {
        SortOrder::Desc
    }
}

/// Filter criteria for listing videos.
#[derive(Debug, Clone, Default)]
pub struct VideoFilter {
    pub page: u32,
    pub limit: u32,
    /// Whitelisted column name; anything else falls back to created_at
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
    pub status: Option<VideoStatus>,
    /// Case-insensitive title substring
    pub search: Option<String>,
    /// Videos carrying all of these tags
    pub tags: Vec<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    /// Videos with a READY output at this resolution
    pub resolution: Option<String>,
}

impl VideoFilter {
    /// Clamp paging to sane bounds (page >= 1, 1 <= limit <= 100).
    pub fn normalized(mut self) -> Self {
        if self.page == 0 {
            self.page = 1;
        }
        self.limit = self.limit.clamp(1, 100);
        self
    }

    pub fn offset(&self) -> u32 {
        (self.page.max(1) - 1) * self.limit
    }
}

/// One page of results.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, page: u32, limit: u32) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            total.div_ceil(limit as u64) as u32
        };
        Self {
            items,
            total,
            page,
            limit,
            total_pages,
        }
    }
}

/// Persistence for videos, outputs, and transcoding jobs.
///
/// This layer enforces status-transition legality, monotonic progress within
/// an attempt, and the attempt ceiling.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoRepository: Send + Sync {
    /// Create the video and its job in a single transaction.
    async fn create_video_and_job(&self, video: &Video, job: &TranscodingJob) -> Result<()>;

    async fn find_video(&self, id: Uuid) -> Result<Option<Video>>;

    async fn find_videos(&self, filter: &VideoFilter) -> Result<Page<Video>>;

    /// Apply a status transition; sets `updated_at`, and `processed_at` iff
    /// the new status is READY. Illegal transitions are rejected.
    async fn update_video_status(&self, id: Uuid, status: VideoStatus) -> Result<()>;

    /// Record probed metadata (`duration_seconds = round(duration)`).
    async fn update_video_metadata(&self, id: Uuid, meta: &MediaMetadata) -> Result<()>;

    /// Job status transition keyed by video: sets `started_at` on first
    /// PROCESSING, `completed_at` on COMPLETED/FAILED, and counts the
    /// attempt when it enters PROCESSING (capped at `max_attempts`).
    async fn update_job_status(
        &self,
        video_id: Uuid,
        status: JobStatus,
        progress: i16,
        error: Option<String>,
    ) -> Result<()>;

    /// Record which worker owns the current attempt.
    async fn assign_worker(&self, video_id: Uuid, worker_id: &str) -> Result<()>;

    /// Persist a progress snapshot; the stored percentage never decreases
    /// within an attempt.
    async fn update_job_progress(&self, video_id: Uuid, progress: &ProgressDetail) -> Result<()>;

    /// Schedule metadata for the next attempt.
    async fn mark_job_retrying(&self, video_id: Uuid, next_retry_at: DateTime<Utc>) -> Result<()>;

    /// Record the job's result payload.
    async fn save_job_result(
        &self,
        video_id: Uuid,
        result: &crate::domain::job::JobResult,
    ) -> Result<()>;

    /// Insert READY output rows and set the video's thumbnail in one
    /// transaction.
    async fn save_outputs(
        &self,
        video_id: Uuid,
        outputs: &[VideoOutput],
        thumbnail_path: &str,
    ) -> Result<()>;

    async fn find_outputs(&self, video_id: Uuid) -> Result<Vec<VideoOutput>>;

    async fn find_output(&self, video_id: Uuid, resolution: &str)
        -> Result<Option<VideoOutput>>;

    async fn find_job(&self, video_id: Uuid) -> Result<Option<TranscodingJob>>;

    /// Remove outputs, jobs, then the video in one transaction.
    async fn delete_video(&self, id: Uuid) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_normalization_clamps_paging() {
        let f = VideoFilter {
            page: 0,
            limit: 1000,
            ..Default::default()
        }
        .normalized();
        assert_eq!(f.page, 1);
        assert_eq!(f.limit, 100);
        assert_eq!(f.offset(), 0);

        let f = VideoFilter {
            page: 3,
            limit: 20,
            ..Default::default()
        }
        .normalized();
        assert_eq!(f.offset(), 40);
    }

    #[test]
    fn page_computes_total_pages() {
        let page: Page<u8> = Page::new(vec![], 41, 1, 20);
        assert_eq!(page.total_pages, 3);
        let page: Page<u8> = Page::new(vec![], 40, 1, 20);
        assert_eq!(page.total_pages, 2);
        let page: Page<u8> = Page::new(vec![], 0, 1, 20);
        assert_eq!(page.total_pages, 0);
    }
}
