//! SQLx implementation of the video repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::domain::av::MediaMetadata;
use crate::domain::job::{
    JobResult, JobStatus, JobType, ProgressDetail, TranscodePayload, TranscodingJob,
};
use crate::domain::video::{OutputStatus, Video, VideoOutput, VideoStatus};
use crate::error::{Error, Result};
use crate::ports::repository::{Page, SortOrder, VideoFilter, VideoRepository};

/// Row model for `videos`.
#[derive(Debug, FromRow)]
struct VideoRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    tags: Vec<String>,
    original_filename: String,
    file_extension: String,
    file_size: i64,
    mime_type: String,
    upload_path: String,
    duration_seconds: Option<i32>,
    thumbnail_path: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<VideoRow> for Video {
    type Error = Error;

    fn try_from(row: VideoRow) -> Result<Video> {
        Ok(Video {
            id: row.id,
            title: row.title,
            description: row.description,
            tags: row.tags,
            original_filename: row.original_filename,
            file_extension: row.file_extension,
            file_size: row.file_size,
            mime_type: row.mime_type,
            upload_path: row.upload_path,
            duration_seconds: row.duration_seconds,
            thumbnail_path: row.thumbnail_path,
            status: VideoStatus::parse(&row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            processed_at: row.processed_at,
        })
    }
}

/// Row model for `video_outputs`.
#[derive(Debug, FromRow)]
struct OutputRow {
    id: Uuid,
    video_id: Uuid,
    resolution: String,
    width: i32,
    height: i32,
    bitrate_kbps: i32,
    playlist_path: String,
    segment_dir: String,
    file_size: i64,
    segment_count: i32,
    segment_duration: f64,
    status: String,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutputRow> for VideoOutput {
    type Error = Error;

    fn try_from(row: OutputRow) -> Result<VideoOutput> {
        Ok(VideoOutput {
            id: row.id,
            video_id: row.video_id,
            resolution: row.resolution,
            width: row.width,
            height: row.height,
            bitrate_kbps: row.bitrate_kbps,
            playlist_path: row.playlist_path,
            segment_dir: row.segment_dir,
            file_size: row.file_size,
            segment_count: row.segment_count,
            segment_duration: row.segment_duration,
            status: OutputStatus::parse(&row.status)?,
            completed_at: row.completed_at,
        })
    }
}

/// Row model for `transcoding_jobs`.
#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    video_id: Uuid,
    job_type: String,
    status: String,
    progress_percentage: i16,
    attempt_count: i32,
    max_attempts: i32,
    job_data: serde_json::Value,
    result_data: Option<serde_json::Value>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
    worker_id: Option<String>,
}

impl TryFrom<JobRow> for TranscodingJob {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<TranscodingJob> {
        let payload: TranscodePayload =
            serde_json::from_value(row.job_data.get("payload").cloned().unwrap_or_default())?;
        let result_data: Option<JobResult> = row
            .result_data
            .map(serde_json::from_value)
            .transpose()?;
        Ok(TranscodingJob {
            id: row.id,
            video_id: row.video_id,
            job_type: JobType::parse(&row.job_type)?,
            status: JobStatus::parse(&row.status)?,
            progress_percentage: row.progress_percentage,
            attempt_count: row.attempt_count,
            max_attempts: row.max_attempts,
            job_data: payload,
            result_data,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            next_retry_at: row.next_retry_at,
            worker_id: row.worker_id,
        })
    }
}

/// `VideoRepository` over a Postgres pool.
pub struct PgVideoRepository {
    pool: PgPool,
}

impl PgVideoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Whitelist the sortable columns; anything unknown sorts by creation.
    fn sort_column(requested: Option<&str>) -> &'static str {
        match requested {
            Some("title") => "title",
            Some("fileSize") | Some("file_size") => "file_size",
            Some("duration") | Some("duration_seconds") => "duration_seconds",
            Some("status") => "status",
            Some("updatedAt") | Some("updated_at") => "updated_at",
            _ => "created_at",
        }
    }

    fn push_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, filter: &'a VideoFilter) {
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(search) = &filter.search {
            qb.push(" AND title ILIKE ")
                .push_bind(format!("%{}%", search));
        }
        if !filter.tags.is_empty() {
            qb.push(" AND tags @> ").push_bind(&filter.tags);
        }
        if let Some(from) = filter.date_from {
            qb.push(" AND created_at >= ").push_bind(from);
        }
        if let Some(to) = filter.date_to {
            qb.push(" AND created_at <= ").push_bind(to);
        }
        if let Some(resolution) = &filter.resolution {
            qb.push(
                " AND EXISTS (SELECT 1 FROM video_outputs vo \
                 WHERE vo.video_id = videos.id AND vo.status = 'READY' AND vo.resolution = ",
            )
            .push_bind(resolution)
            .push(")");
        }
    }
}

#[async_trait]
impl VideoRepository for PgVideoRepository {
    async fn create_video_and_job(&self, video: &Video, job: &TranscodingJob) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO videos (
                id, title, description, tags, original_filename, file_extension,
                file_size, mime_type, upload_path, duration_seconds, thumbnail_path,
                status, created_at, updated_at, processed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(video.id)
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.tags)
        .bind(&video.original_filename)
        .bind(&video.file_extension)
        .bind(video.file_size)
        .bind(&video.mime_type)
        .bind(&video.upload_path)
        .bind(video.duration_seconds)
        .bind(&video.thumbnail_path)
        .bind(video.status.as_str())
        .bind(video.created_at)
        .bind(video.updated_at)
        .bind(video.processed_at)
        .execute(&mut *tx)
        .await?;

        let job_data = serde_json::json!({ "payload": job.job_data });
        sqlx::query(
            r#"
            INSERT INTO transcoding_jobs (
                id, video_id, job_type, status, progress_percentage,
                attempt_count, max_attempts, job_data, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(job.id)
        .bind(job.video_id)
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(job.progress_percentage)
        .bind(job.attempt_count)
        .bind(job.max_attempts)
        .bind(job_data)
        .bind(job.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_video(&self, id: Uuid) -> Result<Option<Video>> {
        let row: Option<VideoRow> = sqlx::query_as("SELECT * FROM videos WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Video::try_from).transpose()
    }

    async fn find_videos(&self, filter: &VideoFilter) -> Result<Page<Video>> {
        let filter = filter.clone().normalized();

        let mut count_qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT COUNT(*) FROM videos WHERE 1=1");
        Self::push_filters(&mut count_qb, &filter);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT * FROM videos WHERE 1=1");
        Self::push_filters(&mut qb, &filter);
        qb.push(" ORDER BY ")
            .push(Self::sort_column(filter.sort_by.as_deref()))
            .push(match filter.sort_order {
                SortOrder::Asc => " ASC",
                SortOrder::Desc => " DESC",
            })
            .push(" LIMIT ")
            .push_bind(filter.limit as i64)
            .push(" OFFSET ")
            .push_bind(filter.offset() as i64);

        let rows: Vec<VideoRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        let items = rows
            .into_iter()
            .map(Video::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page::new(items, total as u64, filter.page, filter.limit))
    }

    async fn update_video_status(&self, id: Uuid, status: VideoStatus) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM videos WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let current = match current {
            Some(raw) => VideoStatus::parse(&raw)?,
            None => return Err(Error::video_not_found(id)),
        };
        if !current.can_transition(status) {
            return Err(Error::IllegalTransition {
                from: current.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }

        sqlx::query(
            r#"
            UPDATE videos
            SET status = $2,
                updated_at = now(),
                processed_at = CASE WHEN $2 = 'READY' THEN now() ELSE processed_at END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_video_metadata(&self, id: Uuid, meta: &MediaMetadata) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE videos SET duration_seconds = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(meta.duration_sec.round() as i32)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(Error::video_not_found(id));
        }
        Ok(())
    }

    async fn update_job_status(
        &self,
        video_id: Uuid,
        status: JobStatus,
        progress: i16,
        error: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE transcoding_jobs
            SET status = $2,
                progress_percentage = $3,
                error_message = COALESCE($4, error_message),
                started_at = CASE
                    WHEN $2 = 'PROCESSING' AND started_at IS NULL THEN now()
                    ELSE started_at
                END,
                completed_at = CASE
                    WHEN $2 IN ('COMPLETED', 'FAILED') THEN now()
                    ELSE completed_at
                END,
                attempt_count = LEAST(
                    max_attempts,
                    attempt_count + CASE WHEN $2 = 'PROCESSING' THEN 1 ELSE 0 END
                )
            WHERE video_id = $1
            "#,
        )
        .bind(video_id)
        .bind(status.as_str())
        .bind(progress.clamp(0, 100))
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_job_progress(&self, video_id: Uuid, progress: &ProgressDetail) -> Result<()> {
        // GREATEST keeps the stored percentage monotonic within an attempt;
        // the status guard keeps late callbacks from resurrecting a job.
        sqlx::query(
            r#"
            UPDATE transcoding_jobs
            SET progress_percentage = GREATEST(progress_percentage, $2),
                job_data = jsonb_set(job_data, '{progress}', $3::jsonb, true)
            WHERE video_id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(video_id)
        .bind((progress.percent.clamp(0.0, 100.0)) as i16)
        .bind(serde_json::to_value(progress)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn assign_worker(&self, video_id: Uuid, worker_id: &str) -> Result<()> {
        sqlx::query("UPDATE transcoding_jobs SET worker_id = $2 WHERE video_id = $1")
            .bind(video_id)
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_job_retrying(&self, video_id: Uuid, next_retry_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE transcoding_jobs SET status = 'RETRYING', next_retry_at = $2 WHERE video_id = $1",
        )
        .bind(video_id)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_job_result(&self, video_id: Uuid, result: &JobResult) -> Result<()> {
        sqlx::query("UPDATE transcoding_jobs SET result_data = $2 WHERE video_id = $1")
            .bind(video_id)
            .bind(serde_json::to_value(result)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_outputs(
        &self,
        video_id: Uuid,
        outputs: &[VideoOutput],
        thumbnail_path: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for output in outputs {
            // Idempotent across retries: a re-run of the same rendition
            // replaces its previous row.
            sqlx::query(
                r#"
                INSERT INTO video_outputs (
                    id, video_id, resolution, width, height, bitrate_kbps,
                    playlist_path, segment_dir, file_size, segment_count,
                    segment_duration, status, completed_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'READY', now())
                ON CONFLICT (video_id, resolution) DO UPDATE SET
                    playlist_path = EXCLUDED.playlist_path,
                    segment_dir = EXCLUDED.segment_dir,
                    file_size = EXCLUDED.file_size,
                    segment_count = EXCLUDED.segment_count,
                    segment_duration = EXCLUDED.segment_duration,
                    status = 'READY',
                    completed_at = now()
                "#,
            )
            .bind(output.id)
            .bind(video_id)
            .bind(&output.resolution)
            .bind(output.width)
            .bind(output.height)
            .bind(output.bitrate_kbps)
            .bind(&output.playlist_path)
            .bind(&output.segment_dir)
            .bind(output.file_size)
            .bind(output.segment_count)
            .bind(output.segment_duration)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE videos SET thumbnail_path = $2, updated_at = now() WHERE id = $1")
            .bind(video_id)
            .bind(thumbnail_path)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn find_outputs(&self, video_id: Uuid) -> Result<Vec<VideoOutput>> {
        let rows: Vec<OutputRow> = sqlx::query_as(
            "SELECT * FROM video_outputs WHERE video_id = $1 ORDER BY bitrate_kbps ASC",
        )
        .bind(video_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(VideoOutput::try_from).collect()
    }

    async fn find_output(
        &self,
        video_id: Uuid,
        resolution: &str,
    ) -> Result<Option<VideoOutput>> {
        let row: Option<OutputRow> =
            sqlx::query_as("SELECT * FROM video_outputs WHERE video_id = $1 AND resolution = $2")
                .bind(video_id)
                .bind(resolution)
                .fetch_optional(&self.pool)
                .await?;
        row.map(VideoOutput::try_from).transpose()
    }

    async fn find_job(&self, video_id: Uuid) -> Result<Option<TranscodingJob>> {
        let row: Option<JobRow> = sqlx::query_as(
            "SELECT * FROM transcoding_jobs WHERE video_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TranscodingJob::try_from).transpose()
    }

    async fn delete_video(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Cascade-on-delete is the safety net; the explicit order keeps the
        // transaction deadlock-free against concurrent output writes.
        sqlx::query("DELETE FROM video_outputs WHERE video_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM transcoding_jobs WHERE video_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM videos WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(Error::video_not_found(id));
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_column_is_whitelisted() {
        assert_eq!(PgVideoRepository::sort_column(Some("title")), "title");
        assert_eq!(PgVideoRepository::sort_column(Some("fileSize")), "file_size");
        assert_eq!(
            PgVideoRepository::sort_column(Some("duration")),
            "duration_seconds"
        );
        // Injection attempts and unknowns fall back to created_at.
        assert_eq!(
            PgVideoRepository::sort_column(Some("created_at; DROP TABLE videos")),
            "created_at"
        );
        assert_eq!(PgVideoRepository::sort_column(None), "created_at");
    }
}
