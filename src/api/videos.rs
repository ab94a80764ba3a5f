//! Video management handlers: upload, list, details, status, delete.

use axum::body::Bytes;
use axum::extract::{Multipart, Path as AxumPath, Query, State};
use axum::response::Response;
use axum::BoxError;
use chrono::{DateTime, NaiveDate, Utc};
use futures::{pin_mut, Stream, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio_util::io::StreamReader;
use uuid::Uuid;

use crate::domain::job::{transcode_job_key, JobPriority, JobStatus, ProgressDetail};
use crate::domain::paths;
use crate::domain::resolution::LADDER;
use crate::domain::video::{Video, VideoOutput, VideoStatus};
use crate::error::{Error, ErrorCode, Result};
use crate::ports::repository::{Page, SortOrder, VideoFilter};

use super::error::ApiResult;
use super::response::{created, ok};
use super::validate;
use super::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDto {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub original_filename: String,
    pub file_extension: String,
    pub file_size: i64,
    pub mime_type: String,
    pub duration_seconds: Option<i32>,
    pub status: VideoStatus,
    pub thumbnail_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl VideoDto {
    fn from_video(video: &Video, public_root: &str) -> Self {
        let thumbnail_url = video
            .thumbnail_path
            .as_ref()
            .map(|_| format!("{}/api/v1/videos/{}/thumbnail", public_root, video.id));
        Self {
            id: video.id,
            title: video.title.clone(),
            description: video.description.clone(),
            tags: video.tags.clone(),
            original_filename: video.original_filename.clone(),
            file_extension: video.file_extension.clone(),
            file_size: video.file_size,
            mime_type: video.mime_type.clone(),
            duration_seconds: video.duration_seconds,
            status: video.status,
            thumbnail_url,
            created_at: video.created_at,
            updated_at: video.updated_at,
            processed_at: video.processed_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDto {
    pub resolution: String,
    pub width: i32,
    pub height: i32,
    pub bitrate_kbps: i32,
    pub file_size: i64,
    pub segment_count: i32,
    pub segment_duration: f64,
    pub status: crate::domain::video::OutputStatus,
    pub playlist_url: String,
}

impl OutputDto {
    fn from_output(output: &VideoOutput, public_root: &str) -> Self {
        Self {
            resolution: output.resolution.clone(),
            width: output.width,
            height: output.height,
            bitrate_kbps: output.bitrate_kbps,
            file_size: output.file_size,
            segment_count: output.segment_count,
            segment_duration: output.segment_duration,
            status: output.status,
            playlist_url: format!(
                "{}/api/v1/stream/{}/{}/playlist.m3u8",
                public_root, output.video_id, output.resolution
            ),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub video: VideoDto,
    pub job_id: Uuid,
    pub status_url: String,
}

/// A multipart file staged on local disk before it enters storage.
struct StagedFile {
    temp_path: PathBuf,
    original_filename: String,
    mime_type: String,
    size: u64,
}

/// POST /api/v1/videos/upload
pub async fn upload(State(state): State<AppState>, multipart: Multipart) -> ApiResult<Response> {
    let (staged, title, description, tags) = read_upload(&state, multipart).await?;

    let result = finalize_upload(&state, &staged, title, description, tags).await;
    // The staging file is consumed on success and garbage on failure.
    let _ = tokio::fs::remove_file(&staged.temp_path).await;
    Ok(result?)
}

async fn read_upload(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<(StagedFile, Option<String>, Option<String>, Option<String>)> {
    let mut staged: Option<StagedFile> = None;
    let mut title = None;
    let mut description = None;
    let mut tags = None;

    tokio::fs::create_dir_all(&state.config.upload_dir).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::invalid(ErrorCode::FileRequired, format!("malformed upload: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                let original_filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| {
                        Error::invalid(ErrorCode::FileRequired, "file field has no filename")
                    })?;
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let temp_path =
                    Path::new(&state.config.upload_dir).join(format!("{}.upload", Uuid::new_v4()));
                let size = match stream_to_file(&temp_path, field, state.config.max_upload_bytes)
                    .await
                {
                    Ok(size) => size,
                    Err(e) => {
                        let _ = tokio::fs::remove_file(&temp_path).await;
                        return Err(e);
                    }
                };
                staged = Some(StagedFile {
                    temp_path,
                    original_filename,
                    mime_type,
                    size,
                });
            }
            Some("title") => title = Some(read_text(field).await?),
            Some("description") => description = Some(read_text(field).await?),
            Some("tags") => tags = Some(read_text(field).await?),
            _ => continue,
        }
    }

    let staged = staged
        .ok_or_else(|| Error::invalid(ErrorCode::FileRequired, "file field is required"))?;
    Ok((staged, title, description, tags))
}

async fn finalize_upload(
    state: &AppState,
    staged: &StagedFile,
    title: Option<String>,
    description: Option<String>,
    tags: Option<String>,
) -> ApiResult<Response> {
    let extension = validate::validate_file(&staged.original_filename, &staged.mime_type)?;
    let meta = validate::validate_meta(title.as_deref(), description.as_deref(), tags.as_deref())?;

    let video_id = Uuid::new_v4();
    let upload_path = paths::upload_path(video_id, &extension);

    let bytes = tokio::fs::read(&staged.temp_path)
        .await
        .map_err(Error::from)?;
    state.storage.save(&bytes, &upload_path).await?;

    let now = Utc::now();
    let video = Video {
        id: video_id,
        title: meta.title,
        description: meta.description,
        tags: meta.tags,
        original_filename: staged.original_filename.clone(),
        file_extension: extension,
        file_size: staged.size as i64,
        mime_type: staged.mime_type.clone(),
        upload_path,
        duration_seconds: None,
        thumbnail_path: None,
        status: VideoStatus::Pending,
        created_at: now,
        updated_at: now,
        processed_at: None,
    };

    let resolutions = LADDER.iter().map(|r| r.label.to_string()).collect();
    let job = state
        .producer
        .submit_transcode(&video, resolutions, JobPriority::Normal)
        .await?;

    tracing::info!(video_id = %video_id, size = staged.size, "video uploaded and queued");

    Ok(created(UploadResponse {
        video: VideoDto::from_video(&video, &state.config.public_root),
        job_id: job.id,
        status_url: format!(
            "{}/api/v1/videos/{}/status",
            state.config.public_root, video_id
        ),
    }))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String> {
    field
        .text()
        .await
        .map_err(|e| Error::invalid(ErrorCode::FileRequired, format!("malformed field: {}", e)))
}

/// Save a `Stream` to a file, enforcing the size cap as bytes arrive.
async fn stream_to_file<S, E>(path: &Path, stream: S, max_bytes: u64) -> Result<u64>
where
    S: Stream<Item = std::result::Result<Bytes, E>>,
    E: Into<BoxError>,
{
    let reader = StreamReader::new(
        stream.map_err(|err| io::Error::new(io::ErrorKind::Other, err.into())),
    );
    pin_mut!(reader);

    let mut file = BufWriter::new(File::create(path).await?);
    let mut total = 0u64;
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if total > max_bytes {
            return Err(Error::invalid(
                ErrorCode::FileTooLarge,
                format!("upload exceeds the {} byte limit", max_bytes),
            ));
        }
        file.write_all(&buf[..n]).await?;
    }
    file.flush().await?;
    Ok(total)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub status: Option<String>,
    pub search: Option<String>,
    /// Comma-separated
    pub tags: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub resolution: Option<String>,
}

impl ListQuery {
    fn into_filter(self) -> VideoFilter {
        VideoFilter {
            page: self.page,
            limit: if self.limit == 0 { 20 } else { self.limit },
            sort_by: self.sort_by,
            sort_order: match self.sort_order.as_deref() {
                Some("asc") | Some("ASC") => SortOrder::Asc,
                _ => SortOrder::Desc,
            },
            // Unknown status values are ignored rather than rejected.
            status: self
                .status
                .as_deref()
                .and_then(|s| VideoStatus::parse(s).ok()),
            search: self.search.filter(|s| !s.trim().is_empty()),
            tags: self
                .tags
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            date_from: self.date_from.as_deref().and_then(parse_date),
            date_to: self.date_to.as_deref().and_then(parse_date),
            resolution: self.resolution.filter(|r| !r.is_empty()),
        }
        .normalized()
    }
}

/// Accept RFC 3339 timestamps or bare dates.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
}

/// GET /api/v1/videos
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    let filter = query.into_filter();
    let page = state.repo.find_videos(&filter).await?;
    let root = &state.config.public_root;
    let page = Page {
        items: page
            .items
            .iter()
            .map(|v| VideoDto::from_video(v, root))
            .collect::<Vec<_>>(),
        total: page.total,
        page: page.page,
        limit: page.limit,
        total_pages: page.total_pages,
    };
    Ok(ok(page))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoDetails {
    #[serde(flatten)]
    pub video: VideoDto,
    pub outputs: Vec<OutputDto>,
    pub master_playlist_url: Option<String>,
}

/// GET /api/v1/videos/{id}
pub async fn details(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> ApiResult<Response> {
    let video = state
        .repo
        .find_video(id)
        .await?
        .ok_or_else(|| Error::video_not_found(id))?;
    let outputs = state.repo.find_outputs(id).await?;
    let root = &state.config.public_root;

    let master_playlist_url = (video.status == VideoStatus::Ready).then(|| {
        format!("{}/api/v1/stream/{}/master.m3u8", root, id)
    });

    Ok(ok(VideoDetails {
        video: VideoDto::from_video(&video, root),
        outputs: outputs
            .iter()
            .map(|o| OutputDto::from_output(o, root))
            .collect(),
        master_playlist_url,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub video_id: Uuid,
    pub status: VideoStatus,
    pub job_status: Option<JobStatus>,
    pub progress: f64,
    pub current_resolution: Option<String>,
    pub completed_resolutions: Vec<String>,
    pub failed_resolutions: Vec<String>,
    pub current_task: Option<String>,
    pub estimated_time_remaining_secs: Option<u64>,
    pub attempt_count: Option<i32>,
    pub max_attempts: Option<i32>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// GET /api/v1/videos/{id}/status
pub async fn status(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> ApiResult<Response> {
    let video = state
        .repo
        .find_video(id)
        .await?
        .ok_or_else(|| Error::video_not_found(id))?;
    let job = state.repo.find_job(id).await?;

    // Prefer the queue's live snapshot; fall back to the durable row.
    let live: Option<ProgressDetail> = state
        .queue
        .get_progress(&transcode_job_key(id))
        .await
        .unwrap_or_default();

    let (completed, failed) = match job.as_ref().and_then(|j| j.result_data.as_ref()) {
        Some(result) => (
            result.completed_resolutions.clone(),
            result.failed_resolutions.clone(),
        ),
        None => (
            live.as_ref()
                .map(|p| p.completed_resolutions.clone())
                .unwrap_or_default(),
            Vec::new(),
        ),
    };

    let progress = match (&live, &job) {
        _ if video.status == VideoStatus::Ready => 100.0,
        (Some(p), _) => p.percent,
        (None, Some(j)) => j.progress_percentage as f64,
        (None, None) => 0.0,
    };

    Ok(ok(StatusResponse {
        video_id: id,
        status: video.status,
        job_status: job.as_ref().map(|j| j.status),
        progress,
        current_resolution: live.as_ref().and_then(|p| p.current_resolution.clone()),
        completed_resolutions: completed,
        failed_resolutions: failed,
        current_task: live.as_ref().and_then(|p| p.current_task.clone()),
        estimated_time_remaining_secs: live
            .as_ref()
            .and_then(|p| p.estimated_time_remaining_secs),
        attempt_count: job.as_ref().map(|j| j.attempt_count),
        max_attempts: job.as_ref().map(|j| j.max_attempts),
        next_retry_at: job.as_ref().and_then(|j| j.next_retry_at),
        error_message: job.and_then(|j| j.error_message),
    }))
}

/// DELETE /api/v1/videos/{id}
///
/// Rows go first and transactionally; blob cleanup is best-effort with
/// failures logged.
pub async fn remove(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> ApiResult<Response> {
    let video = state
        .repo
        .find_video(id)
        .await?
        .ok_or_else(|| Error::video_not_found(id))?;

    state.repo.delete_video(id).await?;

    if let Err(e) = state.storage.delete(&video.upload_path).await {
        tracing::warn!(video_id = %id, error = %e, "raw upload cleanup failed");
    }
    if let Err(e) = state.storage.rmdir(&paths::hls_dir(id)).await {
        tracing::warn!(video_id = %id, error = %e, "hls cleanup failed");
    }
    if let Err(e) = state.storage.rmdir(&paths::thumbnail_dir(id)).await {
        tracing::warn!(video_id = %id, error = %e, "thumbnail cleanup failed");
    }

    tracing::info!(video_id = %id, "video deleted");
    Ok(ok(serde_json::json!({ "deleted": true, "id": id })))
}
