//! Streaming read path: playlists, segments, and thumbnails, gated on
//! repository state so we never serve a partially written artifact.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::hls::{MasterPlaylist, MasterVariant};
use crate::domain::paths;
use crate::domain::video::{OutputStatus, Video, VideoOutput, VideoStatus};
use crate::error::{Error, ErrorCode, Result};
use crate::ports::repository::VideoRepository;
use crate::ports::storage::Storage;

/// Read-side service for HLS delivery.
pub struct Streamer {
    repo: Arc<dyn VideoRepository>,
    storage: Arc<dyn Storage>,
}

impl Streamer {
    pub fn new(repo: Arc<dyn VideoRepository>, storage: Arc<dyn Storage>) -> Self {
        Self { repo, storage }
    }

    /// The master playlist, regenerated from repository rows ordered by
    /// ascending bitrate.
    pub async fn get_master_playlist(&self, video_id: Uuid) -> Result<Vec<u8>> {
        self.ready_video(video_id, ErrorCode::MasterPlaylistNotFound)
            .await?;
        let outputs = self.ready_outputs(video_id).await?;
        if outputs.is_empty() {
            return Err(Error::not_found(
                ErrorCode::MasterPlaylistNotFound,
                format!("video {} has no renditions", video_id),
            ));
        }

        let variants = outputs
            .iter()
            .map(|o| MasterVariant {
                resolution: o.resolution.clone(),
                width: o.width as u32,
                height: o.height as u32,
                bitrate_kbps: o.bitrate_kbps as u32,
            })
            .collect();
        Ok(MasterPlaylist::ascending_bitrate(variants)
            .render()
            .into_bytes())
    }

    /// A variant playlist's bytes.
    pub async fn get_playlist(&self, video_id: Uuid, resolution: &str) -> Result<Vec<u8>> {
        self.ready_video(video_id, ErrorCode::PlaylistNotFound)
            .await?;
        let output = self
            .ready_output(video_id, resolution, ErrorCode::PlaylistNotFound)
            .await?;
        self.storage
            .get(&output.playlist_path)
            .await
            .map_err(|e| not_found_on_missing(e, ErrorCode::PlaylistNotFound))
    }

    /// A segment's bytes. The name is validated before it reaches storage.
    pub async fn get_segment(
        &self,
        video_id: Uuid,
        resolution: &str,
        segment: &str,
    ) -> Result<Vec<u8>> {
        if !paths::is_valid_segment_name(segment) {
            return Err(Error::invalid(
                ErrorCode::InvalidSegmentName,
                format!("invalid segment name '{}'", segment),
            ));
        }
        self.ready_video(video_id, ErrorCode::SegmentNotFound)
            .await?;
        self.ready_output(video_id, resolution, ErrorCode::SegmentNotFound)
            .await?;
        self.storage
            .get(&paths::segment_path(video_id, resolution, segment))
            .await
            .map_err(|e| not_found_on_missing(e, ErrorCode::SegmentNotFound))
    }

    /// The thumbnail's bytes.
    pub async fn get_thumbnail(&self, video_id: Uuid) -> Result<Vec<u8>> {
        let video = self
            .ready_video(video_id, ErrorCode::ThumbnailNotFound)
            .await?;
        let path = video.thumbnail_path.ok_or_else(|| {
            Error::not_found(
                ErrorCode::ThumbnailNotFound,
                format!("video {} has no thumbnail", video_id),
            )
        })?;
        self.storage
            .get(&path)
            .await
            .map_err(|e| not_found_on_missing(e, ErrorCode::ThumbnailNotFound))
    }

    /// The video, iff it exists and is READY. `code` names the artifact the
    /// caller was after, so the 404 reads right.
    async fn ready_video(&self, video_id: Uuid, code: ErrorCode) -> Result<Video> {
        let video = self
            .repo
            .find_video(video_id)
            .await?
            .ok_or_else(|| Error::video_not_found(video_id))?;
        if video.status != VideoStatus::Ready {
            return Err(Error::not_found(
                code,
                format!(
                    "video {} is not ready for streaming (status {})",
                    video_id,
                    video.status.as_str()
                ),
            ));
        }
        Ok(video)
    }

    async fn ready_outputs(&self, video_id: Uuid) -> Result<Vec<VideoOutput>> {
        Ok(self
            .repo
            .find_outputs(video_id)
            .await?
            .into_iter()
            .filter(|o| o.status == OutputStatus::Ready)
            .collect())
    }

    async fn ready_output(
        &self,
        video_id: Uuid,
        resolution: &str,
        code: ErrorCode,
    ) -> Result<VideoOutput> {
        let output = self.repo.find_output(video_id, resolution).await?;
        match output {
            Some(output) if output.status == OutputStatus::Ready => Ok(output),
            _ => Err(Error::not_found(
                code,
                format!("no {} rendition for video {}", resolution, video_id),
            )),
        }
    }
}

/// Keep storage-missing errors as 404s with the artifact's own code.
fn not_found_on_missing(err: Error, code: ErrorCode) -> Error {
    match err {
        Error::BlobMissing(path) => Error::not_found(code, format!("{} missing in storage", path)),
        other => other,
    }
}
