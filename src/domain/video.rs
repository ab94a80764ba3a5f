//! Video and rendition entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Lifecycle of a video asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Pending => "PENDING",
            VideoStatus::Processing => "PROCESSING",
            VideoStatus::Ready => "READY",
            VideoStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "PENDING" => Ok(VideoStatus::Pending),
            "PROCESSING" => Ok(VideoStatus::Processing),
            "READY" => Ok(VideoStatus::Ready),
            "FAILED" => Ok(VideoStatus::Failed),
            other => Err(Error::InvalidMetadata(format!(
                "unknown video status '{}'",
                other
            ))),
        }
    }

    /// Whether a transition from `self` to `to` is legal.
    ///
    /// READY is terminal. FAILED may re-enter the pipeline through an
    /// explicit retry (PENDING) or a scheduled re-attempt (PROCESSING).
    pub fn can_transition(&self, to: VideoStatus) -> bool {
        use VideoStatus::*;
        if *self == to {
            return true;
        }
        matches!(
            (*self, to),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Ready)
                | (Processing, Failed)
                | (Failed, Pending)
                | (Failed, Processing)
        )
    }
}

/// Lifecycle of a single rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl OutputStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStatus::Pending => "PENDING",
            OutputStatus::Processing => "PROCESSING",
            OutputStatus::Ready => "READY",
            OutputStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "PENDING" => Ok(OutputStatus::Pending),
            "PROCESSING" => Ok(OutputStatus::Processing),
            "READY" => Ok(OutputStatus::Ready),
            "FAILED" => Ok(OutputStatus::Failed),
            other => Err(Error::InvalidMetadata(format!(
                "unknown output status '{}'",
                other
            ))),
        }
    }
}

/// The logical video asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub original_filename: String,
    /// Lowercased, with leading dot (".mp4")
    pub file_extension: String,
    pub file_size: i64,
    pub mime_type: String,
    /// Storage path of the raw upload
    pub upload_path: String,
    pub duration_seconds: Option<i32>,
    pub thumbnail_path: Option<String>,
    pub status: VideoStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Video {
    /// READY implies a thumbnail, a processed timestamp, and at least one
    /// rendition; callers verify the rendition count separately.
    pub fn is_ready(&self) -> bool {
        self.status == VideoStatus::Ready
            && self.thumbnail_path.is_some()
            && self.processed_at.is_some()
    }
}

/// One HLS rendition of a video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoOutput {
    pub id: Uuid,
    pub video_id: Uuid,
    /// Ladder label ("480p" | "720p" | "1080p")
    pub resolution: String,
    pub width: i32,
    pub height: i32,
    /// Target video bitrate in kbps
    pub bitrate_kbps: i32,
    pub playlist_path: String,
    pub segment_dir: String,
    /// Sum of segment sizes plus the playlist
    pub file_size: i64,
    pub segment_count: i32,
    pub segment_duration: f64,
    pub status: OutputStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn video(status: VideoStatus) -> Video {
        Video {
            id: Uuid::new_v4(),
            title: "clip".into(),
            description: None,
            tags: vec![],
            original_filename: "clip.mp4".into(),
            file_extension: ".mp4".into(),
            file_size: 1024,
            mime_type: "video/mp4".into(),
            upload_path: "uploads/raw/x.mp4".into(),
            duration_seconds: None,
            thumbnail_path: None,
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            processed_at: None,
        }
    }

    #[test]
    fn ready_is_terminal() {
        assert!(!VideoStatus::Ready.can_transition(VideoStatus::Processing));
        assert!(!VideoStatus::Ready.can_transition(VideoStatus::Pending));
        assert!(!VideoStatus::Ready.can_transition(VideoStatus::Failed));
    }

    #[test]
    fn failed_can_be_retried() {
        assert!(VideoStatus::Failed.can_transition(VideoStatus::Pending));
        assert!(VideoStatus::Failed.can_transition(VideoStatus::Processing));
    }

    #[test]
    fn pending_to_ready_requires_processing() {
        assert!(!VideoStatus::Pending.can_transition(VideoStatus::Ready));
        assert!(VideoStatus::Pending.can_transition(VideoStatus::Processing));
        assert!(VideoStatus::Processing.can_transition(VideoStatus::Ready));
    }

    #[test]
    fn same_status_is_a_noop_transition() {
        assert!(VideoStatus::Processing.can_transition(VideoStatus::Processing));
    }

    #[test]
    fn ready_invariant_needs_thumbnail_and_timestamp() {
        let mut v = video(VideoStatus::Ready);
        assert!(!v.is_ready());
        v.thumbnail_path = Some("thumbnails/x/thumbnail.jpg".into());
        v.processed_at = Some(Utc::now());
        assert!(v.is_ready());
    }

    #[test]
    fn status_roundtrips_through_strings() {
        for s in [
            VideoStatus::Pending,
            VideoStatus::Processing,
            VideoStatus::Ready,
            VideoStatus::Failed,
        ] {
            assert_eq!(VideoStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(VideoStatus::parse("DONE").is_err());
    }
}
