//! Transcoding jobs: the worker's durable unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Kind of work a job represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    HlsTranscode,
    /// Queue name reserved; no execution path.
    Thumbnail,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::HlsTranscode => "HLS_TRANSCODE",
            JobType::Thumbnail => "THUMBNAIL",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "HLS_TRANSCODE" => Ok(JobType::HlsTranscode),
            "THUMBNAIL" => Ok(JobType::Thumbnail),
            other => Err(Error::InvalidMetadata(format!(
                "unknown job type '{}'",
                other
            ))),
        }
    }

    /// Queue name for this job type.
    pub fn queue_name(&self) -> &'static str {
        match self {
            JobType::HlsTranscode => "transcode",
            JobType::Thumbnail => "thumbnail",
        }
    }
}

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Retrying => "RETRYING",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "QUEUED" => Ok(JobStatus::Queued),
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "RETRYING" => Ok(JobStatus::Retrying),
            other => Err(Error::InvalidMetadata(format!(
                "unknown job status '{}'",
                other
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Queue priority. Lower number dispatches first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobPriority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
}

impl JobPriority {
    pub const ALL: [JobPriority; 4] = [
        JobPriority::Critical,
        JobPriority::High,
        JobPriority::Normal,
        JobPriority::Low,
    ];

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => JobPriority::Critical,
            1 => JobPriority::High,
            3 => JobPriority::Low,
            _ => JobPriority::Normal,
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

/// Deterministic queue key for a video's transcode job.
///
/// At most one un-terminal job per video can exist under this key, which is
/// what prevents double-scheduling.
pub fn transcode_job_key(video_id: Uuid) -> String {
    format!("transcode-{}", video_id)
}

/// Payload carried through the queue for one transcode job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodePayload {
    pub video_id: Uuid,
    /// Storage path of the raw upload
    pub input_path: String,
    pub resolutions: Vec<String>,
}

/// Progress snapshot persisted alongside the job row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDetail {
    pub percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_resolution: Option<String>,
    pub completed_resolutions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    /// Advisory only; derived from remaining percent at a fixed rate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining_secs: Option<u64>,
}

impl ProgressDetail {
    /// Seconds-per-percent used for the advisory ETA.
    const ETA_SECS_PER_PERCENT: f64 = 5.0;

    pub fn new(percent: f64, task: &str) -> Self {
        let clamped = percent.clamp(0.0, 100.0);
        Self {
            percent: clamped,
            current_resolution: None,
            completed_resolutions: Vec::new(),
            current_task: Some(task.to_string()),
            estimated_time_remaining_secs: Some(
                ((100.0 - clamped) * Self::ETA_SECS_PER_PERCENT) as u64,
            ),
        }
    }

    pub fn with_resolution(mut self, resolution: &str) -> Self {
        self.current_resolution = Some(resolution.to_string());
        self
    }

    pub fn with_completed(mut self, completed: Vec<String>) -> Self {
        self.completed_resolutions = completed;
        self
    }
}

/// Result snapshot persisted on job completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub completed_resolutions: Vec<String>,
    pub failed_resolutions: Vec<String>,
    pub skipped_resolutions: Vec<String>,
    pub total_output_bytes: i64,
}

/// The durable job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodingJob {
    pub id: Uuid,
    pub video_id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    /// 0-100, monotonic non-decreasing within one attempt
    pub progress_percentage: i16,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub job_data: TranscodePayload,
    pub result_data: Option<JobResult>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
}

impl TranscodingJob {
    /// A fresh QUEUED job for a video.
    pub fn new(video_id: Uuid, input_path: String, resolutions: Vec<String>, max_attempts: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            video_id,
            job_type: JobType::HlsTranscode,
            status: JobStatus::Queued,
            progress_percentage: 0,
            attempt_count: 0,
            max_attempts,
            job_data: TranscodePayload {
                video_id,
                input_path,
                resolutions,
            },
            result_data: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            next_retry_at: None,
            worker_id: None,
        }
    }
}
