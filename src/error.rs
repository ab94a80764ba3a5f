//! Application-wide error types.
//!
//! Every error that can cross a component boundary carries a stable string
//! code (`ErrorCode`) so the HTTP edge and job records stay consistent.

use thiserror::Error;
use uuid::Uuid;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error codes surfaced in API responses and job records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Input
    FileRequired,
    InvalidFileFormat,
    FileTooLarge,
    TitleRequired,
    TitleTooLong,
    InvalidTagsFormat,
    TooManyTags,
    InvalidTag,
    InvalidSegmentName,
    // Not found
    VideoNotFound,
    PlaylistNotFound,
    MasterPlaylistNotFound,
    SegmentNotFound,
    ThumbnailNotFound,
    // Processing
    VideoProcessingError,
    TranscodingFailed,
    AllRenditionsFailed,
    // Infrastructure
    QueueUnavailable,
    StorageUnavailable,
    DbUnavailable,
    InternalServerError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FileRequired => "FILE_REQUIRED",
            ErrorCode::InvalidFileFormat => "INVALID_FILE_FORMAT",
            ErrorCode::FileTooLarge => "FILE_TOO_LARGE",
            ErrorCode::TitleRequired => "TITLE_REQUIRED",
            ErrorCode::TitleTooLong => "TITLE_TOO_LONG",
            ErrorCode::InvalidTagsFormat => "INVALID_TAGS_FORMAT",
            ErrorCode::TooManyTags => "TOO_MANY_TAGS",
            ErrorCode::InvalidTag => "INVALID_TAG",
            ErrorCode::InvalidSegmentName => "INVALID_SEGMENT_NAME",
            ErrorCode::VideoNotFound => "VIDEO_NOT_FOUND",
            ErrorCode::PlaylistNotFound => "PLAYLIST_NOT_FOUND",
            ErrorCode::MasterPlaylistNotFound => "MASTER_PLAYLIST_NOT_FOUND",
            ErrorCode::SegmentNotFound => "SEGMENT_NOT_FOUND",
            ErrorCode::ThumbnailNotFound => "THUMBNAIL_NOT_FOUND",
            ErrorCode::VideoProcessingError => "VIDEO_PROCESSING_ERROR",
            ErrorCode::TranscodingFailed => "TRANSCODING_FAILED",
            ErrorCode::AllRenditionsFailed => "ALL_RENDITIONS_FAILED",
            ErrorCode::QueueUnavailable => "QUEUE_UNAVAILABLE",
            ErrorCode::StorageUnavailable => "STORAGE_UNAVAILABLE",
            ErrorCode::DbUnavailable => "DB_UNAVAILABLE",
            ErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Rejected input (400-class). Carries its own code so the edge can
    /// distinguish 400/413/415 without re-inspecting the message.
    #[error("{message}")]
    Invalid { code: ErrorCode, message: String },

    /// Missing entity or artifact (404-class).
    #[error("{message}")]
    NotFound { code: ErrorCode, message: String },

    #[error("source media is unreadable: {0}")]
    SourceUnreadable(String),

    #[error("no video stream in source")]
    NoVideoStream,

    #[error("invalid media metadata: {0}")]
    InvalidMetadata(String),

    #[error("all renditions failed for video {0}")]
    AllRenditionsFailed(Uuid),

    #[error("transcoding failed: {0}")]
    Transcoding(String),

    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("storage object not found: {0}")]
    BlobMissing(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Invalid {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn video_not_found(id: Uuid) -> Self {
        Self::not_found(ErrorCode::VideoNotFound, format!("video {} not found", id))
    }

    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// The stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Invalid { code, .. } | Error::NotFound { code, .. } => *code,
            Error::SourceUnreadable(_) | Error::NoVideoStream | Error::InvalidMetadata(_) => {
                ErrorCode::VideoProcessingError
            }
            Error::AllRenditionsFailed(_) => ErrorCode::AllRenditionsFailed,
            Error::Transcoding(_) | Error::Cancelled => ErrorCode::TranscodingFailed,
            Error::IllegalTransition { .. } => ErrorCode::VideoProcessingError,
            Error::Database(_) => ErrorCode::DbUnavailable,
            Error::Queue(_) => ErrorCode::QueueUnavailable,
            Error::Storage(_) => ErrorCode::StorageUnavailable,
            Error::BlobMissing(_) => ErrorCode::SegmentNotFound,
            Error::Configuration(_) | Error::Io(_) | Error::Serialization(_) => {
                ErrorCode::InternalServerError
            }
        }
    }
}

impl From<deadpool_redis::redis::RedisError> for Error {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        Error::Queue(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for Error {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Error::Queue(err.to_string())
    }
}

impl From<deadpool_redis::CreatePoolError> for Error {
    fn from(err: deadpool_redis::CreatePoolError) -> Self {
        Error::Queue(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_keep_their_own_code() {
        let err = Error::invalid(ErrorCode::FileTooLarge, "file exceeds 2GB");
        assert_eq!(err.code(), ErrorCode::FileTooLarge);
        assert_eq!(err.code().as_str(), "FILE_TOO_LARGE");
    }

    #[test]
    fn infra_errors_map_to_unavailable_codes() {
        assert_eq!(
            Error::queue("redis down").code().as_str(),
            "QUEUE_UNAVAILABLE"
        );
        assert_eq!(
            Error::storage("s3 timeout").code().as_str(),
            "STORAGE_UNAVAILABLE"
        );
    }

    #[test]
    fn all_renditions_failed_has_stable_code() {
        let id = Uuid::new_v4();
        let err = Error::AllRenditionsFailed(id);
        assert_eq!(err.code().as_str(), "ALL_RENDITIONS_FAILED");
        assert!(err.to_string().contains(&id.to_string()));
    }
}
