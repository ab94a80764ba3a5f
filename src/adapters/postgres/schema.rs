//! Schema bootstrap.

use sqlx::PgPool;

use crate::error::Result;

/// Idempotent DDL executed at startup.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS videos (
        id UUID PRIMARY KEY,
        title VARCHAR(255) NOT NULL,
        description VARCHAR(2000),
        tags TEXT[] NOT NULL DEFAULT '{}',
        original_filename TEXT NOT NULL,
        file_extension TEXT NOT NULL,
        file_size BIGINT NOT NULL,
        mime_type TEXT NOT NULL,
        upload_path TEXT NOT NULL,
        duration_seconds INTEGER,
        thumbnail_path TEXT,
        status TEXT NOT NULL DEFAULT 'PENDING'
            CHECK (status IN ('PENDING', 'PROCESSING', 'READY', 'FAILED')),
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        processed_at TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_videos_status ON videos (status)",
    "CREATE INDEX IF NOT EXISTS idx_videos_created_at ON videos (created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_videos_tags ON videos USING GIN (tags)",
    r#"
    CREATE TABLE IF NOT EXISTS video_outputs (
        id UUID PRIMARY KEY,
        video_id UUID NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
        resolution TEXT NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        bitrate_kbps INTEGER NOT NULL,
        playlist_path TEXT NOT NULL,
        segment_dir TEXT NOT NULL,
        file_size BIGINT NOT NULL,
        segment_count INTEGER NOT NULL,
        segment_duration DOUBLE PRECISION NOT NULL DEFAULT 10.0,
        status TEXT NOT NULL DEFAULT 'PENDING'
            CHECK (status IN ('PENDING', 'PROCESSING', 'READY', 'FAILED')),
        completed_at TIMESTAMPTZ,
        UNIQUE (video_id, resolution)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transcoding_jobs (
        id UUID PRIMARY KEY,
        video_id UUID NOT NULL REFERENCES videos(id) ON DELETE CASCADE,
        job_type TEXT NOT NULL
            CHECK (job_type IN ('HLS_TRANSCODE', 'THUMBNAIL')),
        status TEXT NOT NULL DEFAULT 'QUEUED'
            CHECK (status IN ('QUEUED', 'PROCESSING', 'COMPLETED', 'FAILED', 'RETRYING')),
        progress_percentage SMALLINT NOT NULL DEFAULT 0
            CHECK (progress_percentage BETWEEN 0 AND 100),
        attempt_count INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL DEFAULT 3,
        job_data JSONB NOT NULL,
        result_data JSONB,
        error_message TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        next_retry_at TIMESTAMPTZ,
        worker_id TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transcoding_jobs_video_id ON transcoding_jobs (video_id)",
    "CREATE INDEX IF NOT EXISTS idx_transcoding_jobs_next_retry_at ON transcoding_jobs (next_retry_at)",
];

/// Create tables and indexes if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
