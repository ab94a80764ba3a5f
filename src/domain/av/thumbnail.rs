//! Thumbnail extraction.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::paths;
use crate::error::{Error, Result};

use super::transcoder::HlsTranscoder;

/// Thumbnail bounding box; letterboxed to exactly this size.
const THUMB_WIDTH: u32 = 320;
const THUMB_HEIGHT: u32 = 240;

/// Seek point: ten seconds in, or the middle of shorter sources.
pub(crate) fn thumbnail_timestamp(duration_sec: f64) -> f64 {
    f64::min(10.0, duration_sec / 2.0).max(0.0)
}

/// FFmpeg arguments to extract one letterboxed JPEG frame.
pub(crate) fn build_thumbnail_args(source: &Path, out: &Path, at_sec: f64) -> Vec<String> {
    vec![
        "-y".into(),
        "-ss".into(),
        format!("{:.3}", at_sec),
        "-i".into(),
        source.to_string_lossy().into_owned(),
        "-vframes".into(),
        "1".into(),
        "-vf".into(),
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
            w = THUMB_WIDTH,
            h = THUMB_HEIGHT
        ),
        "-q:v".into(),
        "2".into(),
        out.to_string_lossy().into_owned(),
    ]
}

impl HlsTranscoder {
    /// Extract a thumbnail frame from the source and persist it at the
    /// canonical thumbnail path. Returns the storage path.
    pub async fn thumbnail(
        &self,
        input_path: &str,
        video_id: Uuid,
        duration_sec: f64,
        cancel: CancellationToken,
    ) -> Result<String> {
        let workspace = tempfile::tempdir()?;
        let source = self.localize_source(input_path, workspace.path()).await?;
        let out = workspace.path().join("thumbnail.jpg");

        let args = build_thumbnail_args(&source, &out, thumbnail_timestamp(duration_sec));
        let outcome = self.runner.run_encode(&args, 0.0, None, cancel).await?;
        if !outcome.success {
            return Err(Error::Transcoding(format!(
                "thumbnail extraction failed: {}",
                outcome.stderr_tail
            )));
        }

        let bytes = tokio::fs::read(&out).await?;
        let path = paths::thumbnail_path(video_id);
        self.storage.save(&bytes, &path).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::fs::LocalStorage;
    use crate::domain::av::cmd::{EncodeOutcome, MockEncodeRunner};
    use crate::ports::storage::Storage;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[test]
    fn seek_point_is_ten_seconds_or_midpoint() {
        assert_eq!(thumbnail_timestamp(60.0), 10.0);
        assert_eq!(thumbnail_timestamp(12.0), 6.0);
        assert_eq!(thumbnail_timestamp(0.0), 0.0);
    }

    #[test]
    fn thumbnail_args_letterbox_to_320x240() {
        let args = build_thumbnail_args(Path::new("in.mp4"), Path::new("out.jpg"), 10.0);
        let joined = args.join(" ");
        assert!(joined.contains("-ss 10.000"));
        assert!(joined.contains("-vframes 1"));
        assert!(joined.contains(
            "scale=320:240:force_original_aspect_ratio=decrease,pad=320:240:(ow-iw)/2:(oh-ih)/2"
        ));
        assert!(joined.contains("-q:v 2"));
    }

    #[tokio::test]
    async fn thumbnail_is_persisted_at_the_canonical_path() {
        let video_id = Uuid::new_v4();
        let base = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(base.path()));
        let input = crate::domain::paths::upload_path(video_id, ".mp4");
        storage.save(b"source", &input).await.unwrap();

        let mut runner = MockEncodeRunner::new();
        runner
            .expect_run_encode()
            .times(1)
            .returning(|args, _duration, _sink, _cancel| {
                let out = PathBuf::from(args.last().unwrap());
                std::fs::write(&out, b"\xff\xd8jpeg bytes").unwrap();
                Ok(EncodeOutcome {
                    success: true,
                    stderr_tail: String::new(),
                })
            });

        let transcoder = HlsTranscoder::new(storage.clone(), Arc::new(runner));
        let path = transcoder
            .thumbnail(&input, video_id, 60.0, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(path, format!("thumbnails/{}/thumbnail.jpg", video_id));
        assert!(storage.exists(&path).await.unwrap());
    }
}
