//! HLS ladder transcoding.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::hls::{media_playlist_segments, MasterPlaylist, MasterVariant};
use crate::domain::paths;
use crate::domain::resolution::{self, RenditionSpec};
use crate::error::{Error, Result};
use crate::ports::storage::Storage;

use super::cmd::{EncodeRunner, ProgressSink};
use super::probe::MediaMetadata;

/// Segment length handed to the HLS muxer.
pub const SEGMENT_DURATION_SECS: f64 = 10.0;

/// A transcode request for one video.
#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub video_id: Uuid,
    /// Storage path of the source blob
    pub input_path: String,
    pub requested_resolutions: Vec<String>,
    pub metadata: MediaMetadata,
}

/// Overall progress, combined across renditions.
#[derive(Debug, Clone)]
pub struct TranscodeProgress {
    pub percent: f64,
    pub current_resolution: String,
}

pub type ProgressCallback = Arc<dyn Fn(TranscodeProgress) + Send + Sync>;

/// One finalized rendition.
#[derive(Debug, Clone)]
pub struct RenditionOutput {
    pub resolution: String,
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
    pub playlist_path: String,
    /// Storage paths of the segments, sorted lexicographically
    pub segment_paths: Vec<String>,
    /// Segments plus playlist, in bytes
    pub file_size: u64,
    pub duration: f64,
}

/// Everything a transcode run produced.
#[derive(Debug, Clone)]
pub struct TranscodeOutcome {
    pub outputs: Vec<RenditionOutput>,
    /// Renditions attempted but not finalized
    pub failed_resolutions: Vec<String>,
    /// Renditions dropped before encoding (unknown label or taller than source)
    pub skipped_resolutions: Vec<String>,
    pub master_playlist_path: String,
}

/// Drives FFmpeg to produce per-resolution HLS renditions, the master
/// playlist, and thumbnails.
pub struct HlsTranscoder {
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) runner: Arc<dyn EncodeRunner>,
}

impl HlsTranscoder {
    pub fn new(storage: Arc<dyn Storage>, runner: Arc<dyn EncodeRunner>) -> Self {
        Self { storage, runner }
    }

    /// Transcode a source into its HLS ladder.
    ///
    /// A single failing rendition is logged and skipped; the call only fails
    /// when nothing survives. The temp workspace is removed on every exit
    /// path, including cancellation.
    pub async fn transcode_to_hls(
        &self,
        req: &TranscodeRequest,
        on_progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> Result<TranscodeOutcome> {
        let workspace = tempfile::tempdir()?;

        let specs =
            resolution::filter_requested(&req.requested_resolutions, req.metadata.height);
        if specs.is_empty() {
            return Err(Error::AllRenditionsFailed(req.video_id));
        }
        let active: HashSet<&str> = specs.iter().map(|s| s.label).collect();
        let skipped_resolutions: Vec<String> = req
            .requested_resolutions
            .iter()
            .filter(|label| !active.contains(label.as_str()))
            .cloned()
            .collect();

        let source = self.localize_source(&req.input_path, workspace.path()).await?;

        let total = specs.len();
        // One whole-percent gate shared by all renditions: at most one
        // callback per 1% change, monotonic across the run.
        let emitted = Arc::new(AtomicU32::new(0));

        let mut outputs = Vec::new();
        let mut failed_resolutions = Vec::new();

        for (index, spec) in specs.iter().enumerate() {
            let sink = on_progress.as_ref().map(|cb| {
                rendition_progress_sink(cb.clone(), emitted.clone(), spec.label, index, total)
            });

            match self
                .encode_rendition(&source, workspace.path(), *spec, req, sink, cancel.clone())
                .await
            {
                Ok(output) => outputs.push(output),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    tracing::warn!(
                        video_id = %req.video_id,
                        resolution = spec.label,
                        error = %err,
                        "rendition failed, continuing with the rest"
                    );
                    failed_resolutions.push(spec.label.to_string());
                }
            }
        }

        if outputs.is_empty() {
            return Err(Error::AllRenditionsFailed(req.video_id));
        }

        let master_playlist_path = self.write_master_playlist(req.video_id, &outputs).await?;

        Ok(TranscodeOutcome {
            outputs,
            failed_resolutions,
            skipped_resolutions,
            master_playlist_path,
        })
    }

    /// Compose and persist the master playlist, descending by height.
    async fn write_master_playlist(
        &self,
        video_id: Uuid,
        outputs: &[RenditionOutput],
    ) -> Result<String> {
        let variants = outputs
            .iter()
            .map(|o| MasterVariant {
                resolution: o.resolution.clone(),
                width: o.width,
                height: o.height,
                bitrate_kbps: o.bitrate_kbps,
            })
            .collect();
        let master = MasterPlaylist::descending(variants);
        let path = paths::master_playlist_path(video_id);
        self.storage.save(master.render().as_bytes(), &path).await?;
        Ok(path)
    }

    /// Ensure the source exists as a local file inside the workspace.
    pub(crate) async fn localize_source(
        &self,
        input_path: &str,
        workspace: &Path,
    ) -> Result<PathBuf> {
        if let Some(local) = self.storage.local_path(input_path) {
            if !local.exists() {
                return Err(Error::BlobMissing(input_path.to_string()));
            }
            return Ok(local);
        }
        let bytes = self.storage.get(input_path).await?;
        let dest = workspace.join("source");
        tokio::fs::write(&dest, &bytes).await?;
        Ok(dest)
    }

    /// Encode one rendition into the workspace, then upload its playlist and
    /// segments.
    async fn encode_rendition(
        &self,
        source: &Path,
        workspace: &Path,
        spec: RenditionSpec,
        req: &TranscodeRequest,
        sink: Option<ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<RenditionOutput> {
        let out_dir = workspace.join(spec.label);
        tokio::fs::create_dir_all(&out_dir).await?;

        let args = build_encode_args(source, &out_dir, spec);
        let outcome = self
            .runner
            .run_encode(&args, req.metadata.duration_sec, sink, cancel)
            .await?;
        if !outcome.success {
            return Err(Error::Transcoding(outcome.stderr_tail));
        }

        self.upload_rendition(req.video_id, spec, &out_dir, req.metadata.duration_sec)
            .await
    }

    async fn upload_rendition(
        &self,
        video_id: Uuid,
        spec: RenditionSpec,
        out_dir: &Path,
        duration: f64,
    ) -> Result<RenditionOutput> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(out_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if paths::is_valid_segment_name(&name) {
                names.push(name);
            }
        }
        names.sort();

        let playlist_bytes = tokio::fs::read(out_dir.join("playlist.m3u8")).await?;

        // The playlist must only reference segments we actually have.
        let listed = media_playlist_segments(&String::from_utf8_lossy(&playlist_bytes));
        let have: HashSet<&str> = names.iter().map(String::as_str).collect();
        if let Some(missing) = listed.iter().find(|uri| !have.contains(uri.as_str())) {
            return Err(Error::Transcoding(format!(
                "playlist references missing segment {}",
                missing
            )));
        }

        let mut file_size = 0u64;
        let mut segment_paths = Vec::with_capacity(names.len());
        for name in &names {
            let bytes = tokio::fs::read(out_dir.join(name)).await?;
            file_size += bytes.len() as u64;
            let path = paths::segment_path(video_id, spec.label, name);
            self.storage.save(&bytes, &path).await?;
            segment_paths.push(path);
        }

        file_size += playlist_bytes.len() as u64;
        let playlist_path = paths::playlist_path(video_id, spec.label);
        self.storage.save(&playlist_bytes, &playlist_path).await?;

        Ok(RenditionOutput {
            resolution: spec.label.to_string(),
            width: spec.width,
            height: spec.height,
            bitrate_kbps: spec.bitrate_kbps,
            playlist_path,
            segment_paths,
            file_size,
            duration,
        })
    }
}

/// Overall percent for rendition `index` of `total` at `inner` percent.
pub(crate) fn combined_percent(index: usize, total: usize, inner: f64) -> f64 {
    ((index as f64 + inner.clamp(0.0, 100.0) / 100.0) / total as f64) * 100.0
}

/// Per-rendition sink translating inner percentages into debounced overall
/// progress callbacks.
fn rendition_progress_sink(
    cb: ProgressCallback,
    emitted: Arc<AtomicU32>,
    label: &'static str,
    index: usize,
    total: usize,
) -> ProgressSink {
    Arc::new(move |inner: f64| {
        let overall = combined_percent(index, total, inner);
        let whole = overall.floor() as u32;
        // fetch_max doubles as the 1% debounce and the monotonicity guard
        let previous = emitted.fetch_max(whole, Ordering::SeqCst);
        if whole > previous {
            cb(TranscodeProgress {
                percent: overall,
                current_resolution: label.to_string(),
            });
        }
    })
}

/// FFmpeg arguments for one rendition.
pub(crate) fn build_encode_args(source: &Path, out_dir: &Path, spec: RenditionSpec) -> Vec<String> {
    let segment_template = out_dir.join("segment_%03d.ts");
    let playlist = out_dir.join("playlist.m3u8");
    vec![
        "-y".into(),
        "-i".into(),
        source.to_string_lossy().into_owned(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "fast".into(),
        "-profile:v".into(),
        "main".into(),
        "-level".into(),
        "3.1".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-vf".into(),
        format!(
            "scale=-2:{}:force_original_aspect_ratio=decrease",
            spec.height
        ),
        "-b:v".into(),
        format!("{}k", spec.bitrate_kbps),
        "-maxrate".into(),
        format!("{}k", spec.bitrate_kbps * 12 / 10),
        "-bufsize".into(),
        format!("{}k", spec.bitrate_kbps * 2),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "128k".into(),
        "-ac".into(),
        "2".into(),
        "-ar".into(),
        "44100".into(),
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        format!("{}", SEGMENT_DURATION_SECS as u32),
        "-hls_list_size".into(),
        "0".into(),
        "-hls_playlist_type".into(),
        "vod".into(),
        "-hls_segment_filename".into(),
        segment_template.to_string_lossy().into_owned(),
        playlist.to_string_lossy().into_owned(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::fs::LocalStorage;
    use crate::domain::av::cmd::{EncodeOutcome, MockEncodeRunner};
    use std::sync::Mutex;

    fn metadata(height: u32, duration: f64) -> MediaMetadata {
        MediaMetadata {
            duration_sec: duration,
            width: height * 16 / 9,
            height,
            bitrate_kbps: 6000,
            fps: 30.0,
            codec: "h264".into(),
            aspect_ratio: "16:9".into(),
        }
    }

    fn request(video_id: Uuid, input: &str, height: u32) -> TranscodeRequest {
        TranscodeRequest {
            video_id,
            input_path: input.to_string(),
            requested_resolutions: vec!["480p".into(), "720p".into(), "1080p".into()],
            metadata: metadata(height, 60.0),
        }
    }

    /// Pull the playlist path (last arg) out of an encode invocation and
    /// fabricate a plausible HLS output around it.
    fn fabricate_rendition(args: &[String], segments: usize) {
        let playlist = PathBuf::from(args.last().unwrap());
        let dir = playlist.parent().unwrap();
        let mut content = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-PLAYLIST-TYPE:VOD\n");
        for i in 0..segments {
            let name = paths::segment_name(i as u32);
            std::fs::write(dir.join(&name), vec![0u8; 64]).unwrap();
            content.push_str("#EXTINF:10.000000,\n");
            content.push_str(&name);
            content.push('\n');
        }
        content.push_str("#EXT-X-ENDLIST\n");
        std::fs::write(&playlist, content).unwrap();
    }

    fn scale_height(args: &[String]) -> Option<u32> {
        args.iter()
            .find(|a| a.starts_with("scale=-2:"))
            .and_then(|a| {
                a.trim_start_matches("scale=-2:")
                    .split(':')
                    .next()
                    .and_then(|h| h.parse().ok())
            })
    }

    async fn seeded_storage(video_id: Uuid) -> (tempfile::TempDir, Arc<LocalStorage>, String) {
        let base = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(base.path()));
        let input = paths::upload_path(video_id, ".mp4");
        storage.save(b"not really a video", &input).await.unwrap();
        (base, storage, input)
    }

    #[tokio::test]
    async fn full_ladder_happy_path() {
        let video_id = Uuid::new_v4();
        let (_base, storage, input) = seeded_storage(video_id).await;

        let mut runner = MockEncodeRunner::new();
        runner.expect_run_encode().times(3).returning(
            |args, _duration, sink, _cancel| {
                fabricate_rendition(args, 6);
                if let Some(sink) = sink {
                    sink(50.0);
                    sink(100.0);
                }
                Ok(EncodeOutcome {
                    success: true,
                    stderr_tail: String::new(),
                })
            },
        );

        let transcoder = HlsTranscoder::new(storage.clone(), Arc::new(runner));
        let seen: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let cb: ProgressCallback =
            Arc::new(move |p| seen_cb.lock().unwrap().push(p.percent));

        let outcome = transcoder
            .transcode_to_hls(
                &request(video_id, &input, 1080),
                Some(cb),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.outputs.len(), 3);
        assert!(outcome.failed_resolutions.is_empty());
        assert!(outcome.skipped_resolutions.is_empty());
        for output in &outcome.outputs {
            assert_eq!(output.segment_paths.len(), 6);
            assert!(output.file_size > 0);
            assert!(storage.exists(&output.playlist_path).await.unwrap());
            for segment in &output.segment_paths {
                assert!(storage.exists(segment).await.unwrap());
            }
        }

        // Master playlist exists and is sorted by descending height.
        let master = storage
            .get(&paths::master_playlist_path(video_id))
            .await
            .unwrap();
        let master = String::from_utf8(master).unwrap();
        let p1080 = master.find("1080p/playlist.m3u8").unwrap();
        let p480 = master.find("480p/playlist.m3u8").unwrap();
        assert!(p1080 < p480);

        // Progress is monotonic and was debounced through the whole-percent gate.
        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        assert!((seen.last().unwrap() - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn partial_failure_continues_with_remaining_renditions() {
        let video_id = Uuid::new_v4();
        let (_base, storage, input) = seeded_storage(video_id).await;

        let mut runner = MockEncodeRunner::new();
        runner
            .expect_run_encode()
            .times(3)
            .returning(|args, _duration, _sink, _cancel| {
                if scale_height(args) == Some(720) {
                    return Ok(EncodeOutcome {
                        success: false,
                        stderr_tail: "x264 blew up".into(),
                    });
                }
                fabricate_rendition(args, 4);
                Ok(EncodeOutcome {
                    success: true,
                    stderr_tail: String::new(),
                })
            });

        let transcoder = HlsTranscoder::new(storage.clone(), Arc::new(runner));
        let outcome = transcoder
            .transcode_to_hls(&request(video_id, &input, 1080), None, CancellationToken::new())
            .await
            .unwrap();

        let labels: Vec<&str> = outcome
            .outputs
            .iter()
            .map(|o| o.resolution.as_str())
            .collect();
        assert_eq!(labels, vec!["480p", "1080p"]);
        assert_eq!(outcome.failed_resolutions, vec!["720p"]);

        let master = storage
            .get(&paths::master_playlist_path(video_id))
            .await
            .unwrap();
        let master = String::from_utf8(master).unwrap();
        assert!(master.contains("480p/playlist.m3u8"));
        assert!(master.contains("1080p/playlist.m3u8"));
        assert!(!master.contains("720p/playlist.m3u8"));
    }

    #[tokio::test]
    async fn low_source_filters_everything_out() {
        let video_id = Uuid::new_v4();
        let (_base, storage, input) = seeded_storage(video_id).await;

        // Never invoked: nothing survives the upscale filter.
        let runner = MockEncodeRunner::new();
        let transcoder = HlsTranscoder::new(storage, Arc::new(runner));

        let err = transcoder
            .transcode_to_hls(&request(video_id, &input, 360), None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AllRenditionsFailed(id) if id == video_id));
    }

    #[tokio::test]
    async fn all_encodes_failing_is_an_error() {
        let video_id = Uuid::new_v4();
        let (_base, storage, input) = seeded_storage(video_id).await;

        let mut runner = MockEncodeRunner::new();
        runner
            .expect_run_encode()
            .times(3)
            .returning(|_args, _duration, _sink, _cancel| {
                Ok(EncodeOutcome {
                    success: false,
                    stderr_tail: "boom".into(),
                })
            });

        let transcoder = HlsTranscoder::new(storage, Arc::new(runner));
        let err = transcoder
            .transcode_to_hls(&request(video_id, &input, 1080), None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AllRenditionsFailed(_)));
    }

    #[tokio::test]
    async fn playlist_referencing_missing_segment_fails_that_rendition() {
        let video_id = Uuid::new_v4();
        let (_base, storage, input) = seeded_storage(video_id).await;

        let mut runner = MockEncodeRunner::new();
        runner
            .expect_run_encode()
            .times(1)
            .returning(|args, _duration, _sink, _cancel| {
                let playlist = PathBuf::from(args.last().unwrap());
                // References a segment that was never written.
                std::fs::write(
                    &playlist,
                    "#EXTM3U\n#EXTINF:10.0,\nsegment_000.ts\n#EXT-X-ENDLIST\n",
                )
                .unwrap();
                Ok(EncodeOutcome {
                    success: true,
                    stderr_tail: String::new(),
                })
            });

        let transcoder = HlsTranscoder::new(storage, Arc::new(runner));
        let mut req = request(video_id, &input, 480);
        req.requested_resolutions = vec!["480p".into()];
        let err = transcoder
            .transcode_to_hls(&req, None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AllRenditionsFailed(_)));
    }

    #[test]
    fn combined_percent_spans_renditions_evenly() {
        assert_eq!(combined_percent(0, 3, 0.0), 0.0);
        assert!((combined_percent(0, 3, 100.0) - 33.333).abs() < 0.01);
        assert!((combined_percent(1, 3, 50.0) - 50.0).abs() < f64::EPSILON);
        assert_eq!(combined_percent(2, 3, 100.0), 100.0);
        assert_eq!(combined_percent(0, 1, 42.0), 42.0);
    }

    #[test]
    fn encode_args_carry_the_spec_parameters() {
        let spec = resolution::find("720p").unwrap();
        let args = build_encode_args(
            Path::new("/tmp/in.mp4"),
            Path::new("/tmp/out/720p"),
            spec,
        );
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-preset fast"));
        assert!(joined.contains("-profile:v main"));
        assert!(joined.contains("-level 3.1"));
        assert!(joined.contains("scale=-2:720:force_original_aspect_ratio=decrease"));
        assert!(joined.contains("-b:v 2500k"));
        assert!(joined.contains("-maxrate 3000k"));
        assert!(joined.contains("-bufsize 5000k"));
        assert!(joined.contains("-b:a 128k"));
        assert!(joined.contains("-ar 44100"));
        assert!(joined.contains("-hls_time 10"));
        assert!(joined.contains("-hls_list_size 0"));
        assert!(joined.contains("-hls_playlist_type vod"));
        assert!(joined.contains("segment_%03d.ts"));
        assert!(args.last().unwrap().ends_with("playlist.m3u8"));
    }
}
