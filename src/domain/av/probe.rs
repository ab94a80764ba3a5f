//! Source media probing.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::ports::storage::Storage;

use super::cmd::ProbeRunner;

/// Metadata extracted from a source blob.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MediaMetadata {
    pub duration_sec: f64,
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
    pub fps: f64,
    pub codec: String,
    pub aspect_ratio: String,
}

/// Probes sources through `Storage`, fetching remote blobs into a local
/// handle first.
pub struct MediaProber {
    storage: Arc<dyn Storage>,
    runner: Arc<dyn ProbeRunner>,
}

impl MediaProber {
    pub fn new(storage: Arc<dyn Storage>, runner: Arc<dyn ProbeRunner>) -> Self {
        Self { storage, runner }
    }

    /// Probe the blob at a storage path.
    pub async fn probe(&self, path: &str) -> Result<MediaMetadata> {
        let stdout = match self.storage.local_path(path) {
            Some(local) => {
                if !local.exists() {
                    return Err(Error::SourceUnreadable(format!(
                        "source missing at {}",
                        path
                    )));
                }
                self.runner.run_probe(&local).await?
            }
            None => {
                // Remote backend: pull the blob down next to us first.
                let bytes = self.storage.get(path).await?;
                let file = tempfile::NamedTempFile::new()?;
                tokio::fs::write(file.path(), &bytes).await?;
                self.runner.run_probe(file.path()).await?
            }
        };

        let json: Value = serde_json::from_slice(&stdout)
            .map_err(|e| Error::InvalidMetadata(format!("ffprobe output: {}", e)))?;
        parse_metadata(&json)
    }
}

/// Parse ffprobe `-show_format -show_streams` JSON into metadata.
pub fn parse_metadata(json: &Value) -> Result<MediaMetadata> {
    let streams = json
        .get("streams")
        .and_then(|v| v.as_array())
        .map(|arr| arr.as_slice())
        .unwrap_or(&[]);

    let video = streams
        .iter()
        .find(|s| s.get("codec_type").and_then(|v| v.as_str()) == Some("video"))
        .ok_or(Error::NoVideoStream)?;

    let width = video.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let height = video.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    let codec = video
        .get("codec_name")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let duration_sec = json
        .get("format")
        .and_then(|f| f.get("duration"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    // Prefer the stream bitrate, fall back to the container's.
    let bitrate_kbps = video
        .get("bit_rate")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<u64>().ok())
        .or_else(|| {
            json.get("format")
                .and_then(|f| f.get("bit_rate"))
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<u64>().ok())
        })
        .map(|b| (b / 1000) as u32)
        .unwrap_or(0);

    let fps = video
        .get("r_frame_rate")
        .and_then(|v| v.as_str())
        .map(parse_frame_rate)
        .unwrap_or(0.0);

    let aspect_ratio = video
        .get("display_aspect_ratio")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}:{}", width, height));

    Ok(MediaMetadata {
        duration_sec,
        width,
        height,
        bitrate_kbps,
        fps,
        codec,
        aspect_ratio,
    })
}

/// Parse "num/den" frame rates; a zero denominator yields 0.
fn parse_frame_rate(raw: &str) -> f64 {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().unwrap_or(0.0);
            let den: f64 = den.parse().unwrap_or(0.0);
            if den == 0.0 {
                0.0
            } else {
                num / den
            }
        }
        None => raw.parse().unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn probe_json() -> Value {
        json!({
            "format": { "duration": "60.500000", "bit_rate": "6000000" },
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "h264",
                    "width": 1920,
                    "height": 1080,
                    "bit_rate": "5000000",
                    "r_frame_rate": "30000/1001",
                    "display_aspect_ratio": "16:9"
                },
                {
                    "codec_type": "audio",
                    "codec_name": "aac",
                    "channels": 2
                }
            ]
        })
    }

    #[test]
    fn parses_a_full_probe() {
        let meta = parse_metadata(&probe_json()).unwrap();
        assert_eq!(meta.width, 1920);
        assert_eq!(meta.height, 1080);
        assert_eq!(meta.duration_sec, 60.5);
        assert_eq!(meta.bitrate_kbps, 5000);
        assert_eq!(meta.codec, "h264");
        assert_eq!(meta.aspect_ratio, "16:9");
        assert!((meta.fps - 29.97).abs() < 0.01);
    }

    #[test]
    fn missing_video_stream_is_an_error() {
        let json = json!({
            "format": { "duration": "10.0" },
            "streams": [ { "codec_type": "audio", "codec_name": "aac" } ]
        });
        assert!(matches!(
            parse_metadata(&json),
            Err(Error::NoVideoStream)
        ));
    }

    #[test]
    fn falls_back_to_container_bitrate() {
        let mut json = probe_json();
        json["streams"][0]
            .as_object_mut()
            .unwrap()
            .remove("bit_rate");
        let meta = parse_metadata(&json).unwrap();
        assert_eq!(meta.bitrate_kbps, 6000);
    }

    #[test]
    fn aspect_ratio_falls_back_to_dimensions() {
        let mut json = probe_json();
        json["streams"][0]
            .as_object_mut()
            .unwrap()
            .remove("display_aspect_ratio");
        let meta = parse_metadata(&json).unwrap();
        assert_eq!(meta.aspect_ratio, "1920:1080");
    }

    #[test]
    fn zero_denominator_fps_is_zero() {
        assert_eq!(parse_frame_rate("30/0"), 0.0);
        assert_eq!(parse_frame_rate("30000/1001").round(), 30.0);
        assert_eq!(parse_frame_rate("25"), 25.0);
        assert_eq!(parse_frame_rate("garbage"), 0.0);
    }

    #[test]
    fn tolerates_absent_duration() {
        let json = json!({
            "streams": [ { "codec_type": "video", "codec_name": "vp9", "width": 640, "height": 360 } ]
        });
        let meta = parse_metadata(&json).unwrap();
        assert_eq!(meta.duration_sec, 0.0);
        assert_eq!(meta.height, 360);
    }
}
