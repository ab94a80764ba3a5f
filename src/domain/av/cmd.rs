//! Subprocess runners for ffmpeg/ffprobe.

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use tokio::io::AsyncBufReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Callback receiving encode progress as a percentage of the source duration.
pub type ProgressSink = Arc<dyn Fn(f64) + Send + Sync>;

/// Result of one encode invocation.
#[derive(Debug, Clone)]
pub struct EncodeOutcome {
    pub success: bool,
    /// Last stderr lines, kept for error records
    pub stderr_tail: String,
}

/// Runs ffmpeg encodes, reporting progress parsed from stderr.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EncodeRunner: Send + Sync {
    /// Run ffmpeg with `args`. `duration_sec` scales stderr `time=` stamps
    /// into percentages for `on_progress` and bounds the wall clock at 30x
    /// the source duration. Cancellation kills the child process.
    async fn run_encode(
        &self,
        args: &[String],
        duration_sec: f64,
        on_progress: Option<ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<EncodeOutcome>;
}

/// Runs ffprobe and returns its stdout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProbeRunner: Send + Sync {
    async fn run_probe(&self, path: &Path) -> Result<Vec<u8>>;
}

/// Number of trailing stderr lines kept for diagnostics.
const STDERR_TAIL_LINES: usize = 12;

/// Wall-clock multiplier over source duration for encode timeouts.
const ENCODE_TIMEOUT_MULTIPLIER: f64 = 30.0;

/// Floor for the encode timeout, covering very short sources and thumbnails.
const ENCODE_TIMEOUT_FLOOR: Duration = Duration::from_secs(60);

fn time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"time=(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").expect("time regex"))
}

/// Parse an ffmpeg stderr chunk for the most recent `time=` stamp, in seconds.
pub fn parse_progress_seconds(line: &str) -> Option<f64> {
    let caps = time_re().captures(line)?;
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Real runner shelling out to the ffmpeg/ffprobe binaries.
#[derive(Clone, Copy, Default)]
pub struct FfmpegCli;

impl FfmpegCli {
    pub fn new() -> Self {
        Self
    }

    fn encode_timeout(duration_sec: f64) -> Duration {
        let budget = Duration::from_secs_f64((duration_sec * ENCODE_TIMEOUT_MULTIPLIER).max(0.0));
        budget.max(ENCODE_TIMEOUT_FLOOR)
    }
}

#[async_trait]
impl EncodeRunner for FfmpegCli {
    async fn run_encode(
        &self,
        args: &[String],
        duration_sec: f64,
        on_progress: Option<ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<EncodeOutcome> {
        let mut child = Command::new("ffmpeg")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Transcoding("ffmpeg stderr not captured".into()))?;

        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        // ffmpeg terminates its stats lines with \r, everything else with \n
        let mut chunks = tokio::io::BufReader::new(stderr).split(b'\r');
        let deadline = tokio::time::sleep(Self::encode_timeout(duration_sec));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(Error::Cancelled);
                }
                _ = &mut deadline => {
                    let _ = child.kill().await;
                    return Err(Error::Transcoding(format!(
                        "ffmpeg exceeded the {}x-duration wall clock",
                        ENCODE_TIMEOUT_MULTIPLIER
                    )));
                }
                chunk = chunks.next_segment() => {
                    match chunk? {
                        Some(bytes) => {
                            let text = String::from_utf8_lossy(&bytes);
                            for line in text.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
                                if tail.len() == STDERR_TAIL_LINES {
                                    tail.pop_front();
                                }
                                tail.push_back(line.to_string());
                                if let (Some(sink), Some(at)) =
                                    (&on_progress, parse_progress_seconds(line))
                                {
                                    if duration_sec > 0.0 {
                                        sink((at / duration_sec * 100.0).clamp(0.0, 100.0));
                                    }
                                }
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(Error::Cancelled);
            }
            status = child.wait() => status?,
        };

        Ok(EncodeOutcome {
            success: status.success(),
            stderr_tail: tail.into_iter().collect::<Vec<_>>().join("\n"),
        })
    }
}

#[async_trait]
impl ProbeRunner for FfmpegCli {
    async fn run_probe(&self, path: &Path) -> Result<Vec<u8>> {
        let output = Command::new("ffprobe")
            .arg("-v")
            .arg("error")
            .arg("-show_format")
            .arg("-show_streams")
            .arg("-print_format")
            .arg("json")
            .arg(path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::SourceUnreadable(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_time_stamps_from_stats_lines() {
        let line = "frame= 1234 fps= 45 q=28.0 size=    5120kB time=00:01:30.52 bitrate= 463.2kbits/s speed=1.5x";
        let secs = parse_progress_seconds(line).unwrap();
        assert!((secs - 90.52).abs() < 1e-9);
    }

    #[test]
    fn parses_hour_long_stamps() {
        let secs = parse_progress_seconds("time=01:02:03.00").unwrap();
        assert_eq!(secs, 3723.0);
    }

    #[test]
    fn ignores_lines_without_time() {
        assert!(parse_progress_seconds("Press [q] to stop, [?] for help").is_none());
        assert!(parse_progress_seconds("time=N/A").is_none());
    }

    #[test]
    fn encode_timeout_scales_with_duration_and_has_a_floor() {
        assert_eq!(FfmpegCli::encode_timeout(0.5), Duration::from_secs(60));
        assert_eq!(FfmpegCli::encode_timeout(60.0), Duration::from_secs(1800));
    }
}
