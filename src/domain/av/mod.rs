//! FFmpeg integration: probing, HLS transcoding, thumbnails.
//!
//! All subprocess work goes through the runner traits in `cmd`, which keeps
//! the one dirty integration point mockable and the rest of the domain pure.

pub mod cmd;
pub mod probe;
pub mod thumbnail;
pub mod transcoder;

pub use cmd::{EncodeOutcome, EncodeRunner, FfmpegCli, ProbeRunner};
pub use probe::{MediaMetadata, MediaProber};
pub use transcoder::{
    HlsTranscoder, ProgressCallback, RenditionOutput, TranscodeOutcome, TranscodeProgress,
    TranscodeRequest,
};
