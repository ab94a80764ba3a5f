//! Canonical storage paths.
//!
//! Every path is relative, forward-slash, and identical for both storage
//! backends; only the resolution-to-bytes step differs per backend.

use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

/// Raw upload: `uploads/raw/{videoId}{ext}` (ext carries the leading dot).
pub fn upload_path(video_id: Uuid, extension: &str) -> String {
    format!("uploads/raw/{}{}", video_id, extension)
}

/// Variant playlist: `hls/{videoId}/{resolution}/playlist.m3u8`.
pub fn playlist_path(video_id: Uuid, resolution: &str) -> String {
    format!("hls/{}/{}/playlist.m3u8", video_id, resolution)
}

/// Directory holding one rendition's segments: `hls/{videoId}/{resolution}`.
pub fn segment_dir(video_id: Uuid, resolution: &str) -> String {
    format!("hls/{}/{}", video_id, resolution)
}

/// One segment: `hls/{videoId}/{resolution}/{name}`.
pub fn segment_path(video_id: Uuid, resolution: &str, name: &str) -> String {
    format!("hls/{}/{}/{}", video_id, resolution, name)
}

/// Master playlist: `hls/{videoId}/master.m3u8`.
pub fn master_playlist_path(video_id: Uuid) -> String {
    format!("hls/{}/master.m3u8", video_id)
}

/// Root of everything HLS for a video: `hls/{videoId}`.
pub fn hls_dir(video_id: Uuid) -> String {
    format!("hls/{}", video_id)
}

/// Thumbnail: `thumbnails/{videoId}/thumbnail.jpg`.
pub fn thumbnail_path(video_id: Uuid) -> String {
    format!("thumbnails/{}/thumbnail.jpg", video_id)
}

/// Directory holding a video's thumbnail: `thumbnails/{videoId}`.
pub fn thumbnail_dir(video_id: Uuid) -> String {
    format!("thumbnails/{}", video_id)
}

/// Zero-padded segment file name for a sequence index.
pub fn segment_name(index: u32) -> String {
    format!("segment_{:03}.ts", index)
}

fn segment_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^segment_\d{3}\.ts$").expect("segment name regex"))
}

/// Whether `name` is exactly a `segment_NNN.ts` file name.
///
/// Anything else (including traversal attempts) is rejected before the name
/// ever reaches a storage backend.
pub fn is_valid_segment_name(name: &str) -> bool {
    segment_name_re().is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_posix_and_relative() {
        let id = Uuid::nil();
        assert_eq!(
            upload_path(id, ".mp4"),
            "uploads/raw/00000000-0000-0000-0000-000000000000.mp4"
        );
        assert_eq!(
            playlist_path(id, "720p"),
            "hls/00000000-0000-0000-0000-000000000000/720p/playlist.m3u8"
        );
        assert_eq!(
            segment_path(id, "720p", "segment_004.ts"),
            "hls/00000000-0000-0000-0000-000000000000/720p/segment_004.ts"
        );
        assert_eq!(
            master_playlist_path(id),
            "hls/00000000-0000-0000-0000-000000000000/master.m3u8"
        );
        assert_eq!(
            thumbnail_path(id),
            "thumbnails/00000000-0000-0000-0000-000000000000/thumbnail.jpg"
        );
    }

    #[test]
    fn segment_names_are_zero_padded() {
        assert_eq!(segment_name(0), "segment_000.ts");
        assert_eq!(segment_name(42), "segment_042.ts");
        assert_eq!(segment_name(999), "segment_999.ts");
    }

    #[test]
    fn segment_name_validator_accepts_exactly_the_format() {
        assert!(is_valid_segment_name("segment_000.ts"));
        assert!(is_valid_segment_name("segment_123.ts"));

        assert!(!is_valid_segment_name("segment_1.ts"));
        assert!(!is_valid_segment_name("Segment_001.ts"));
        assert!(!is_valid_segment_name("segment_001.tsx"));
        assert!(!is_valid_segment_name("../segment_001.ts"));
        assert!(!is_valid_segment_name("segment_0001.ts"));
        assert!(!is_valid_segment_name("segment_001.ts "));
        assert!(!is_valid_segment_name(""));
    }
}
