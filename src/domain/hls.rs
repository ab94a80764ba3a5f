//! HLS playlist composition.
//!
//! Variant playlists are produced by the FFmpeg HLS muxer; this module owns
//! the master playlist and the little parsing we do to cross-check that a
//! generated playlist only references segments that exist.

/// One `#EXT-X-STREAM-INF` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterVariant {
    /// Ladder label, doubles as the relative directory name
    pub resolution: String,
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
}

impl MasterVariant {
    /// Relative URI of this variant's playlist.
    pub fn uri(&self) -> String {
        format!("{}/playlist.m3u8", self.resolution)
    }
}

/// Master playlist over a set of renditions.
#[derive(Debug, Clone)]
pub struct MasterPlaylist {
    pub version: u8,
    pub variants: Vec<MasterVariant>,
}

impl MasterPlaylist {
    /// Compose a master playlist sorted by descending height (the order the
    /// transcoder persists).
    pub fn descending(mut variants: Vec<MasterVariant>) -> Self {
        variants.sort_by(|a, b| b.height.cmp(&a.height));
        Self {
            version: 3,
            variants,
        }
    }

    /// Compose a master playlist sorted by ascending bitrate (the order the
    /// streamer regenerates from repository rows).
    pub fn ascending_bitrate(mut variants: Vec<MasterVariant>) -> Self {
        variants.sort_by(|a, b| a.bitrate_kbps.cmp(&b.bitrate_kbps));
        Self {
            version: 3,
            variants,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("#EXTM3U\n");
        out.push_str(&format!("#EXT-X-VERSION:{}\n\n", self.version));
        for variant in &self.variants {
            out.push_str(&format!(
                "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n",
                variant.bitrate_kbps as u64 * 1000,
                variant.width,
                variant.height
            ));
            out.push_str(&variant.uri());
            out.push('\n');
        }
        out
    }
}

/// Extract the segment URIs referenced by a variant playlist, in order.
/// Comment and tag lines are skipped.
pub fn media_playlist_segments(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ladder() -> Vec<MasterVariant> {
        vec![
            MasterVariant {
                resolution: "480p".into(),
                width: 854,
                height: 480,
                bitrate_kbps: 1200,
            },
            MasterVariant {
                resolution: "1080p".into(),
                width: 1920,
                height: 1080,
                bitrate_kbps: 5000,
            },
            MasterVariant {
                resolution: "720p".into(),
                width: 1280,
                height: 720,
                bitrate_kbps: 2500,
            },
        ]
    }

    #[test]
    fn master_renders_descending_height() {
        let playlist = MasterPlaylist::descending(ladder());
        let rendered = playlist.render();

        assert!(rendered.starts_with("#EXTM3U\n#EXT-X-VERSION:3\n\n"));
        let p1080 = rendered.find("1080p/playlist.m3u8").unwrap();
        let p720 = rendered.find("720p/playlist.m3u8").unwrap();
        let p480 = rendered.find("480p/playlist.m3u8").unwrap();
        assert!(p1080 < p720 && p720 < p480);
    }

    #[test]
    fn master_bandwidth_is_bits_per_second() {
        let playlist = MasterPlaylist::descending(vec![MasterVariant {
            resolution: "720p".into(),
            width: 1280,
            height: 720,
            bitrate_kbps: 2500,
        }]);
        let rendered = playlist.render();
        assert!(rendered.contains("#EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720"));
    }

    #[test]
    fn ascending_bitrate_reverses_the_ladder() {
        let playlist = MasterPlaylist::ascending_bitrate(ladder());
        let labels: Vec<&str> = playlist
            .variants
            .iter()
            .map(|v| v.resolution.as_str())
            .collect();
        assert_eq!(labels, vec!["480p", "720p", "1080p"]);
    }

    #[test]
    fn single_variant_master() {
        let playlist = MasterPlaylist::descending(vec![MasterVariant {
            resolution: "480p".into(),
            width: 854,
            height: 480,
            bitrate_kbps: 1200,
        }]);
        let rendered = playlist.render();
        assert_eq!(
            rendered,
            "#EXTM3U\n#EXT-X-VERSION:3\n\n#EXT-X-STREAM-INF:BANDWIDTH=1200000,RESOLUTION=854x480\n480p/playlist.m3u8\n"
        );
    }

    #[test]
    fn media_playlist_segment_extraction() {
        let playlist = "#EXTM3U\n\
                        #EXT-X-VERSION:3\n\
                        #EXT-X-TARGETDURATION:10\n\
                        #EXT-X-PLAYLIST-TYPE:VOD\n\
                        #EXTINF:10.000000,\n\
                        segment_000.ts\n\
                        #EXTINF:8.340000,\n\
                        segment_001.ts\n\
                        #EXT-X-ENDLIST\n";
        assert_eq!(
            media_playlist_segments(playlist),
            vec!["segment_000.ts", "segment_001.ts"]
        );
    }
}
