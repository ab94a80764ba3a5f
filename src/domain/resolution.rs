//! The encoding ladder.

use serde::{Deserialize, Serialize};

/// One rung of the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenditionSpec {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    /// Target video bitrate in kbps
    pub bitrate_kbps: u32,
}

/// The known ladder, ascending.
pub const LADDER: [RenditionSpec; 3] = [
    RenditionSpec {
        label: "480p",
        width: 854,
        height: 480,
        bitrate_kbps: 1200,
    },
    RenditionSpec {
        label: "720p",
        width: 1280,
        height: 720,
        bitrate_kbps: 2500,
    },
    RenditionSpec {
        label: "1080p",
        width: 1920,
        height: 1080,
        bitrate_kbps: 5000,
    },
];

/// Look up a rung by its label.
pub fn find(label: &str) -> Option<RenditionSpec> {
    LADDER.iter().copied().find(|r| r.label == label)
}

/// Intersect the requested labels with the known ladder and drop anything
/// taller than the source (never upscale). Unknown labels are skipped, not
/// errors. Requested order is preserved.
pub fn filter_requested(requested: &[String], source_height: u32) -> Vec<RenditionSpec> {
    requested
        .iter()
        .filter_map(|label| {
            let spec = find(label);
            if spec.is_none() {
                tracing::warn!(label = %label, "unknown resolution label, skipping");
            }
            spec
        })
        .filter(|spec| spec.height <= source_height)
        .collect()
}
