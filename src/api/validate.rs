//! Upload request validation.

use crate::error::{Error, ErrorCode, Result};

/// Validated upload metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMeta {
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

const TITLE_MAX: usize = 255;
const DESCRIPTION_MAX: usize = 2000;
const TAGS_MAX: usize = 10;
const TAG_LEN_MAX: usize = 50;

/// File extensions we accept, without the dot.
const ALLOWED_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "m4v"];

pub fn validate_meta(
    title: Option<&str>,
    description: Option<&str>,
    tags: Option<&str>,
) -> Result<UploadMeta> {
    let title = title.map(str::trim).unwrap_or_default();
    if title.is_empty() {
        return Err(Error::invalid(ErrorCode::TitleRequired, "title is required"));
    }
    if title.chars().count() > TITLE_MAX {
        return Err(Error::invalid(
            ErrorCode::TitleTooLong,
            format!("title must be at most {} characters", TITLE_MAX),
        ));
    }

    // Over-long descriptions are clamped rather than rejected.
    let description = description
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| d.chars().take(DESCRIPTION_MAX).collect::<String>());

    let tags = match tags {
        Some(raw) => parse_tags(raw)?,
        None => Vec::new(),
    };

    Ok(UploadMeta {
        title: title.to_string(),
        description,
        tags,
    })
}

/// Tags arrive either as a JSON array or comma-separated.
fn parse_tags(raw: &str) -> Result<Vec<String>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let tags: Vec<String> = if raw.starts_with('[') {
        serde_json::from_str::<Vec<String>>(raw).map_err(|_| {
            Error::invalid(
                ErrorCode::InvalidTagsFormat,
                "tags must be a JSON array of strings",
            )
        })?
    } else {
        raw.split(',').map(str::to_string).collect()
    };

    let tags: Vec<String> = tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    if tags.len() > TAGS_MAX {
        return Err(Error::invalid(
            ErrorCode::TooManyTags,
            format!("at most {} tags allowed", TAGS_MAX),
        ));
    }
    if let Some(bad) = tags.iter().find(|t| t.chars().count() > TAG_LEN_MAX) {
        return Err(Error::invalid(
            ErrorCode::InvalidTag,
            format!("tag '{}' exceeds {} characters", bad, TAG_LEN_MAX),
        ));
    }

    Ok(tags)
}

/// Validate the upload's file name and MIME type; returns the lowercased
/// extension with its leading dot.
pub fn validate_file(filename: &str, mime_type: &str) -> Result<String> {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(Error::invalid(
            ErrorCode::InvalidFileFormat,
            format!("unsupported file extension '{}'", extension),
        ));
    }
    if !mime_type.starts_with("video/") && mime_type != "application/octet-stream" {
        return Err(Error::invalid(
            ErrorCode::InvalidFileFormat,
            format!("unsupported content type '{}'", mime_type),
        ));
    }

    Ok(format!(".{}", extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_is_trimmed_and_bounded() {
        let meta = validate_meta(Some("  My Clip  "), None, None).unwrap();
        assert_eq!(meta.title, "My Clip");

        let err = validate_meta(Some("   "), None, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TitleRequired);

        let err = validate_meta(None, None, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TitleRequired);

        let long = "x".repeat(256);
        let err = validate_meta(Some(&long), None, None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TitleTooLong);

        let exactly = "x".repeat(255);
        assert!(validate_meta(Some(&exactly), None, None).is_ok());
    }

    #[test]
    fn description_is_clamped_to_2000() {
        let long = "d".repeat(3000);
        let meta = validate_meta(Some("t"), Some(&long), None).unwrap();
        assert_eq!(meta.description.unwrap().chars().count(), 2000);

        let meta = validate_meta(Some("t"), Some("  "), None).unwrap();
        assert!(meta.description.is_none());
    }

    #[test]
    fn tags_accept_json_and_csv() {
        let meta = validate_meta(Some("t"), None, Some(r#"["rust", "video"]"#)).unwrap();
        assert_eq!(meta.tags, vec!["rust", "video"]);

        let meta = validate_meta(Some("t"), None, Some("rust, video ,hls")).unwrap();
        assert_eq!(meta.tags, vec!["rust", "video", "hls"]);
    }

    #[test]
    fn malformed_json_tags_are_rejected() {
        let err = validate_meta(Some("t"), None, Some(r#"["unterminated"#)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidTagsFormat);
    }

    #[test]
    fn tag_count_and_length_are_bounded() {
        let eleven = (0..11).map(|i| format!("t{}", i)).collect::<Vec<_>>().join(",");
        let err = validate_meta(Some("t"), None, Some(&eleven)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TooManyTags);

        let long_tag = "t".repeat(51);
        let err = validate_meta(Some("t"), None, Some(&long_tag)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidTag);
    }

    #[test]
    fn file_validation_lowercases_extension() {
        assert_eq!(validate_file("Clip.MP4", "video/mp4").unwrap(), ".mp4");
        assert_eq!(validate_file("a.webm", "video/webm").unwrap(), ".webm");

        let err = validate_file("notes.txt", "text/plain").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFileFormat);

        let err = validate_file("noextension", "video/mp4").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFileFormat);

        let err = validate_file("clip.mp4", "text/html").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFileFormat);
    }
}
