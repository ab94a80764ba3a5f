//! HLS delivery handlers. Thin wrappers over the streamer that attach the
//! wire headers players rely on.

use axum::extract::{Path as AxumPath, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use super::error::ApiResult;
use super::AppState;

const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";

/// Playlists change when a video is re-transcoded; cache briefly.
const PLAYLIST_CACHE: &str = "public, max-age=300";
/// Segments are immutable once written; cache for a year.
const SEGMENT_CACHE: &str = "public, max-age=31536000";
const THUMBNAIL_CACHE: &str = "public, max-age=86400";

/// GET /api/v1/stream/{id}/master.m3u8
pub async fn master_playlist(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> ApiResult<Response> {
    let bytes = state.streamer.get_master_playlist(id).await?;
    Ok(playlist_response(bytes))
}

/// GET /api/v1/stream/{id}/{resolution}/playlist.m3u8
pub async fn variant_playlist(
    State(state): State<AppState>,
    AxumPath((id, resolution)): AxumPath<(Uuid, String)>,
) -> ApiResult<Response> {
    let bytes = state.streamer.get_playlist(id, &resolution).await?;
    Ok(playlist_response(bytes))
}

/// GET /api/v1/stream/{id}/{resolution}/{segment}
pub async fn segment(
    State(state): State<AppState>,
    AxumPath((id, resolution, segment)): AxumPath<(Uuid, String, String)>,
) -> ApiResult<Response> {
    let bytes = state.streamer.get_segment(id, &resolution, &segment).await?;
    Ok((
        [
            (header::CONTENT_TYPE, SEGMENT_CONTENT_TYPE),
            (header::CACHE_CONTROL, SEGMENT_CACHE),
            (header::ACCEPT_RANGES, "bytes"),
        ],
        bytes,
    )
        .into_response())
}

/// GET /api/v1/videos/{id}/thumbnail
pub async fn thumbnail(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<Uuid>,
) -> ApiResult<Response> {
    let bytes = state.streamer.get_thumbnail(id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, THUMBNAIL_CACHE),
        ],
        bytes,
    )
        .into_response())
}

fn playlist_response(bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, PLAYLIST_CONTENT_TYPE),
            (header::CACHE_CONTROL, PLAYLIST_CACHE),
        ],
        bytes,
    )
        .into_response()
}
