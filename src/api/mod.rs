//! HTTP edge: routing, the response envelope, and request validation.

pub mod error;
pub mod response;
pub mod stream;
pub mod validate;
pub mod videos;

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};

use crate::application::{Producer, Streamer};
use crate::config::Config;
use crate::error::Result;
use crate::ports::queue::JobQueue;
use crate::ports::repository::VideoRepository;
use crate::ports::storage::Storage;

use self::error::ApiResult;
use self::response::ok;

/// Shared handler context.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub repo: Arc<dyn VideoRepository>,
    pub queue: Arc<dyn JobQueue>,
    pub storage: Arc<dyn Storage>,
    pub producer: Arc<Producer>,
    pub streamer: Arc<Streamer>,
    pub db: PgPool,
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    // Streaming endpoints are wide open for players; Range must be allowed
    // through preflight.
    let stream_cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([header::RANGE]);

    let stream_routes = Router::new()
        .route("/stream/{id}/master.m3u8", get(stream::master_playlist))
        .route(
            "/stream/{id}/{resolution}/playlist.m3u8",
            get(stream::variant_playlist),
        )
        .route("/stream/{id}/{resolution}/{segment}", get(stream::segment))
        .layer(stream_cors);

    let api = Router::new()
        .route("/videos/upload", post(videos::upload))
        .route("/videos", get(videos::list))
        .route("/videos/{id}", get(videos::details).delete(videos::remove))
        .route("/videos/{id}/status", get(videos::status))
        .route("/videos/{id}/thumbnail", get(stream::thumbnail))
        .merge(stream_routes);

    let body_limit = state.config.max_upload_bytes as usize;
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Liveness: one round-trip each to Postgres and Redis.
async fn health(State(state): State<AppState>) -> ApiResult<impl axum::response::IntoResponse> {
    check_backends(&state).await?;
    Ok(ok(serde_json::json!({ "status": "ok" })))
}

async fn check_backends(state: &AppState) -> Result<()> {
    sqlx::query("SELECT 1").execute(&state.db).await?;
    state.queue.stats().await?;
    Ok(())
}
