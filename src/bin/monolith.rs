//! Monolith binary: API server plus transcoding workers in one process.
//!
//! Wires up:
//! - Postgres repository (schema bootstrap on start)
//! - Redis job queue (with its promotion/visibility maintenance task)
//! - Storage backend selected by config (local FS or S3-compatible)
//! - W transcoding workers sharing one cancellation token
//! - The HTTP router

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use presley::adapters::local::redis::RedisJobQueue;
use presley::adapters::postgres::{schema, PgVideoRepository};
use presley::api::{self, AppState};
use presley::application::{Producer, Streamer, Worker};
use presley::domain::av::{FfmpegCli, HlsTranscoder, MediaProber};
use presley::ports::queue::JobQueue;
use presley::Config;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run() -> presley::Result<()> {
    let config = Arc::new(Config::from_env()?);
    tracing::info!(app = %config.app_name, env = ?config.app_env, "starting");

    // Persistence
    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    schema::ensure_schema(&db).await?;
    let repo = Arc::new(PgVideoRepository::new(db.clone()));

    // Queue
    let redis_queue = Arc::new(RedisJobQueue::new(
        &config.redis_url,
        config.queue_retry_delay_secs,
        config.queue_retry_attempts,
    )?);
    redis_queue.ping().await?;

    // Storage
    let storage = presley::adapters::make_storage(&config).await?;

    let queue: Arc<dyn JobQueue> = redis_queue.clone();
    let producer = Arc::new(Producer::new(
        repo.clone(),
        queue.clone(),
        config.queue_retry_attempts as i32,
    ));
    let streamer = Arc::new(Streamer::new(repo.clone(), storage.clone()));

    // Workers
    let cancel = CancellationToken::new();
    let maintenance = redis_queue.clone().spawn_maintenance(cancel.clone());

    let runner = Arc::new(FfmpegCli::new());
    let mut worker_handles = Vec::with_capacity(config.worker_count);
    for i in 0..config.worker_count {
        let worker = Worker::new(
            format!("worker-{}", i),
            repo.clone(),
            queue.clone(),
            storage.clone(),
            MediaProber::new(storage.clone(), runner.clone()),
            HlsTranscoder::new(storage.clone(), runner.clone()),
            config.delete_source_after_transcode,
        );
        let token = cancel.clone();
        worker_handles.push(tokio::spawn(async move {
            worker.run(token).await;
        }));
    }
    tracing::info!(count = config.worker_count, "transcoding workers started");

    // HTTP
    let cors = if config.cors_origin == "*" {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origin = config
            .cors_origin
            .parse::<axum::http::HeaderValue>()
            .map_err(|_| presley::Error::config("invalid CORS_ORIGIN"))?;
        CorsLayer::new().allow_origin(origin).allow_methods(Any).allow_headers(Any)
    };

    let state = AppState {
        config: config.clone(),
        repo,
        queue,
        storage,
        producer,
        streamer,
        db,
    };
    let app = api::router(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.addr, config.port)).await?;
    tracing::info!(addr = %config.addr, port = config.port, "listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    // Let in-flight jobs release their leases before exiting.
    cancel.cancel();
    for handle in worker_handles {
        let _ = handle.await;
    }
    let _ = maintenance.await;
    tracing::info!("shutdown complete");

    Ok(())
}
