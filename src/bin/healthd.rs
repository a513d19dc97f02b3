//! memoria-healthd: HTTP health/metrics daemon.
//!
//! Mirrors the teacher's `realtime::server::RealtimeServer` (a minimal axum
//! `Router` carrying one shared state, serving `/health`) generalized with
//! a `/metrics` Prometheus endpoint and a per-tenant `/stats/:user_id`
//! route backed by the control plane instead of a client-count gauge.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use memoria::config::Config;
use memoria::control_plane::ControlPlane;
use memoria::engine::MemoryEngineBuilder;
use memoria::error::Result;
use memoria::storage::sqlite::SqliteRecordStore;

#[derive(Parser)]
#[command(name = "memoria-healthd")]
#[command(about = "Health and metrics HTTP daemon for the memoria engine")]
#[command(version)]
struct Args {
    #[arg(long, env = "MEMORIA_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "MEMORIA_HEALTHD_BIND_ADDR")]
    bind_addr: Option<SocketAddr>,
}

type SharedControlPlane = Arc<ControlPlane>;

fn router(control_plane: SharedControlPlane) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/stats/:user_id", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(control_plane)
}

async fn health_handler(State(control_plane): State<SharedControlPlane>) -> impl IntoResponse {
    let report = control_plane.health().await;
    let status_code = match report.composite() {
        memoria::storage::AdapterStatus::Ok => axum::http::StatusCode::OK,
        memoria::storage::AdapterStatus::Degraded => axum::http::StatusCode::OK,
        memoria::storage::AdapterStatus::Down => axum::http::StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(report))
}

async fn metrics_handler(State(control_plane): State<SharedControlPlane>) -> impl IntoResponse {
    control_plane.prometheus_metrics()
}

async fn stats_handler(
    State(control_plane): State<SharedControlPlane>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match control_plane.stats(&user_id).await {
        Ok(stats) => (axum::http::StatusCode::OK, Json(stats)).into_response(),
        Err(err) => (axum::http::StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    let bind_addr: SocketAddr = args
        .bind_addr
        .unwrap_or_else(|| config.server.bind_addr.parse().expect("invalid server.bind_addr"));

    std::fs::create_dir_all(&config.storage.data_dir)?;
    let db_path = PathBuf::from(&config.storage.data_dir).join("memoria.db");
    let record_store = Arc::new(SqliteRecordStore::open(&db_path)?);
    let engine = Arc::new(MemoryEngineBuilder::new(config).record_store(record_store).build());
    let control_plane = Arc::new(ControlPlane::new(engine));

    tracing::info!("memoria-healthd listening on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, router(control_plane)).await?;

    Ok(())
}
