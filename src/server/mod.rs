//! HTTP surface of the coordinator.
//!
//! Node-facing routes live in [`handlers`]; the read-only dashboard adds its
//! own routes from [`crate::dashboard`].

pub mod handlers;

use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::coordinator::CoordinatorState;
use crate::error::Result;

/// Largest accepted upload (artifacts and engine binaries).
pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

pub fn build_router(state: CoordinatorState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/register", post(handlers::register))
        .route("/parameters", get(handlers::get_parameters))
        .route("/set_parameters", post(handlers::set_parameters))
        .route("/progress", post(handlers::progress))
        .route("/upload", post(handlers::upload))
        .route("/download/:filename", get(handlers::download))
        .route(
            "/engine",
            get(handlers::download_engine).post(handlers::upload_engine),
        )
        .route("/engine/info", get(handlers::engine_info))
        .merge(crate::dashboard::routes())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Serve the coordinator on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: CoordinatorState,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(addr = %addr, "Starting coordinator HTTP server");

    let app = build_router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Coordinator HTTP server stopped");
    Ok(())
}
