//! Beach Pier: token-scoped rendezvous for peers negotiating a direct connection.

pub mod config;
pub mod handlers;
pub mod mailbox;
pub mod registry;
pub mod service;
pub mod telemetry;

use std::future::Future;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use handlers::{ApiError, AppState};
pub use service::{ServiceConfig, SignalingService};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/register", post(handlers::register))
        .route("/peers", get(handlers::list_peers))
        .route("/message", post(handlers::post_message))
        .route("/messages", get(handlers::drain_messages))
        .route("/health", get(handlers::health))
        .route("/debug/stats", get(handlers::stats))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serves the router on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("server shutdown with error")
}
